use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::config::PageSpeedSettings;
use crate::pagespeed::{MetricSource, PageSpeedResult, ProbeError, Strategy};
use crate::worker::progress::StageProgress;

/// PageSpeed Insights response, reduced to the fields we read
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PsiResponse {
    loading_experience: Option<LoadingExperience>,
    lighthouse_result: Option<LighthouseResult>,
}

#[derive(Debug, Default, Deserialize)]
struct LoadingExperience {
    metrics: Option<HashMap<String, FieldMetric>>,
    overall_category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FieldMetric {
    percentile: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct LighthouseResult {
    audits: Option<HashMap<String, LabAudit>>,
    categories: Option<LighthouseCategories>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabAudit {
    numeric_value: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct LighthouseCategories {
    performance: Option<CategoryScore>,
}

#[derive(Debug, Default, Deserialize)]
struct CategoryScore {
    score: Option<f64>,
}

impl PsiResponse {
    fn lab_score(&self) -> Option<u32> {
        self.lighthouse_result
            .as_ref()?
            .categories
            .as_ref()?
            .performance
            .as_ref()?
            .score
            .map(|score| (score * 100.0).round() as u32)
    }

    /// Field data when CrUX has it, otherwise Lighthouse lab audits
    fn into_result(self, url: &str, strategy: Strategy) -> PageSpeedResult {
        let performance_score = self.lab_score();

        if let Some(LoadingExperience {
            metrics: Some(metrics),
            overall_category: Some(category),
        }) = &self.loading_experience
        {
            if !category.is_empty() {
                let field = |key: &str| metrics.get(key).and_then(|m| m.percentile);
                return PageSpeedResult {
                    url: url.to_string(),
                    strategy,
                    performance_score,
                    lcp: field("LARGEST_CONTENTFUL_PAINT_MS"),
                    inp: field("INTERACTION_TO_NEXT_PAINT"),
                    // CrUX reports CLS multiplied by 100
                    cls: field("CUMULATIVE_LAYOUT_SHIFT_SCORE").map(|v| v / 100.0),
                    ttfb: field("EXPERIMENTAL_TIME_TO_FIRST_BYTE"),
                    source: MetricSource::Field,
                };
            }
        }

        let audits = self
            .lighthouse_result
            .and_then(|lighthouse| lighthouse.audits)
            .unwrap_or_default();
        if audits.is_empty() {
            warn!(url = %url, strategy = %strategy, "No audit data in PageSpeed response");
        }
        let lab = |key: &str| audits.get(key).and_then(|a| a.numeric_value);

        PageSpeedResult {
            url: url.to_string(),
            strategy,
            performance_score,
            lcp: lab("largest-contentful-paint"),
            // Total Blocking Time stands in for INP in lab runs
            inp: lab("total-blocking-time"),
            cls: lab("cumulative-layout-shift"),
            ttfb: lab("server-response-time"),
            source: MetricSource::Lab,
        }
    }
}

/// Serialized, rate-limited PageSpeed Insights prober
pub struct PageSpeedClient {
    config: PageSpeedSettings,
    client: Client,
}

impl PageSpeedClient {
    pub fn new(config: PageSpeedSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout))
            .build()
            .context("Failed to build PageSpeed HTTP client")?;

        Ok(Self { config, client })
    }

    fn strategies(&self) -> Vec<Strategy> {
        self.config
            .strategies
            .iter()
            .filter_map(|raw| match raw.parse() {
                Ok(strategy) => Some(strategy),
                Err(e) => {
                    warn!(error = %e, "Ignoring PageSpeed strategy");
                    None
                }
            })
            .collect()
    }

    /// Measure every (URL, strategy) pair in turn.
    ///
    /// Pairs that fail are dropped. The only errors returned are a missing
    /// API key and a rejected progress write.
    pub async fn run(
        &self,
        urls: &[String],
        progress: &dyn StageProgress,
    ) -> Result<Vec<PageSpeedResult>> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(ProbeError::MissingApiKey)?;

        let strategies = self.strategies();
        let total = urls.len() * strategies.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        info!(urls = urls.len(), total_requests = total, "Starting PageSpeed analysis");

        let delay = Duration::from_millis(self.config.rate_limit_delay);
        let mut results = Vec::new();
        let mut completed = 0;

        for url in urls {
            for strategy in &strategies {
                if let Some(result) = self.measure(url, *strategy, api_key).await {
                    info!(
                        url = %url,
                        strategy = %strategy,
                        score = ?result.performance_score,
                        source = ?result.source,
                        "PageSpeed result"
                    );
                    results.push(result);
                }

                completed += 1;
                progress.report(completed, total).await?;

                if completed < total {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        info!(results = results.len(), total_requests = total, "PageSpeed analysis complete");
        Ok(results)
    }

    /// One API call; `None` on any failure
    async fn measure(&self, url: &str, strategy: Strategy, api_key: &str) -> Option<PageSpeedResult> {
        let response = match self
            .client
            .get(&self.config.endpoint)
            .query(&[
                ("url", url),
                ("strategy", strategy.as_str()),
                ("category", "performance"),
                ("key", api_key),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, strategy = %strategy, error = %e, "PageSpeed request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            warn!(
                url = %url,
                strategy = %strategy,
                status = status.as_u16(),
                body = %excerpt,
                "PageSpeed API error"
            );
            return None;
        }

        match response.json::<PsiResponse>().await {
            Ok(data) => Some(data.into_result(url, strategy)),
            Err(e) => {
                warn!(url = %url, strategy = %strategy, error = %e, "Malformed PageSpeed response");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer, api_key: Option<&str>) -> PageSpeedSettings {
        PageSpeedSettings {
            endpoint: format!("{}/runPagespeed", server.uri()),
            api_key: api_key.map(str::to_string),
            rate_limit_delay: 0,
            ..PageSpeedSettings::default()
        }
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|u| u.to_string()).collect()
    }

    #[tokio::test]
    async fn test_field_metrics_preferred() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/runPagespeed"))
            .and(query_param("strategy", "mobile"))
            .and(query_param("key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "loadingExperience": {
                    "overall_category": "AVERAGE",
                    "metrics": {
                        "LARGEST_CONTENTFUL_PAINT_MS": { "percentile": 3100 },
                        "INTERACTION_TO_NEXT_PAINT": { "percentile": 180 },
                        "CUMULATIVE_LAYOUT_SHIFT_SCORE": { "percentile": 12 }
                    }
                },
                "lighthouseResult": {
                    "categories": { "performance": { "score": 0.734 } },
                    "audits": { "largest-contentful-paint": { "numericValue": 999.0 } }
                }
            })))
            .mount(&server)
            .await;

        let mut config = settings(&server, Some("secret"));
        config.strategies = vec!["mobile".to_string()];
        let client = PageSpeedClient::new(config).unwrap();

        let results = client.run(&urls(&["https://example.com/"]), &()).await.unwrap();
        assert_eq!(results.len(), 1);

        let result = &results[0];
        assert_eq!(result.source, MetricSource::Field);
        assert_eq!(result.performance_score, Some(73));
        assert_eq!(result.lcp, Some(3100.0));
        assert_eq!(result.inp, Some(180.0));
        assert_eq!(result.cls, Some(0.12));
        assert_eq!(result.ttfb, None);
    }

    #[tokio::test]
    async fn test_lab_fallback_and_failed_pairs_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/runPagespeed"))
            .and(query_param("strategy", "mobile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "lighthouseResult": {
                    "categories": { "performance": { "score": 0.42 } },
                    "audits": {
                        "largest-contentful-paint": { "numericValue": 4500.5 },
                        "total-blocking-time": { "numericValue": 320.0 },
                        "cumulative-layout-shift": { "numericValue": 0.05 },
                        "server-response-time": { "numericValue": 250.0 },
                        "final-screenshot": { "details": { "data": "..." } }
                    }
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/runPagespeed"))
            .and(query_param("strategy", "desktop"))
            .respond_with(ResponseTemplate::new(500).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let client = PageSpeedClient::new(settings(&server, Some("secret"))).unwrap();
        let results = client.run(&urls(&["https://example.com/"]), &()).await.unwrap();

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.strategy, Strategy::Mobile);
        assert_eq!(result.source, MetricSource::Lab);
        assert_eq!(result.performance_score, Some(42));
        assert_eq!(result.lcp, Some(4500.5));
        assert_eq!(result.inp, Some(320.0));
        assert_eq!(result.ttfb, Some(250.0));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let server = MockServer::start().await;
        let client = PageSpeedClient::new(settings(&server, None)).unwrap();

        let err = client
            .run(&urls(&["https://example.com/"]), &())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ProbeError>(), Some(ProbeError::MissingApiKey)));
    }
}
