use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::analyzers::{Issue, Severity};
use crate::cli::config::AiSettings;
use crate::report::prompt::{build_user_message, CrawlStats, SYSTEM_PROMPT};

const API_VERSION: &str = "2023-06-01";

/// Why one compile attempt failed
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Reasoning API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Reasoning API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("No text block in reasoning API response")]
    EmptyResponse,

    #[error("Reasoning API response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Reasoning API response violates the report schema: {0}")]
    Schema(String),
}

/// Impact/effort bucket of a scored issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quadrant {
    QuickWin,
    MajorProject,
    FillIn,
    TimeWaster,
}

impl Quadrant {
    pub fn label(&self) -> &'static str {
        match self {
            Quadrant::QuickWin => "Quick Win",
            Quadrant::MajorProject => "Major Project",
            Quadrant::FillIn => "Fill-in",
            Quadrant::TimeWaster => "Time Waster",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredIssue {
    pub title: String,
    pub severity: Severity,
    pub impact: u8,
    pub effort: u8,
    pub quadrant: Quadrant,
    #[serde(default)]
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub sprint_1: Vec<String>,
    pub sprint_2: Vec<String>,
    pub backlog: Vec<String>,
}

/// Validated output of the reasoning model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiReport {
    pub executive_summary: String,
    pub scored_issues: Vec<ScoredIssue>,
    pub action_plan: ActionPlan,
    pub recommendations_text: String,
}

impl AiReport {
    /// Parse raw model text, tolerating a code fence around the JSON
    pub fn parse(raw: &str) -> Result<Self, CompileError> {
        let report: AiReport = serde_json::from_str(strip_code_fences(raw))?;
        report.validate()?;
        Ok(report)
    }

    fn validate(&self) -> Result<(), CompileError> {
        for scored in &self.scored_issues {
            for (name, value) in [("impact", scored.impact), ("effort", scored.effort)] {
                if !(1..=5).contains(&value) {
                    return Err(CompileError::Schema(format!(
                        "{} of '{}' is {}, expected 1-5",
                        name, scored.title, value
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Remove a surrounding Markdown code fence, if any
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = match text.find('\n') {
            Some(newline) => &text[newline + 1..],
            None => "",
        };
        text = text.trim_end();
        if let Some(inner) = text.strip_suffix("```") {
            text = inner;
        }
    }
    text.trim()
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    output_tokens: Option<u64>,
}

/// Turns the issue list into an AI action plan
pub struct ReportCompiler {
    config: AiSettings,
    client: Client,
}

impl ReportCompiler {
    pub fn new(config: AiSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout))
            .build()
            .context("Failed to build reasoning API HTTP client")?;

        Ok(Self { config, client })
    }

    /// Compile an AI report, retrying with linear backoff.
    ///
    /// Returns `None` when there is nothing to compile, when no API key is
    /// configured, or when every attempt failed.
    pub async fn compile(
        &self,
        issues: &[Issue],
        stats: &CrawlStats,
        custom_instructions: Option<&str>,
    ) -> Option<AiReport> {
        if issues.is_empty() {
            info!("No issues to analyze, skipping AI compilation");
            return None;
        }

        let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            warn!("Reasoning API key is not configured, skipping AI compilation");
            return None;
        };

        let user_message = build_user_message(issues, stats, custom_instructions);
        let attempts = self.config.max_retries + 1;

        for attempt in 1..=attempts {
            info!(
                attempt,
                issues = issues.len(),
                model = %self.config.model,
                "Calling reasoning API for SEO report"
            );

            match self.attempt(api_key, &user_message).await {
                Ok(report) => {
                    info!(
                        scored_issues = report.scored_issues.len(),
                        sprint_1 = report.action_plan.sprint_1.len(),
                        "AI report generated"
                    );
                    return Some(report);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "AI report attempt failed");
                    if attempt < attempts {
                        let backoff = self.config.backoff_step * u64::from(attempt);
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        error!(
            retries = self.config.max_retries,
            "AI report generation failed after all retries, continuing without AI summary"
        );
        None
    }

    async fn attempt(&self, api_key: &str, user_message: &str) -> Result<AiReport, CompileError> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: user_message,
            }],
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompileError::Api {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let data: MessagesResponse = response.json().await?;
        if let Some(tokens) = data.usage.as_ref().and_then(|u| u.output_tokens) {
            info!(output_tokens = tokens, "Reasoning API usage");
        }

        let text = data
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .ok_or(CompileError::EmptyResponse)?;

        AiReport::parse(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn report_json() -> serde_json::Value {
        json!({
            "executive_summary": "Web je technicky v dobrém stavu.",
            "scored_issues": [
                {
                    "title": "Chybějící title tag",
                    "severity": "critical",
                    "impact": 5,
                    "effort": 1,
                    "quadrant": "quick_win",
                    "recommendation": "Doplňte title."
                }
            ],
            "action_plan": {
                "sprint_1": ["Doplnit title tagy"],
                "sprint_2": [],
                "backlog": []
            },
            "recommendations_text": "Začněte title tagy."
        })
    }

    fn text_response(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "content": [{ "type": "text", "text": text }],
            "usage": { "output_tokens": 321 }
        }))
    }

    fn settings(server: &MockServer, api_key: Option<&str>) -> AiSettings {
        AiSettings {
            endpoint: format!("{}/v1/messages", server.uri()),
            api_key: api_key.map(str::to_string),
            backoff_step: 1,
            ..AiSettings::default()
        }
    }

    fn issues() -> Vec<Issue> {
        vec![Issue::new(
            Severity::Critical,
            "Chybějící title tag",
            "1 stránka nemá title.",
            vec!["https://example.com/".to_string()],
            "Doplňte title.",
        )]
    }

    fn stats() -> CrawlStats {
        CrawlStats {
            domain: "example.com".to_string(),
            total_pages_crawled: 1,
            crawl_depth_used: 3,
            crawl_duration_ms: 1_000,
        }
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```  "), "{}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_parse_rejects_out_of_range_scores() {
        let mut value = report_json();
        value["scored_issues"][0]["impact"] = json!(7);
        let err = AiReport::parse(&value.to_string()).unwrap_err();
        assert!(matches!(err, CompileError::Schema(_)));

        let mut value = report_json();
        value["scored_issues"][0]["quadrant"] = json!("someday");
        assert!(matches!(
            AiReport::parse(&value.to_string()),
            Err(CompileError::InvalidJson(_))
        ));

        let mut value = report_json();
        value["action_plan"].as_object_mut().unwrap().remove("backlog");
        assert!(AiReport::parse(&value.to_string()).is_err());
    }

    #[tokio::test]
    async fn test_compile_fenced_response() {
        let server = MockServer::start().await;
        let fenced = format!("```json\n{}\n```", report_json());
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "secret"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(text_response(&fenced))
            .expect(1)
            .mount(&server)
            .await;

        let compiler = ReportCompiler::new(settings(&server, Some("secret"))).unwrap();
        let report = compiler.compile(&issues(), &stats(), None).await.unwrap();

        assert_eq!(report.scored_issues[0].quadrant, Quadrant::QuickWin);
        assert_eq!(report.action_plan.sprint_1, vec!["Doplnit title tagy"]);
    }

    #[tokio::test]
    async fn test_compile_gives_up_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(text_response("Tady je váš report: nic."))
            .expect(3)
            .mount(&server)
            .await;

        let compiler = ReportCompiler::new(settings(&server, Some("secret"))).unwrap();
        assert!(compiler.compile(&issues(), &stats(), None).await.is_none());
    }

    #[tokio::test]
    async fn test_compile_recovers_on_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(text_response(&report_json().to_string()))
            .mount(&server)
            .await;

        let compiler = ReportCompiler::new(settings(&server, Some("secret"))).unwrap();
        assert!(compiler.compile(&issues(), &stats(), None).await.is_some());
    }

    #[tokio::test]
    async fn test_compile_skipped_without_key_or_issues() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(text_response(&report_json().to_string()))
            .expect(0)
            .mount(&server)
            .await;

        let keyless = ReportCompiler::new(settings(&server, None)).unwrap();
        assert!(keyless.compile(&issues(), &stats(), None).await.is_none());

        let keyed = ReportCompiler::new(settings(&server, Some("secret"))).unwrap();
        assert!(keyed.compile(&[], &stats(), None).await.is_none());
    }
}
