pub mod client;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::crawler::page::CrawledPage;
use crate::crawler::scheduler::normalize_url;

// Re-export common types
pub use client::PageSpeedClient;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("PageSpeed API key is not configured")]
    MissingApiKey,
}

/// Device profile a measurement was taken for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Mobile,
    Desktop,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Mobile => "mobile",
            Strategy::Desktop => "desktop",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mobile" => Ok(Strategy::Mobile),
            "desktop" => Ok(Strategy::Desktop),
            other => anyhow::bail!("Unknown PageSpeed strategy: {}", other),
        }
    }
}

/// Where the numbers came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricSource {
    /// Real-user (CrUX) data
    Field,

    /// Synthetic Lighthouse run
    Lab,
}

/// Core Web Vitals for one (URL, strategy) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSpeedResult {
    pub url: String,
    pub strategy: Strategy,

    /// Lighthouse performance score, 0-100
    pub performance_score: Option<u32>,

    /// Largest Contentful Paint in milliseconds
    pub lcp: Option<f64>,

    /// Interaction to Next Paint in milliseconds (Total Blocking Time for lab data)
    pub inp: Option<f64>,

    /// Cumulative Layout Shift, unitless
    pub cls: Option<f64>,

    /// Time to First Byte in milliseconds
    pub ttfb: Option<f64>,

    pub source: MetricSource,
}

/// Pick the homepage plus the `top_k` most linked-to 200 pages
pub fn select_urls(pages: &[CrawledPage], top_k: usize) -> Vec<String> {
    if pages.is_empty() {
        return Vec::new();
    }

    // Count inbound internal links per URL
    let mut inlinks: HashMap<String, usize> = HashMap::new();
    for page in pages {
        for link in &page.internal_links {
            *inlinks.entry(normalize_url(&link.href)).or_default() += 1;
        }
    }

    let homepage = pages
        .iter()
        .find(|p| p.crawl_depth == 0)
        .map(|p| p.final_url.clone())
        .unwrap_or_else(|| pages[0].url.clone());
    let homepage_key = normalize_url(&homepage);

    let mut candidates: Vec<&CrawledPage> = pages
        .iter()
        .filter(|p| p.is_ok() && normalize_url(&p.final_url) != homepage_key)
        .collect();
    // Stable sort keeps crawl order among equally linked pages
    candidates.sort_by_key(|p| {
        std::cmp::Reverse(inlinks.get(&normalize_url(&p.final_url)).copied().unwrap_or(0))
    });

    let mut selected = vec![homepage];
    let mut keys = vec![homepage_key];
    for page in candidates {
        if selected.len() > top_k {
            break;
        }
        let key = normalize_url(&page.final_url);
        if !keys.contains(&key) {
            keys.push(key);
            selected.push(page.final_url.clone());
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::page::LinkData;

    fn page(url: &str, depth: u32, status: u16, links: &[&str]) -> CrawledPage {
        let mut page = CrawledPage::redirect_only(url, Vec::new(), 10, depth);
        page.status_code = status;
        page.internal_links = links
            .iter()
            .map(|href| LinkData {
                href: href.to_string(),
                anchor_text: String::new(),
                is_nofollow: false,
            })
            .collect();
        page
    }

    #[test]
    fn test_select_urls_prefers_most_linked() {
        let pages = vec![
            page(
                "https://example.com/",
                0,
                200,
                &["https://example.com/b", "https://example.com/c", "https://example.com/c"],
            ),
            page("https://example.com/a", 1, 200, &["https://example.com/c"]),
            page("https://example.com/b", 1, 200, &[]),
            page("https://example.com/c", 1, 200, &[]),
            page("https://example.com/gone", 1, 404, &[]),
        ];

        let urls = select_urls(&pages, 2);
        assert_eq!(
            urls,
            vec!["https://example.com/", "https://example.com/c", "https://example.com/b"]
        );
    }

    #[test]
    fn test_select_urls_empty_crawl() {
        assert!(select_urls(&[], 5).is_empty());
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("Mobile".parse::<Strategy>().unwrap(), Strategy::Mobile);
        assert!("tablet".parse::<Strategy>().is_err());
    }
}
