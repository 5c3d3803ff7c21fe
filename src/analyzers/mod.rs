pub mod aeo_geo;
pub mod architecture;
pub mod indexability;
pub mod international;
pub mod on_page;
pub mod performance;
pub mod security;
pub mod structured_data;

use anyhow::{Context, Result};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::crawler::page::CrawledPage;
use crate::crawler::scheduler::normalize_url;
use crate::pagespeed::PageSpeedResult;

/// How bad a finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }

    /// Category score penalty
    pub fn penalty(&self) -> u32 {
        match self {
            Severity::Critical => 15,
            Severity::Warning => 5,
            Severity::Info => 1,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub affected_urls: Vec<String>,
    pub recommendation: String,
}

impl Issue {
    pub fn new(
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        affected_urls: Vec<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            title: title.into(),
            description: description.into(),
            affected_urls,
            recommendation: recommendation.into(),
        }
    }
}

/// Read-only snapshot every analyzer works from
#[derive(Debug, Clone, Default)]
pub struct AnalyzerInput {
    pub pages: Vec<CrawledPage>,
    pub robots_txt: Option<String>,
    pub sitemap_urls: Vec<String>,
    pub pagespeed: Vec<PageSpeedResult>,

    /// `/llms.txt` answered 200 during the crawl
    pub llms_txt_found: bool,
}

impl AnalyzerInput {
    /// Pages that answered 200 OK
    pub fn valid_pages(&self) -> impl Iterator<Item = &CrawledPage> {
        self.pages.iter().filter(|p| p.is_ok())
    }

    /// The seed page, when it answered 200
    pub fn homepage(&self) -> Option<&CrawledPage> {
        self.valid_pages().find(|p| p.crawl_depth == 0)
    }

    /// Pages keyed by normalized final URL; the first page wins on collisions
    pub fn pages_by_url(&self) -> HashMap<String, &CrawledPage> {
        let mut map = HashMap::new();
        for page in &self.pages {
            map.entry(normalize_url(&page.final_url)).or_insert(page);
        }
        map
    }

    /// Inbound internal link count per normalized URL
    pub fn inlink_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for page in &self.pages {
            for link in &page.internal_links {
                *counts.entry(normalize_url(&link.href)).or_default() += 1;
            }
        }
        counts
    }
}

/// The fixed analyzer battery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyzerKind {
    Indexability,
    OnPage,
    Security,
    Architecture,
    StructuredData,
    Performance,
    AeoGeo,
    International,
}

impl AnalyzerKind {
    pub const ALL: [AnalyzerKind; 8] = [
        AnalyzerKind::Indexability,
        AnalyzerKind::OnPage,
        AnalyzerKind::Security,
        AnalyzerKind::Architecture,
        AnalyzerKind::StructuredData,
        AnalyzerKind::Performance,
        AnalyzerKind::AeoGeo,
        AnalyzerKind::International,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnalyzerKind::Indexability => "indexability",
            AnalyzerKind::OnPage => "on_page",
            AnalyzerKind::Security => "security",
            AnalyzerKind::Architecture => "architecture",
            AnalyzerKind::StructuredData => "structured_data",
            AnalyzerKind::Performance => "performance",
            AnalyzerKind::AeoGeo => "aeo_geo",
            AnalyzerKind::International => "international",
        }
    }

    pub fn analyze(&self, input: &AnalyzerInput) -> Vec<Issue> {
        match self {
            AnalyzerKind::Indexability => indexability::analyze(input),
            AnalyzerKind::OnPage => on_page::analyze(input),
            AnalyzerKind::Security => security::analyze(input),
            AnalyzerKind::Architecture => architecture::analyze(input),
            AnalyzerKind::StructuredData => structured_data::analyze(input),
            AnalyzerKind::Performance => performance::analyze(input),
            AnalyzerKind::AeoGeo => aeo_geo::analyze(input),
            AnalyzerKind::International => international::analyze(input),
        }
    }
}

/// Issues of every analyzer, grouped by analyzer
#[derive(Debug, Clone, Default)]
pub struct Findings {
    groups: HashMap<AnalyzerKind, Vec<Issue>>,
}

impl Findings {
    pub fn insert(&mut self, kind: AnalyzerKind, issues: Vec<Issue>) {
        self.groups.insert(kind, issues);
    }

    pub fn get(&self, kind: AnalyzerKind) -> &[Issue] {
        self.groups.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every issue, in analyzer order
    pub fn all(&self) -> Vec<Issue> {
        AnalyzerKind::ALL
            .iter()
            .flat_map(|kind| self.get(*kind).iter().cloned())
            .collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.groups
            .values()
            .flatten()
            .filter(|issue| issue.severity == severity)
            .count()
    }

    pub fn total(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Run all analyzers in parallel on the blocking pool.
/// One failing analyzer fails the whole stage.
pub async fn run_all(input: Arc<AnalyzerInput>) -> Result<Findings> {
    let tasks = AnalyzerKind::ALL.into_iter().map(|kind| {
        let input = input.clone();
        async move {
            let issues = tokio::task::spawn_blocking(move || kind.analyze(&input))
                .await
                .context(format!("Analyzer {} failed", kind.name()))?;
            debug!(analyzer = kind.name(), issues = issues.len(), "Analyzer finished");
            Ok::<_, anyhow::Error>((kind, issues))
        }
    });

    let mut findings = Findings::default();
    for (kind, issues) in try_join_all(tasks).await? {
        findings.insert(kind, issues);
    }

    Ok(findings)
}

/// Lowercased URL path, `None` for unparseable URLs
pub(crate) fn lowercase_path(url: &str) -> Option<String> {
    Url::parse(url).ok().map(|u| u.path().to_lowercase())
}

pub(crate) fn scheme_of(url: &str) -> Option<String> {
    Url::parse(url).ok().map(|u| u.scheme().to_string())
}

/// Whether the lowercased path of `url` contains any of `patterns`
pub(crate) fn path_contains_any(url: &str, patterns: &[&str]) -> bool {
    lowercase_path(url).map_or(false, |path| patterns.iter().any(|p| path.contains(p)))
}

/// Drop repeated URLs, keeping first occurrences
pub(crate) fn dedup_urls(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(normalize_url(url)))
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::crawler::page::{CrawledPage, HreflangEntry, LinkData, RedirectHop};

    /// A healthy, indexable 200 page at depth 1
    pub fn page(url: &str) -> CrawledPage {
        let mut page = CrawledPage::redirect_only(url, Vec::new(), 120, 1);
        page.status_code = 200;
        page.content_type = "text/html; charset=utf-8".to_string();
        page.title = Some(format!("A descriptive page title for {}", url));
        page.meta_description = Some(format!("Description of {}", url));
        page.canonical = Some(url.to_string());
        page.meta_robots = Some("index, follow, max-image-preview:large".to_string());
        page.max_image_preview = Some("large".to_string());
        page.h1 = vec![format!("Heading of {}", url)];
        page.word_count = 450;
        page
    }

    pub fn homepage(url: &str) -> CrawledPage {
        let mut page = page(url);
        page.crawl_depth = 0;
        page
    }

    pub fn link(href: &str) -> LinkData {
        LinkData {
            href: href.to_string(),
            anchor_text: "link".to_string(),
            is_nofollow: false,
        }
    }

    pub fn hop(from: &str, to: &str, status_code: u16) -> RedirectHop {
        RedirectHop {
            from: from.to_string(),
            to: to.to_string(),
            status_code,
        }
    }

    pub fn hreflang(lang: &str, href: &str) -> HreflangEntry {
        HreflangEntry {
            lang: lang.to_string(),
            href: href.to_string(),
        }
    }
}
