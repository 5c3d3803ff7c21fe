pub mod assembly;
pub mod compiler;
pub mod prompt;

use serde::{Deserialize, Serialize};

use crate::analyzers::{Issue, Severity};

// Re-export common types
pub use assembly::{assemble, AssemblyInput};
pub use compiler::{AiReport, CompileError, Quadrant, ReportCompiler, ScoredIssue};
pub use prompt::CrawlStats;

/// Shown instead of the AI text when no AI report exists
pub const AI_FALLBACK_TEXT: &str =
    "AI analýza nebyla k dispozici. Report obsahuje pouze automaticky detekované issues.";

/// At most this many pages are listed in the result
pub const MAX_PAGE_RESULTS: usize = 100;

/// Terminal artifact of a technical audit job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalAuditResult {
    pub summary: AuditSummary,
    pub categories: Categories,
    pub pages: Vec<PageResult>,
    pub ai_recommendations: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_pages_crawled: usize,
    pub total_issues: usize,
    pub critical_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub overall_score: u32,
    pub crawl_duration_ms: u64,
}

/// Score and issues of one report category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub score: u32,
    pub issues: Vec<Issue>,
}

impl CategoryResult {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self {
            score: category_score(&issues),
            issues,
        }
    }
}

/// The fixed report categories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Categories {
    pub performance: CategoryResult,
    pub indexability: CategoryResult,
    pub meta_tags: CategoryResult,
    pub structured_data: CategoryResult,
    pub mobile_friendliness: CategoryResult,
    pub core_web_vitals: CategoryResult,
    pub internal_linking: CategoryResult,
    pub broken_links: CategoryResult,
    pub redirects: CategoryResult,
    pub sitemap_robots: CategoryResult,
    pub security: CategoryResult,
}

/// One crawled 200 page with the issues that name it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub url: String,
    pub status_code: u16,
    pub title: String,
    pub meta_description: String,
    pub h1: Vec<String>,
    pub load_time_ms: u64,
    pub content_length: usize,
    pub issues: Vec<Issue>,
}

/// `100 - Σ penalty`, clamped to 0..=100
pub fn category_score(issues: &[Issue]) -> u32 {
    let penalty: u32 = issues.iter().map(|issue| issue.severity.penalty()).sum();
    100u32.saturating_sub(penalty)
}

/// Severity-weighted penalty, damped by the size of the site
pub fn overall_score(issues: &[Issue], total_pages: usize) -> u32 {
    if total_pages == 0 {
        return 0;
    }

    let count = |severity: Severity| issues.iter().filter(|i| i.severity == severity).count() as f64;
    let penalty =
        count(Severity::Critical) * 10.0 + count(Severity::Warning) * 3.0 + count(Severity::Info) * 0.5;
    let scale = ((total_pages + 1) as f64).log10().max(1.0);

    (100.0 - penalty / scale).round().clamp(0.0, 100.0) as u32
}
