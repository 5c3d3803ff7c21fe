use std::collections::HashMap;

use crate::analyzers::{AnalyzerKind, Findings, Issue, Severity};
use crate::crawler::page::CrawledPage;
use crate::report::{
    overall_score, AiReport, AuditSummary, Categories, CategoryResult, PageResult,
    TechnicalAuditResult, AI_FALLBACK_TEXT, MAX_PAGE_RESULTS,
};

/// Everything the final report is built from
pub struct AssemblyInput<'a> {
    pub pages: &'a [CrawledPage],
    pub findings: &'a Findings,
    pub ai_report: Option<&'a AiReport>,
    pub crawl_duration_ms: u64,
}

/// Build the terminal job artifact
pub fn assemble(input: AssemblyInput<'_>) -> TechnicalAuditResult {
    let all_issues = input.findings.all();

    TechnicalAuditResult {
        summary: AuditSummary {
            total_pages_crawled: input.pages.len(),
            total_issues: all_issues.len(),
            critical_count: input.findings.count(Severity::Critical),
            warning_count: input.findings.count(Severity::Warning),
            info_count: input.findings.count(Severity::Info),
            overall_score: overall_score(&all_issues, input.pages.len()),
            crawl_duration_ms: input.crawl_duration_ms,
        },
        categories: build_categories(input.findings),
        pages: build_page_results(input.pages, &all_issues),
        ai_recommendations: ai_recommendations_text(input.ai_report),
    }
}

/// Map analyzer groups onto the report categories
pub fn build_categories(findings: &Findings) -> Categories {
    let select = |kind: AnalyzerKind, keep: fn(&Issue) -> bool| -> CategoryResult {
        CategoryResult::new(findings.get(kind).iter().filter(|i| keep(i)).cloned().collect())
    };
    let whole = |kind: AnalyzerKind| CategoryResult::new(findings.get(kind).to_vec());

    let international = findings.get(AnalyzerKind::International);
    let mobile_friendliness = if international.is_empty() {
        whole(AnalyzerKind::AeoGeo)
    } else {
        CategoryResult::new(international.to_vec())
    };

    Categories {
        performance: whole(AnalyzerKind::Performance),
        indexability: whole(AnalyzerKind::Indexability),
        meta_tags: whole(AnalyzerKind::OnPage),
        structured_data: whole(AnalyzerKind::StructuredData),
        mobile_friendliness,
        core_web_vitals: select(AnalyzerKind::Performance, |i| {
            ["LCP", "INP", "CLS", "TTFB"].iter().any(|m| i.title.contains(m))
        }),
        internal_linking: whole(AnalyzerKind::Architecture),
        broken_links: CategoryResult::new(Vec::new()),
        redirects: select(AnalyzerKind::Security, |i| {
            let title = i.title.to_lowercase();
            title.contains("přesměrování")
                || title.contains("redirect")
                || i.title.contains("302")
                || i.title.contains("301")
        }),
        sitemap_robots: select(AnalyzerKind::Indexability, |i| {
            let title = i.title.to_lowercase();
            title.contains("sitemap") || title.contains("robots")
        }),
        security: whole(AnalyzerKind::Security),
    }
}

/// 200 pages, capped, each with the issues naming its final URL
pub fn build_page_results(pages: &[CrawledPage], issues: &[Issue]) -> Vec<PageResult> {
    let mut by_url: HashMap<&str, Vec<&Issue>> = HashMap::new();
    for issue in issues {
        for url in &issue.affected_urls {
            by_url.entry(url.as_str()).or_default().push(issue);
        }
    }

    pages
        .iter()
        .filter(|p| p.is_ok())
        .take(MAX_PAGE_RESULTS)
        .map(|p| PageResult {
            url: p.final_url.clone(),
            status_code: p.status_code,
            title: p.title.clone().unwrap_or_default(),
            meta_description: p.meta_description.clone().unwrap_or_default(),
            h1: p.h1.clone(),
            load_time_ms: p.response_time_ms,
            content_length: p.content_length,
            issues: by_url
                .get(p.final_url.as_str())
                .map(|list| list.iter().map(|i| (*i).clone()).collect())
                .unwrap_or_default(),
        })
        .collect()
}

/// Markdown rendering of the AI report, or the fixed fallback sentence
pub fn ai_recommendations_text(report: Option<&AiReport>) -> String {
    let Some(report) = report else {
        return AI_FALLBACK_TEXT.to_string();
    };

    let mut parts = vec!["## Executive Summary".to_string(), report.executive_summary.clone()];

    parts.push("\n## Akční plán".to_string());
    let tiers = [
        ("\n### Sprint 1 (Quick Wins + Top Critical)", &report.action_plan.sprint_1),
        ("\n### Sprint 2", &report.action_plan.sprint_2),
        ("\n### Backlog", &report.action_plan.backlog),
    ];
    for (heading, actions) in tiers {
        if actions.is_empty() {
            continue;
        }
        parts.push(heading.to_string());
        parts.extend(actions.iter().map(|action| format!("- {}", action)));
    }

    parts.push("\n## Hodnocení issues (Impact × Effort)".to_string());
    let mut scored: Vec<_> = report.scored_issues.iter().collect();
    scored.sort_by(|a, b| b.impact.cmp(&a.impact).then(a.effort.cmp(&b.effort)));
    for issue in scored {
        parts.push(format!(
            "- **{}** [{}] - Impact: {}/5, Effort: {}/5 → {}",
            issue.title,
            issue.severity.as_str().to_uppercase(),
            issue.impact,
            issue.effort,
            issue.quadrant.label()
        ));
    }

    parts.push("\n## Doporučení".to_string());
    parts.push(report.recommendations_text.clone());

    parts.join("\n")
}
