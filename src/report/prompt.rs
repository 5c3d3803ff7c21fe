use serde::Serialize;

use crate::analyzers::{Issue, Severity};

/// Fixed instructions for the reasoning model. Output is Czech, raw JSON.
pub const SYSTEM_PROMPT: &str = r#"Jsi senior SEO analytik v digitální marketingové agentuře.
Dostáváš strukturovaná crawl data a seznamy issues z automatizovaného technického SEO auditu.

Tvůj úkol:

1. Napiš executive summary (3 až 5 vět) o celkovém technickém SEO zdraví webu.
2. Ohodnoť každý issue na škále Impact (1-5) a Effort (1-5):
   - Impact: rozsah (globální šablona vs. jedna stránka), komerční relevance, vliv na AI vyhledávání
   - Effort: potřebná dev kapacita, obsahová náročnost, úroveň rizika
3. Přiřaď každý issue do kvadrantu:
   - quick_win (vysoký impact, nízký effort)
   - major_project (vysoký impact, vysoký effort)
   - fill_in (nízký impact, nízký effort)
   - time_waster (nízký impact, vysoký effort)
4. Vygeneruj prioritizovaný akční plán:
   - Sprint 1: Všechny Quick Wins + top 3 Critical Major Projects
   - Sprint 2: Zbývající Major Projects
   - Backlog: Fill-ins
   (Time Wastery vynech z akčního plánu)
5. Napiš akční doporučení v češtině.

DŮLEŽITÉ:
- Veškerý výstup MUSÍ být v ČEŠTINĚ.
- Odpověz POUZE validním JSON objektem, bez markdown code fences, bez komentářů.
- Formát odpovědi:
{
  "executive_summary": "...",
  "scored_issues": [
    {
      "title": "název issue",
      "severity": "critical|warning|info",
      "impact": 1-5,
      "effort": 1-5,
      "quadrant": "quick_win|major_project|fill_in|time_waster",
      "recommendation": "konkrétní doporučení"
    }
  ],
  "action_plan": {
    "sprint_1": ["akce 1", "akce 2"],
    "sprint_2": ["akce 3"],
    "backlog": ["akce 4"]
  },
  "recommendations_text": "Celkový text doporučení pro klienta..."
}"#;

/// Crawl figures the model sees
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlStats {
    pub domain: String,
    pub total_pages_crawled: usize,
    pub crawl_depth_used: u32,
    pub crawl_duration_ms: u64,
}

/// Issue as listed in the prompt; URLs are reduced to a count
#[derive(Debug, Serialize)]
struct PromptIssue<'a> {
    title: &'a str,
    severity: Severity,
    affected_count: usize,
    recommendation: &'a str,
}

#[derive(Debug, Default, Serialize)]
struct GroupedIssues<'a> {
    critical: Vec<PromptIssue<'a>>,
    warning: Vec<PromptIssue<'a>>,
    info: Vec<PromptIssue<'a>>,
}

/// User message: crawl stats, operator notes, counts, then issues grouped by severity
pub fn build_user_message(
    issues: &[Issue],
    stats: &CrawlStats,
    custom_instructions: Option<&str>,
) -> String {
    let mut parts = vec![format!(
        "## Crawl statistiky\n- Doména: {}\n- Celkem procrawlováno stránek: {}\n- Hloubka crawlu: {}\n- Doba crawlu: {}s",
        stats.domain,
        stats.total_pages_crawled,
        stats.crawl_depth_used,
        (stats.crawl_duration_ms as f64 / 1000.0).round()
    )];

    if let Some(notes) = custom_instructions.map(str::trim).filter(|n| !n.is_empty()) {
        parts.push(format!("\n## Kontext od klienta\n{}", notes));
    }

    let count = |severity: Severity| issues.iter().filter(|i| i.severity == severity).count();
    parts.push(format!(
        "\n## Souhrn issues\n- Celkem: {}\n- Critical: {}\n- Warning: {}\n- Info: {}",
        issues.len(),
        count(Severity::Critical),
        count(Severity::Warning),
        count(Severity::Info)
    ));

    let mut grouped = GroupedIssues::default();
    for issue in issues {
        let entry = PromptIssue {
            title: &issue.title,
            severity: issue.severity,
            affected_count: issue.affected_urls.len(),
            recommendation: &issue.recommendation,
        };
        match issue.severity {
            Severity::Critical => grouped.critical.push(entry),
            Severity::Warning => grouped.warning.push(entry),
            Severity::Info => grouped.info.push(entry),
        }
    }
    let grouped_json = serde_json::to_string_pretty(&grouped).unwrap_or_else(|_| "{}".to_string());
    parts.push(format!("\n## Issues podle kategorie\n{}", grouped_json));

    parts.join("\n")
}
