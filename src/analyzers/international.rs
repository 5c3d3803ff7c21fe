use regex::Regex;
use std::collections::HashMap;

use crate::analyzers::{AnalyzerInput, Issue, Severity};
use crate::crawler::page::{CrawledPage, HreflangEntry};
use crate::crawler::scheduler::normalize_url;

/// Language with an optional region or script subtag: `cs`, `en-US`, `zh-Hans`
const LANG_CODE_PATTERN: &str = r"^[a-z]{2,3}(-[A-Za-z]{2,4})?$";

/// Hreflang annotations; silent on sites without any
pub fn analyze(input: &AnalyzerInput) -> Vec<Issue> {
    let mut issues = Vec::new();

    let annotated: Vec<&CrawledPage> = input
        .valid_pages()
        .filter(|p| !p.hreflang.is_empty())
        .collect();
    if annotated.is_empty() {
        return issues;
    }

    let alternates: HashMap<String, &[HreflangEntry]> = annotated
        .iter()
        .map(|p| (normalize_url(&p.final_url), p.hreflang.as_slice()))
        .collect();
    let by_url = input.pages_by_url();

    let non_reciprocal: Vec<String> = annotated
        .iter()
        .filter(|page| {
            let own = normalize_url(&page.final_url);
            page.hreflang.iter().any(|entry| {
                let target = normalize_url(&entry.href);
                if target == own {
                    return false;
                }
                alternates.get(&target).map_or(true, |entries| {
                    !entries.iter().any(|back| normalize_url(&back.href) == own)
                })
            })
        })
        .map(|p| p.final_url.clone())
        .collect();
    if !non_reciprocal.is_empty() {
        issues.push(Issue::new(
            Severity::Critical,
            "Nereciproční hreflang tagy",
            format!(
                "{} stránek má hreflang tagy, které nesměřují zpět (nejsou reciproční). Google může nereciproční hreflang ignorovat.",
                non_reciprocal.len()
            ),
            non_reciprocal,
            "Zajistěte, aby každý hreflang tag měl odpovídající protějšek: stránka A odkazuje na B a B musí odkazovat zpět na A.",
        ));
    }

    let bad_targets: Vec<String> = annotated
        .iter()
        .filter(|page| {
            page.hreflang.iter().any(|entry| {
                by_url.get(&normalize_url(&entry.href)).map_or(false, |target| {
                    !target.is_ok() || !target.redirect_chain.is_empty()
                })
            })
        })
        .map(|p| p.final_url.clone())
        .collect();
    if !bad_targets.is_empty() {
        issues.push(Issue::new(
            Severity::Critical,
            "Hreflang směřuje na 404 nebo redirect",
            format!(
                "{} stránek má hreflang odkazující na stránku, která vrací chybu nebo přesměrovává. Vyhledávače tuto hreflang vazbu ignorují.",
                bad_targets.len()
            ),
            bad_targets,
            "Aktualizujte hreflang tagy tak, aby směřovaly na finální, dostupné (200 OK) stránky bez přesměrování.",
        ));
    }

    let without_default: Vec<String> = annotated
        .iter()
        .filter(|p| !p.hreflang.iter().any(is_x_default))
        .map(|p| p.final_url.clone())
        .collect();
    if !without_default.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Chybějící hreflang x-default",
            format!(
                "{} stránek s hreflang tagy nemá x-default fallback. Vyhledávače pak neví, kterou verzi zobrazit uživatelům mimo definované jazyky.",
                without_default.len()
            ),
            without_default,
            "Přidejte hreflang x-default tag odkazující na hlavní jazykovou verzi stránky.",
        ));
    }

    if let Ok(lang_code) = Regex::new(LANG_CODE_PATTERN) {
        let invalid_codes: Vec<String> = annotated
            .iter()
            .filter(|p| {
                p.hreflang
                    .iter()
                    .filter(|e| !is_x_default(e))
                    .any(|e| !lang_code.is_match(&e.lang))
            })
            .map(|p| p.final_url.clone())
            .collect();
        if !invalid_codes.is_empty() {
            issues.push(Issue::new(
                Severity::Warning,
                "Neplatné jazykové kódy v hreflang",
                format!(
                    "{} stránek má hreflang tagy s neplatnými jazykovými kódy. Vyhledávače neplatné kódy ignorují.",
                    invalid_codes.len()
                ),
                invalid_codes,
                "Používejte platné ISO 639-1 kódy jazyka (cs, en, de) a volitelně ISO 3166-1 kódy regionu (cs-CZ, en-US, de-AT).",
            ));
        }
    }

    issues
}

fn is_x_default(entry: &HreflangEntry) -> bool {
    entry.lang.eq_ignore_ascii_case("x-default")
}
