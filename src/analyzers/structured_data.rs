use serde_json::Value;
use std::collections::HashSet;

use crate::analyzers::{path_contains_any, AnalyzerInput, Issue, Severity};
use crate::crawler::page::CrawledPage;

pub(crate) const ARTICLE_PATTERNS: &[&str] = &[
    "/blog",
    "/clanek",
    "/clanky",
    "/article",
    "/posts",
    "/aktuality",
    "/novinky",
];
const FAQ_PATTERNS: &[&str] = &["/faq", "/casto-kladene", "/otazky", "/frequently"];
const PRODUCT_PATTERNS: &[&str] = &["/produkt", "/product", "/zbozi", "/eshop", "/shop"];
const ARTICLE_TYPES: &[&str] = &["Article", "BlogPosting", "NewsArticle"];

/// Maximum number of URLs listed for site-wide breadcrumb findings
const BREADCRUMB_SAMPLE: usize = 20;

/// Schema.org coverage of the crawled pages
pub fn analyze(input: &AnalyzerInput) -> Vec<Issue> {
    let valid: Vec<&CrawledPage> = input.valid_pages().collect();
    if valid.is_empty() {
        return Vec::new();
    }

    let mut issues = Vec::new();
    let page_types: Vec<(&CrawledPage, HashSet<String>)> =
        valid.iter().map(|p| (*p, schema_types(p))).collect();
    let site_types: HashSet<&str> = page_types
        .iter()
        .flat_map(|(_, types)| types.iter().map(String::as_str))
        .collect();

    if !site_types.contains("Organization") && !site_types.contains("LocalBusiness") {
        let affected = input
            .homepage()
            .map(|p| vec![p.final_url.clone()])
            .unwrap_or_default();
        issues.push(Issue::new(
            Severity::Warning,
            "Chybějící Organization schema",
            "Web nemá Organization ani LocalBusiness schema. Vyhledávače nemají strukturované informace o firmě.",
            affected,
            "Přidejte na homepage JSON-LD Organization (nebo LocalBusiness) s názvem, logem, kontakty a odkazy na sociální sítě.",
        ));
    }

    let deep_pages: Vec<&(&CrawledPage, HashSet<String>)> =
        page_types.iter().filter(|(p, _)| p.crawl_depth >= 2).collect();
    if !deep_pages.is_empty() && !site_types.contains("BreadcrumbList") {
        let affected: Vec<String> = deep_pages
            .iter()
            .filter(|(_, types)| !types.contains("BreadcrumbList"))
            .take(BREADCRUMB_SAMPLE)
            .map(|(p, _)| p.final_url.clone())
            .collect();
        issues.push(Issue::new(
            Severity::Warning,
            "Chybějící BreadcrumbList schema",
            "Web nepoužívá BreadcrumbList schema. Drobečková navigace ve výsledcích vyhledávání zlepšuje CTR.",
            affected,
            "Implementujte BreadcrumbList JSON-LD na všech stránkách pod homepage.",
        ));
    }

    let missing_for = |patterns: &[&str], accepted: &[&str]| -> Vec<String> {
        page_types
            .iter()
            .filter(|(p, _)| path_contains_any(&p.final_url, patterns))
            .filter(|(_, types)| !accepted.iter().any(|t| types.contains(*t)))
            .map(|(p, _)| p.final_url.clone())
            .collect()
    };

    let articles = missing_for(ARTICLE_PATTERNS, ARTICLE_TYPES);
    if !articles.is_empty() {
        issues.push(Issue::new(
            Severity::Info,
            "Blogové stránky bez Article/BlogPosting schema",
            format!("{} blogových stránek nemá Article ani BlogPosting schema.", articles.len()),
            articles,
            "Přidejte Article nebo BlogPosting JSON-LD s autorem, datem publikace a obrázkem.",
        ));
    }

    let faqs = missing_for(FAQ_PATTERNS, &["FAQPage"]);
    if !faqs.is_empty() {
        issues.push(Issue::new(
            Severity::Info,
            "FAQ stránky bez FAQPage schema",
            format!("{} FAQ stránek nemá FAQPage schema. Přichází o rozšířené výsledky ve vyhledávání.", faqs.len()),
            faqs,
            "Přidejte FAQPage JSON-LD se všemi otázkami a odpověďmi na stránce.",
        ));
    }

    let products = missing_for(PRODUCT_PATTERNS, &["Product"]);
    if !products.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Produktové stránky bez Product schema",
            format!(
                "{} produktových stránek nemá Product schema. Chybí cena, dostupnost a hodnocení ve výsledcích vyhledávání.",
                products.len()
            ),
            products,
            "Přidejte Product JSON-LD s názvem, cenou (Offer), dostupností a hodnocením (AggregateRating).",
        ));
    }

    let invalid: Vec<String> = valid
        .iter()
        .filter(|p| p.json_ld.iter().any(|block| !is_valid_block(block)))
        .map(|p| p.final_url.clone())
        .collect();
    if !invalid.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "JSON-LD s chybami",
            format!(
                "{} stránek obsahuje JSON-LD bez @type nebo s neplatným @context.",
                invalid.len()
            ),
            invalid,
            "Opravte JSON-LD bloky: každý musí mít @context odkazující na schema.org a @type. Ověřte je v Rich Results Testu.",
        ));
    }

    issues
}

/// Every schema.org type declared on a page, JSON-LD and microdata
pub fn schema_types(page: &CrawledPage) -> HashSet<String> {
    let mut types = HashSet::new();
    for block in &page.json_ld {
        collect_types(block, &mut types);
    }
    for item in &page.microdata {
        if let Some(item_type) = item.item_type.as_deref() {
            types.insert(strip_schema_prefix(item_type));
        }
    }
    types
}

fn collect_types(value: &Value, types: &mut HashSet<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_types(item, types);
            }
        }
        Value::Object(map) => {
            match map.get("@type") {
                Some(Value::String(t)) => {
                    types.insert(strip_schema_prefix(t));
                }
                Some(Value::Array(list)) => {
                    for t in list.iter().filter_map(Value::as_str) {
                        types.insert(strip_schema_prefix(t));
                    }
                }
                _ => {}
            }
            if let Some(graph) = map.get("@graph") {
                collect_types(graph, types);
            }
        }
        _ => {}
    }
}

fn strip_schema_prefix(item_type: &str) -> String {
    let trimmed = item_type.trim();
    trimmed
        .strip_prefix("https://schema.org/")
        .or_else(|| trimmed.strip_prefix("http://schema.org/"))
        .unwrap_or(trimmed)
        .to_string()
}

/// A block needs a type (directly or via `@graph`) and, when present,
/// a schema.org `@context`
fn is_valid_block(block: &Value) -> bool {
    let Value::Object(map) = block else {
        return block.as_array().map_or(false, |items| items.iter().all(is_valid_block));
    };

    if !map.contains_key("@type") && !map.contains_key("@graph") {
        return false;
    }

    match map.get("@context") {
        None => true,
        Some(Value::String(context)) => context.contains("schema.org"),
        Some(other) => other.to_string().contains("schema.org"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::fixtures::*;
    use crate::crawler::page::MicrodataItem;
    use serde_json::json;

    fn find<'a>(issues: &'a [Issue], title: &str) -> Option<&'a Issue> {
        issues.iter().find(|i| i.title == title)
    }

    #[test]
    fn test_types_from_graph_arrays_and_microdata() {
        let mut page = page("https://example.com/");
        page.json_ld = vec![
            json!({
                "@context": "https://schema.org",
                "@graph": [
                    {"@type": "Organization", "name": "Acme"},
                    {"@type": ["WebPage", "https://schema.org/FAQPage"]}
                ]
            }),
            json!([{"@type": "BreadcrumbList"}]),
        ];
        page.microdata = vec![MicrodataItem {
            item_type: Some("http://schema.org/Product".to_string()),
            properties: vec!["name".to_string()],
        }];

        let types = schema_types(&page);
        for expected in ["Organization", "WebPage", "FAQPage", "BreadcrumbList", "Product"] {
            assert!(types.contains(expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_no_pages_no_issues() {
        assert!(analyze(&AnalyzerInput::default()).is_empty());
    }

    #[test]
    fn test_site_without_schema() {
        let mut deep = page("https://example.com/blog/post");
        deep.crawl_depth = 2;
        let input = AnalyzerInput {
            pages: vec![
                homepage("https://example.com/"),
                deep,
                page("https://example.com/produkt/chair"),
                page("https://example.com/faq"),
            ],
            ..AnalyzerInput::default()
        };
        let issues = analyze(&input);

        assert_eq!(
            find(&issues, "Chybějící Organization schema").unwrap().affected_urls,
            vec!["https://example.com/"]
        );
        assert_eq!(
            find(&issues, "Chybějící BreadcrumbList schema").unwrap().affected_urls,
            vec!["https://example.com/blog/post"]
        );
        assert_eq!(
            find(&issues, "Blogové stránky bez Article/BlogPosting schema").unwrap().severity,
            Severity::Info
        );
        assert_eq!(
            find(&issues, "FAQ stránky bez FAQPage schema").unwrap().affected_urls,
            vec!["https://example.com/faq"]
        );
        assert_eq!(
            find(&issues, "Produktové stránky bez Product schema").unwrap().severity,
            Severity::Warning
        );
    }

    #[test]
    fn test_invalid_json_ld() {
        let mut home = homepage("https://example.com/");
        home.json_ld = vec![json!({"@context": "https://schema.org", "@type": "Organization"})];

        let mut untyped = page("https://example.com/a");
        untyped.json_ld = vec![json!({"@context": "https://schema.org", "name": "x"})];

        let mut wrong_context = page("https://example.com/b");
        wrong_context.json_ld = vec![json!({"@context": "https://example.org", "@type": "Thing"})];

        let issues = analyze(&AnalyzerInput {
            pages: vec![home, untyped, wrong_context],
            ..AnalyzerInput::default()
        });

        assert!(find(&issues, "Chybějící Organization schema").is_none());
        assert_eq!(
            find(&issues, "JSON-LD s chybami").unwrap().affected_urls,
            vec!["https://example.com/a", "https://example.com/b"]
        );
    }
}
