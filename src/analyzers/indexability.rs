use std::collections::{HashMap, HashSet};
use url::Url;

use crate::analyzers::{AnalyzerInput, Issue, Severity};
use crate::crawler::page::CrawledPage;
use crate::crawler::robots::RobotsRules;
use crate::crawler::scheduler::normalize_url;

/// Robots, noindex, canonical and sitemap consistency
pub fn analyze(input: &AnalyzerInput) -> Vec<Issue> {
    let mut issues = Vec::new();

    let sitemap: HashSet<String> = input.sitemap_urls.iter().map(|u| normalize_url(u)).collect();
    let by_final_url = input.pages_by_url();

    // Noindex pages listed in the sitemap
    let noindex_in_sitemap: Vec<String> = input
        .pages
        .iter()
        .filter(|p| sitemap.contains(&normalize_url(&p.final_url)) && p.is_noindex())
        .map(|p| p.final_url.clone())
        .collect();
    if !noindex_in_sitemap.is_empty() {
        issues.push(Issue::new(
            Severity::Critical,
            "Noindex stránky v sitemapě",
            format!(
                "{} stránek má noindex tag, ale je v sitemap.xml. Vyhledávače dostávají protichůdné signály.",
                noindex_in_sitemap.len()
            ),
            noindex_in_sitemap,
            "Odstraňte tyto URL ze sitemapy, nebo odeberte noindex direktivu, pokud mají být indexovány.",
        ));
    }

    // Canonical targets that are broken, noindexed or redirected.
    // Self-references are left to the checks on the page itself.
    let bad_canonicals: Vec<String> = input
        .pages
        .iter()
        .filter(|p| !is_self_canonical(p))
        .filter(|p| {
            canonical_target(p, &by_final_url).map_or(false, |target| {
                !target.is_ok() || target.is_noindex() || !target.redirect_chain.is_empty()
            })
        })
        .map(|p| p.final_url.clone())
        .collect();
    if !bad_canonicals.is_empty() {
        issues.push(Issue::new(
            Severity::Critical,
            "Canonical odkazuje na 404, noindex nebo redirect",
            format!(
                "{} stránek má canonical tag směřující na stránku, která je nedostupná, noindexovaná nebo přesměrovaná.",
                bad_canonicals.len()
            ),
            bad_canonicals,
            "Aktualizujte canonical tagy tak, aby odkazovaly na finální, indexovatelné, 200 OK stránky.",
        ));
    }

    // Canonical chains: A -> B where B's canonical points elsewhere
    let chained: Vec<String> = input
        .pages
        .iter()
        .filter(|p| {
            let (Some(canonical), Some(target)) = (p.canonical.as_deref(), canonical_target(p, &by_final_url)) else {
                return false;
            };
            target
                .canonical
                .as_deref()
                .map_or(false, |next| normalize_url(next) != normalize_url(canonical))
        })
        .map(|p| p.final_url.clone())
        .collect();
    if !chained.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Řetězení canonical tagů",
            format!(
                "{} stránek má canonical tag, který odkazuje na stránku s jiným canonical, vzniká řetězení.",
                chained.len()
            ),
            chained,
            "Nastavte canonical tagy přímo na finální cílovou URL bez prostředníků.",
        ));
    }

    // Sitemap entries that do not answer 200 directly. Matched on the
    // requested URL so redirected entries are caught.
    let by_requested_url: HashMap<String, &CrawledPage> = input
        .pages
        .iter()
        .map(|p| (normalize_url(&p.url), p))
        .collect();
    let mut non_200 = Vec::new();
    let mut reported = HashSet::new();
    for sitemap_url in &input.sitemap_urls {
        let key = normalize_url(sitemap_url);
        let Some(page) = by_requested_url.get(&key).or_else(|| by_final_url.get(&key)) else {
            continue;
        };
        if (!page.is_ok() || !page.redirect_chain.is_empty()) && reported.insert(key) {
            non_200.push(page.url.clone());
        }
    }
    if !non_200.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Sitemap obsahuje non-200 URL",
            format!(
                "{} URL v sitemap.xml nevrací status 200 (přesměrování, 404, 5xx).",
                non_200.len()
            ),
            non_200,
            "Odstraňte ze sitemapy URL, které nevracejí 200 OK. Sitemap by měla obsahovat pouze kanonické, indexovatelné stránky.",
        ));
    }

    // Indexable pages without any canonical
    let missing_canonical: Vec<String> = input
        .valid_pages()
        .filter(|p| !p.is_noindex() && p.canonical.is_none())
        .map(|p| p.final_url.clone())
        .collect();
    if !missing_canonical.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Chybějící self-referencing canonical",
            format!(
                "{} indexovatelných stránek nemá canonical tag. Bez canonical hrozí duplikace obsahu.",
                missing_canonical.len()
            ),
            missing_canonical,
            "Přidejte na každou indexovatelnou stránku self-referencing canonical tag (<link rel='canonical' href='...' />).",
        ));
    }

    // Wildcard-group Disallow rules covering reachable pages
    if let Some(robots_txt) = input.robots_txt.as_deref() {
        let robots = RobotsRules::parse(robots_txt);
        let blocked: Vec<String> = input
            .valid_pages()
            .filter(|p| {
                Url::parse(&p.final_url)
                    .map_or(false, |u| robots.wildcard_disallows_path(u.path()))
            })
            .map(|p| p.final_url.clone())
            .collect();

        if !blocked.is_empty() {
            issues.push(Issue::new(
                Severity::Critical,
                "robots.txt blokuje důležité stránky",
                format!(
                    "{} dostupných stránek je blokováno v robots.txt. Vyhledávače je nebudou indexovat.",
                    blocked.len()
                ),
                blocked,
                "Zkontrolujte robots.txt a odstraňte Disallow pravidla pro stránky, které mají být indexovány.",
            ));
        }
    }

    issues
}

fn is_self_canonical(page: &CrawledPage) -> bool {
    page.canonical
        .as_deref()
        .map_or(false, |canonical| normalize_url(canonical) == normalize_url(&page.final_url))
}

/// The crawled page a canonical tag points at, if it was crawled
fn canonical_target<'a>(
    page: &CrawledPage,
    by_url: &HashMap<String, &'a CrawledPage>,
) -> Option<&'a CrawledPage> {
    let canonical = page.canonical.as_deref()?;
    by_url.get(&normalize_url(canonical)).copied()
}
