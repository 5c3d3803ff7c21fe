use url::Url;

use crate::analyzers::{dedup_urls, AnalyzerInput, Issue, Severity};
use crate::crawler::scheduler::normalize_url;

const MIN_INLINKS: usize = 3;
const MAX_PATH_LENGTH: usize = 115;

/// Click depth, internal linking and URL shape
pub fn analyze(input: &AnalyzerInput) -> Vec<Issue> {
    let mut issues = Vec::new();

    let too_deep: Vec<String> = input
        .valid_pages()
        .filter(|p| p.crawl_depth > 5)
        .map(|p| p.final_url.clone())
        .collect();
    if !too_deep.is_empty() {
        issues.push(Issue::new(
            Severity::Critical,
            "Stránky s click depth > 5",
            format!(
                "{} stránek vyžaduje více než 5 kliknutí z homepage. Vyhledávače mohou tyto stránky považovat za méně důležité.",
                too_deep.len()
            ),
            too_deep,
            "Zkraťte cestu k důležitým stránkám, přidejte interní odkazy z vyšších úrovní navigace.",
        ));
    }

    let deep: Vec<String> = input
        .valid_pages()
        .filter(|p| p.crawl_depth == 5)
        .map(|p| p.final_url.clone())
        .collect();
    if !deep.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Důležité stránky s click depth > 4",
            format!(
                "{} stránek vyžaduje více než 4 kliknutí z homepage. Ideální click depth pro důležité stránky je max 3-4.",
                deep.len()
            ),
            deep,
            "Zvažte přidání odkazů z hlavní navigace, kategorických stránek nebo sidebaru.",
        ));
    }

    // In the sitemap and crawled, but no crawled page links to it
    let inlinks = input.inlink_counts();
    let by_url = input.pages_by_url();
    let orphans: Vec<String> = dedup_urls(
        input
            .sitemap_urls
            .iter()
            .filter_map(|u| {
                let key = normalize_url(u);
                let page = by_url.get(&key)?;
                (!inlinks.contains_key(&key)).then(|| page.final_url.clone())
            })
            .collect(),
    );
    if !orphans.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Osiřelé stránky (orphan pages)",
            format!(
                "{} stránek je v sitemapě, ale žádná jiná stránka na ně neodkazuje interním linkem. Vyhledávače je mohou považovat za méně důležité.",
                orphans.len()
            ),
            orphans,
            "Přidejte interní odkazy na tyto stránky z relevantních souvisejících stránek.",
        ));
    }

    let weakly_linked: Vec<String> = input
        .valid_pages()
        .filter(|p| {
            inlinks.get(&normalize_url(&p.final_url)).copied().unwrap_or(0) < MIN_INLINKS
        })
        .map(|p| p.final_url.clone())
        .collect();
    if !weakly_linked.is_empty() {
        issues.push(Issue::new(
            Severity::Info,
            "Stránky s méně než 3 interními odkazy",
            format!(
                "{} stránek má méně než 3 příchozí interní odkazy. Nízký počet interních odkazů snižuje PageRank a viditelnost stránky.",
                weakly_linked.len()
            ),
            weakly_linked,
            "Přidejte interní odkazy z tematicky příbuzných stránek. Zvažte sekce 'Související články' nebo kontextové odkazy v obsahu.",
        ));
    }

    let parsed: Vec<(String, Url, bool)> = input
        .valid_pages()
        .filter_map(|p| {
            Url::parse(&p.final_url)
                .ok()
                .map(|u| (p.final_url.clone(), u, p.canonical.is_some()))
        })
        .collect();

    let params_without_canonical: Vec<String> = parsed
        .iter()
        .filter(|(_, u, has_canonical)| u.query().map_or(false, |q| !q.is_empty()) && !has_canonical)
        .map(|(url, _, _)| url.clone())
        .collect();
    if !params_without_canonical.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "URL s parametry bez canonical tagu",
            format!(
                "{} URL obsahuje query parametry, ale nemá canonical tag. Může vzniknout duplicitní obsah.",
                params_without_canonical.len()
            ),
            params_without_canonical,
            "Přidejte canonical tag na všechny URL s parametry. Canonical by měl směřovat na čistou verzi URL bez parametrů.",
        ));
    }

    let mixed_case: Vec<String> = parsed
        .iter()
        .filter(|(_, u, _)| u.path() != u.path().to_lowercase())
        .map(|(url, _, _)| url.clone())
        .collect();
    if !mixed_case.is_empty() {
        issues.push(Issue::new(
            Severity::Info,
            "URL nejsou v lowercase",
            format!(
                "{} URL obsahuje velká písmena. Velká a malá písmena v URL mohou vést k duplicitnímu obsahu.",
                mixed_case.len()
            ),
            mixed_case,
            "Převeďte všechny URL na lowercase a nastavte 301 přesměrování z verzí s velkými písmeny.",
        ));
    }

    let long_paths: Vec<String> = parsed
        .iter()
        .filter(|(_, u, _)| u.path().chars().count() > MAX_PATH_LENGTH)
        .map(|(url, _, _)| url.clone())
        .collect();
    if !long_paths.is_empty() {
        issues.push(Issue::new(
            Severity::Info,
            "URL delší než 115 znaků",
            format!(
                "{} URL má cestu delší než 115 znaků. Příliš dlouhé URL jsou hůře sdílitelné a mohou být oříznuty ve výsledcích vyhledávání.",
                long_paths.len()
            ),
            long_paths,
            "Zkraťte URL cesty, používejte stručné, popisné slugy bez zbytečných slov a parametrů.",
        ));
    }

    issues
}
