use std::collections::HashSet;

use crate::analyzers::{scheme_of, AnalyzerInput, Issue, Severity};
use crate::crawler::page::CrawledPage;
use crate::crawler::scheduler::normalize_url;

/// Redirect chains longer than this are flagged
const MAX_REDIRECT_HOPS: usize = 2;

/// HTTPS, mixed content and redirect hygiene
pub fn analyze(input: &AnalyzerInput) -> Vec<Issue> {
    let mut issues = Vec::new();

    let is_scheme = |url: &str, scheme: &str| scheme_of(url).as_deref() == Some(scheme);

    let http_pages: Vec<String> = input
        .pages
        .iter()
        .filter(|p| is_scheme(&p.final_url, "http"))
        .map(|p| p.final_url.clone())
        .collect();
    if !http_pages.is_empty() {
        issues.push(Issue::new(
            Severity::Critical,
            "Stránky dostupné přes HTTP (bez HTTPS)",
            format!(
                "{} stránek je dostupných přes nezabezpečený protokol HTTP. Google penalizuje HTTP stránky a prohlížeče zobrazují varování.",
                http_pages.len()
            ),
            http_pages,
            "Nasaďte HTTPS certifikát a nastavte přesměrování ze všech HTTP URL na HTTPS.",
        ));
    }

    // HTTP images or links on an HTTPS page
    let mixed: Vec<String> = input
        .valid_pages()
        .filter(|p| is_scheme(&p.final_url, "https"))
        .filter(|p| {
            p.images.iter().any(|img| is_scheme(&img.src, "http"))
                || p.external_links.iter().any(|link| is_scheme(&link.href, "http"))
        })
        .map(|p| p.final_url.clone())
        .collect();
    if !mixed.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Mixed content (HTTP resources na HTTPS stránce)",
            format!(
                "{} HTTPS stránek načítá zdroje přes nezabezpečený HTTP. Prohlížeče mohou tyto zdroje blokovat.",
                mixed.len()
            ),
            mixed,
            "Aktualizujte všechny URL zdrojů (obrázky, skripty, CSS) na HTTPS verze.",
        ));
    }

    // Response headers are not kept, so HSTS can only be a reminder
    if let Some(first_https) = input.valid_pages().find(|p| is_scheme(&p.final_url, "https")) {
        issues.push(Issue::new(
            Severity::Info,
            "Ověřte HSTS header",
            "Strict-Transport-Security (HSTS) header zajistí, že prohlížeče budou vždy používat HTTPS. Nelze ověřit z crawl dat, zkontrolujte manuálně.",
            vec![first_https.final_url.clone()],
            "Přidejte header Strict-Transport-Security: max-age=31536000; includeSubDomains na server.",
        ));
    }

    let long_chains: Vec<String> = input
        .pages
        .iter()
        .filter(|p| p.redirect_chain.len() > MAX_REDIRECT_HOPS)
        .map(|p| p.url.clone())
        .collect();
    if !long_chains.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Dlouhé řetězce přesměrování (> 2 hopy)",
            format!(
                "{} URL má více než 2 přesměrování v řadě. Dlouhé řetězce zpomalují načítání a plýtvají crawl budgetem.",
                long_chains.len()
            ),
            long_chains,
            "Zkraťte přesměrovací řetězce. Každá URL by měla směřovat přímo na finální cíl jedním přesměrováním.",
        ));
    }

    let loops: Vec<String> = input
        .pages
        .iter()
        .filter(|p| has_redirect_loop(p))
        .map(|p| p.url.clone())
        .collect();
    if !loops.is_empty() {
        issues.push(Issue::new(
            Severity::Critical,
            "Smyčka přesměrování (redirect loop)",
            format!(
                "{} URL vytváří smyčku přesměrování. Stránka se nikdy nenačte a vyhledávače ji nemohou indexovat.",
                loops.len()
            ),
            loops,
            "Opravte přesměrovací pravidla na serveru tak, aby nevznikaly cykly.",
        ));
    }

    let temporary: Vec<String> = input
        .pages
        .iter()
        .filter(|p| p.redirect_chain.iter().any(|hop| hop.status_code == 302))
        .map(|p| p.url.clone())
        .collect();
    if !temporary.is_empty() {
        issues.push(Issue::new(
            Severity::Info,
            "Použití 302 místo 301 přesměrování",
            format!(
                "{} URL používá dočasné přesměrování (302) místo trvalého (301). Vyhledávače nemusí přenést link equity na cílovou URL.",
                temporary.len()
            ),
            temporary,
            "Pokud je přesměrování trvalé, změňte status code z 302 na 301 pro správný přenos link juice.",
        ));
    }

    issues
}

/// A hop lands on a URL the chain already left from, or a multi-hop
/// chain ends where it started.
pub fn has_redirect_loop(page: &CrawledPage) -> bool {
    if page.redirect_chain.is_empty() {
        return false;
    }

    let mut departed = HashSet::new();
    for hop in &page.redirect_chain {
        departed.insert(normalize_url(&hop.from));
        if departed.contains(&normalize_url(&hop.to)) {
            return true;
        }
    }

    page.redirect_chain.len() > 1 && normalize_url(&page.final_url) == normalize_url(&page.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::fixtures::*;
    use crate::crawler::page::RedirectHop;

    fn find<'a>(issues: &'a [Issue], title: &str) -> Option<&'a Issue> {
        issues.iter().find(|i| i.title == title)
    }

    fn node(i: usize) -> String {
        format!("https://example.com/n{}", i)
    }

    /// Chain that walks `prefix` nodes, then cycles through `cycle` nodes
    /// until it re-enters the cycle start
    fn looping_chain(prefix: usize, cycle: usize) -> Vec<RedirectHop> {
        let path: Vec<String> = (0..prefix + cycle).map(node).collect();
        let mut chain = Vec::new();
        for pair in path.windows(2) {
            chain.push(hop(&pair[0], &pair[1], 301));
        }
        let last = &path[prefix + cycle - 1];
        chain.push(hop(last, &path[prefix], 301));
        chain
    }

    fn redirected_page(chain: Vec<RedirectHop>) -> CrawledPage {
        let url = chain[0].from.clone();
        let mut page = CrawledPage::redirect_only(&url, chain, 50, 1);
        page.status_code = 301;
        page
    }

    #[test]
    fn test_every_loop_shape_is_detected() {
        for prefix in 0..6 {
            for cycle in 1..8 {
                let page = redirected_page(looping_chain(prefix, cycle));
                assert!(
                    has_redirect_loop(&page),
                    "missed loop with prefix {} and cycle {}",
                    prefix,
                    cycle
                );

                let issues = analyze(&AnalyzerInput {
                    pages: vec![page],
                    ..AnalyzerInput::default()
                });
                let found = find(&issues, "Smyčka přesměrování (redirect loop)").unwrap();
                assert_eq!(found.severity, Severity::Critical);
            }
        }
    }

    #[test]
    fn test_acyclic_chains_are_not_loops() {
        for hops in 1..10 {
            let path: Vec<String> = (0..=hops).map(node).collect();
            let chain: Vec<RedirectHop> = path.windows(2).map(|w| hop(&w[0], &w[1], 301)).collect();
            let mut page = redirected_page(chain);
            page.status_code = 200;
            assert!(!has_redirect_loop(&page), "false loop for {} hops", hops);
        }
    }

    #[test]
    fn test_three_hop_chain_is_only_a_warning() {
        let mut target = page("https://example.com/final");
        target.url = "https://example.com/a".to_string();
        target.redirect_chain = vec![
            hop("https://example.com/a", "https://example.com/b", 301),
            hop("https://example.com/b", "https://example.com/c", 301),
            hop("https://example.com/c", "https://example.com/final", 301),
        ];

        let issues = analyze(&AnalyzerInput {
            pages: vec![target],
            ..AnalyzerInput::default()
        });

        let chain = find(&issues, "Dlouhé řetězce přesměrování (> 2 hopy)").unwrap();
        assert_eq!(chain.severity, Severity::Warning);
        assert_eq!(chain.affected_urls, vec!["https://example.com/a"]);
        assert!(issues.iter().all(|i| i.severity != Severity::Critical));
    }

    #[test]
    fn test_http_mixed_content_and_302() {
        let mut plain = page("http://example.com/old");
        plain.url = "http://example.com/old".to_string();

        let mut mixed = page("https://example.com/gallery");
        mixed.external_links = vec![link("http://partner.org/")];

        let mut temporary = page("https://example.com/promo");
        temporary.url = "https://example.com/sale".to_string();
        temporary.redirect_chain = vec![hop("https://example.com/sale", "https://example.com/promo", 302)];

        let issues = analyze(&AnalyzerInput {
            pages: vec![plain, mixed, temporary],
            ..AnalyzerInput::default()
        });

        assert_eq!(
            find(&issues, "Stránky dostupné přes HTTP (bez HTTPS)").unwrap().affected_urls,
            vec!["http://example.com/old"]
        );
        assert_eq!(
            find(&issues, "Mixed content (HTTP resources na HTTPS stránce)").unwrap().affected_urls,
            vec!["https://example.com/gallery"]
        );
        assert_eq!(
            find(&issues, "Ověřte HSTS header").unwrap().affected_urls,
            vec!["https://example.com/gallery"]
        );
        assert_eq!(
            find(&issues, "Použití 302 místo 301 přesměrování").unwrap().affected_urls,
            vec!["https://example.com/sale"]
        );
    }
}
