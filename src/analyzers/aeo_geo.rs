use serde_json::Value;
use url::Url;

use crate::analyzers::structured_data::ARTICLE_PATTERNS;
use crate::analyzers::{lowercase_path, path_contains_any, AnalyzerInput, Issue, Severity};
use crate::crawler::page::CrawledPage;
use crate::crawler::robots::RobotsRules;

/// AI crawlers whose exclusion is reported, with the vendor behind each
const AI_BOTS: &[(&str, &str)] = &[
    ("GPTBot", "OpenAI, ChatGPT"),
    ("ClaudeBot", "Anthropic, Claude"),
    ("PerplexityBot", "Perplexity AI"),
];

const ABOUT_PATTERNS: &[&str] = &[
    "/o-nas",
    "/about",
    "/about-us",
    "/o-firme",
    "/o-spolecnosti",
    "/tym",
    "/team",
];

const CONTENT_MIN_WORDS: usize = 300;
const CITATION_SAMPLE: usize = 20;

/// Visibility to answer engines and generative search
pub fn analyze(input: &AnalyzerInput) -> Vec<Issue> {
    let mut issues = Vec::new();
    let valid: Vec<&CrawledPage> = input.valid_pages().collect();

    if let Some(robots_txt) = input.robots_txt.as_deref() {
        let robots = RobotsRules::parse(robots_txt);
        for (bot, vendor) in AI_BOTS {
            if robots.blocks_entire_site(bot) {
                issues.push(Issue::new(
                    Severity::Warning,
                    format!("{} blokován v robots.txt", bot),
                    format!(
                        "robots.txt blokuje {} ({}). Web nebude zahrnut v AI odpovědích a vyhledávání tohoto poskytovatele.",
                        bot, vendor
                    ),
                    Vec::new(),
                    format!("Zvažte povolení {} pro lepší viditelnost v AI odpovědích.", bot),
                ));
            }
        }
    }

    let llms_txt_crawled = input.pages.iter().any(|p| {
        Url::parse(&p.final_url).map_or(false, |u| u.path() == "/llms.txt")
    });
    if !input.llms_txt_found && !llms_txt_crawled {
        let affected = input
            .homepage()
            .map(|p| vec![p.final_url.clone()])
            .unwrap_or_default();
        issues.push(Issue::new(
            Severity::Info,
            "Chybějící llms.txt",
            "Web nemá soubor llms.txt. Tento soubor pomáhá AI modelům porozumět obsahu a struktuře webu pro přesnější odpovědi.",
            affected,
            "Vytvořte soubor /llms.txt s popisem webu, jeho účelu, klíčových stránek a preferovaného formátu citací.",
        ));
    }

    let without_author: Vec<String> = valid
        .iter()
        .filter(|p| path_contains_any(&p.final_url, ARTICLE_PATTERNS))
        .filter(|p| !p.json_ld.iter().any(has_author))
        .map(|p| p.final_url.clone())
        .collect();
    if !without_author.is_empty() {
        issues.push(Issue::new(
            Severity::Info,
            "Články bez author schema",
            format!(
                "{} článků nemá author informaci ve structured data. Author schema posiluje E-E-A-T signály pro AI a vyhledávače.",
                without_author.len()
            ),
            without_author,
            "Přidejte author property do Article/BlogPosting schema s name, url a případně sameAs odkazy na profesní profily.",
        ));
    }

    let has_about_page = valid.iter().any(|p| {
        lowercase_path(&p.final_url).map_or(false, |path| {
            ABOUT_PATTERNS
                .iter()
                .any(|about| path == *about || path == format!("{}/", about))
        })
    });
    if !has_about_page && valid.len() > 3 {
        issues.push(Issue::new(
            Severity::Info,
            "Chybějící 'O nás' stránka - slabé E-E-A-T signály",
            "Web nemá zřejmou stránku 'O nás'. Signály E-E-A-T (zkušenost, odbornost, autorita, důvěryhodnost) jsou důležité pro AI i tradiční vyhledávače.",
            Vec::new(),
            "Vytvořte stránku 'O nás' s informacemi o firmě, týmu, expertíze a referencích. Přidejte Organization schema.",
        ));
    }

    // Only reported when most content pages cite nothing
    let content_pages: Vec<&&CrawledPage> = valid
        .iter()
        .filter(|p| p.word_count >= CONTENT_MIN_WORDS && p.crawl_depth > 0)
        .collect();
    let uncited: Vec<String> = content_pages
        .iter()
        .filter(|p| p.external_links.is_empty())
        .map(|p| p.final_url.clone())
        .collect();
    if !content_pages.is_empty() && uncited.len() * 2 > content_pages.len() {
        issues.push(Issue::new(
            Severity::Info,
            "Obsahové stránky bez externích citací",
            format!(
                "{} z {} obsahových stránek nemá žádné externí odkazy. Citace autoritativních zdrojů posilují důvěryhodnost obsahu.",
                uncited.len(),
                content_pages.len()
            ),
            uncited.into_iter().take(CITATION_SAMPLE).collect(),
            "Přidejte odkazy na relevantní autoritativní zdroje (studie, statistiky, oborové weby). Citace pomáhají AI modelům ověřit informace.",
        ));
    }

    issues
}

/// `author` on the block itself or on any `@graph` node
fn has_author(block: &Value) -> bool {
    if block.get("author").map_or(false, |a| !a.is_null()) {
        return true;
    }

    block
        .get("@graph")
        .and_then(Value::as_array)
        .map_or(false, |graph| graph.iter().any(|node| node.get("author").is_some()))
}
