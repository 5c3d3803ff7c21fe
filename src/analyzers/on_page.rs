use std::collections::HashMap;

use crate::analyzers::{AnalyzerInput, Issue, Severity};
use crate::crawler::page::CrawledPage;

const TITLE_MAX: usize = 60;
const TITLE_MIN: usize = 30;
const THIN_CONTENT_WORDS: usize = 300;
const LARGE_IMAGE_KB: f64 = 150.0;

/// Titles, descriptions, headings, content and images of 200 pages
pub fn analyze(input: &AnalyzerInput) -> Vec<Issue> {
    let pages: Vec<&CrawledPage> = input.valid_pages().collect();
    let mut issues = Vec::new();

    let urls = |filter: &dyn Fn(&CrawledPage) -> bool| -> Vec<String> {
        pages
            .iter()
            .filter(|p| filter(p))
            .map(|p| p.final_url.clone())
            .collect()
    };

    let missing_title = urls(&|p| p.title.is_none());
    if !missing_title.is_empty() {
        issues.push(Issue::new(
            Severity::Critical,
            "Chybějící title tag",
            format!(
                "{} stránek nemá title tag. Title je klíčový ranking faktor a ovlivňuje CTR ve výsledcích vyhledávání.",
                missing_title.len()
            ),
            missing_title,
            "Přidejte unikátní, popisný title tag (50-60 znaků) na každou stránku.",
        ));
    }

    let (groups, duplicate_titles) = duplicates(&pages, |p| p.title.as_deref());
    if groups > 0 {
        issues.push(Issue::new(
            Severity::Warning,
            "Duplicitní title tagy",
            format!(
                "{} skupin stránek sdílí stejný title. Duplicitní titulky ztěžují vyhledávačům rozlišení stránek.",
                groups
            ),
            duplicate_titles,
            "Vytvořte pro každou stránku unikátní title, který přesně popisuje jeho obsah.",
        ));
    }

    let long_titles = urls(&|p| p.title.as_deref().map_or(false, |t| t.chars().count() > TITLE_MAX));
    if !long_titles.is_empty() {
        issues.push(Issue::new(
            Severity::Info,
            "Title delší než 60 znaků",
            format!(
                "{} stránek má title delší než 60 znaků. Dlouhé titulky mohou být ve výsledcích vyhledávání oříznuty.",
                long_titles.len()
            ),
            long_titles,
            "Zkraťte titulky na 50-60 znaků. Nejdůležitější klíčová slova dejte na začátek.",
        ));
    }

    let short_titles = urls(&|p| p.title.as_deref().map_or(false, |t| t.chars().count() < TITLE_MIN));
    if !short_titles.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Title kratší než 30 znaků",
            format!(
                "{} stránek má příliš krátký title. Krátké titulky nevyužívají potenciál pro klíčová slova.",
                short_titles.len()
            ),
            short_titles,
            "Rozšiřte titulky na 50-60 znaků s popisným textem a relevantními klíčovými slovy.",
        ));
    }

    let missing_description = urls(&|p| p.meta_description.is_none());
    if !missing_description.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Chybějící meta description",
            format!(
                "{} stránek nemá meta description. Vyhledávače si vygenerují vlastní snippet, který nemusí být optimální.",
                missing_description.len()
            ),
            missing_description,
            "Přidejte unikátní meta description (120-160 znaků) s CTA a klíčovými slovy.",
        ));
    }

    let (groups, duplicate_descriptions) = duplicates(&pages, |p| p.meta_description.as_deref());
    if groups > 0 {
        issues.push(Issue::new(
            Severity::Warning,
            "Duplicitní meta description",
            format!("{} skupin stránek sdílí stejný meta description.", groups),
            duplicate_descriptions,
            "Vytvořte pro každou stránku unikátní meta description popisující její specifický obsah.",
        ));
    }

    let missing_h1 = urls(&|p| p.h1.is_empty());
    if !missing_h1.is_empty() {
        issues.push(Issue::new(
            Severity::Critical,
            "Chybějící H1 nadpis",
            format!(
                "{} stránek nemá H1 nadpis. H1 je důležitý signál pro vyhledávače o tématu stránky.",
                missing_h1.len()
            ),
            missing_h1,
            "Přidejte na každou stránku jeden H1 nadpis, který popisuje hlavní téma.",
        ));
    }

    let multiple_h1 = urls(&|p| p.h1.len() > 1);
    if !multiple_h1.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Více H1 nadpisů na stránce",
            format!(
                "{} stránek má více než jeden H1 nadpis. Jeden H1 drží jasnou hierarchii obsahu.",
                multiple_h1.len()
            ),
            multiple_h1,
            "Ponechte jeden H1 na stránku. Další nadpisy přesuňte na H2-H3.",
        ));
    }

    let h1_equals_title = urls(&|p| {
        let Some(title) = p.title.as_deref() else {
            return false;
        };
        let title = title.trim().to_lowercase();
        p.h1.iter().any(|h| h.trim().to_lowercase() == title)
    });
    if !h1_equals_title.is_empty() {
        issues.push(Issue::new(
            Severity::Info,
            "H1 je identický s title tagem",
            format!(
                "{} stránek má H1 nadpis totožný s title tagem. Rozdílné znění lépe využívá prostor pro klíčová slova.",
                h1_equals_title.len()
            ),
            h1_equals_title,
            "Odlište H1 od title. H1 může být delší a popisnější, title by měl být stručný a klikatelný.",
        ));
    }

    // Zero-word pages are app shells or media wrappers, not thin articles
    let thin = urls(&|p| p.word_count > 0 && p.word_count < THIN_CONTENT_WORDS);
    if !thin.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Tenký obsah (< 300 slov)",
            format!(
                "{} stránek má méně než 300 slov. Stránky s málo obsahem mají nižší šanci na ranking.",
                thin.len()
            ),
            thin,
            "Rozšiřte obsah o relevantní informace, odpovědi na otázky uživatelů a podrobnosti k tématu.",
        ));
    }

    let mut missing_alt_pages = Vec::new();
    let mut missing_alt_images = 0;
    for page in &pages {
        let missing = page
            .images
            .iter()
            .filter(|img| img.alt.as_deref().map_or(true, |alt| alt.trim().is_empty()))
            .count();
        if missing > 0 {
            missing_alt_pages.push(page.final_url.clone());
            missing_alt_images += missing;
        }
    }
    if !missing_alt_pages.is_empty() {
        issues.push(Issue::new(
            Severity::Warning,
            "Obrázky bez alt textu",
            format!(
                "{} obrázků na {} stránkách nemá alt text. Alt text je důležitý pro přístupnost a image SEO.",
                missing_alt_images,
                missing_alt_pages.len()
            ),
            missing_alt_pages,
            "Přidejte popisný alt text ke všem obrázkům. Dekorativní obrázky mohou mít prázdný alt (alt='').",
        ));
    }

    let large_images = urls(&|p| {
        p.images
            .iter()
            .any(|img| img.size_kb.map_or(false, |kb| kb > LARGE_IMAGE_KB))
    });
    if !large_images.is_empty() {
        issues.push(Issue::new(
            Severity::Info,
            "Velké obrázky (> 150 KB)",
            format!(
                "{} stránek obsahuje obrázky větší než 150 KB. Velké obrázky zpomalují načítání.",
                large_images.len()
            ),
            large_images,
            "Komprimujte obrázky a použijte moderní formáty (WebP, AVIF). Implementujte lazy loading.",
        ));
    }

    let no_large_preview = urls(&|p| p.max_image_preview.as_deref() != Some("large"));
    if !no_large_preview.is_empty() {
        issues.push(Issue::new(
            Severity::Info,
            "Chybějící max-image-preview:large",
            format!(
                "{} stránek nemá direktivu max-image-preview:large. Bez ní Google nemusí zobrazit velké náhledy obrázků ve výsledcích.",
                no_large_preview.len()
            ),
            no_large_preview,
            "Přidejte <meta name='robots' content='max-image-preview:large'> pro povolení velkých náhledů ve vyhledávání.",
        ));
    }

    issues
}

/// Pages sharing a case-insensitive value. Returns the number of
/// duplicate groups and their URLs, in first-seen order.
fn duplicates<'a, F>(pages: &[&'a CrawledPage], value: F) -> (usize, Vec<String>)
where
    F: Fn(&'a CrawledPage) -> Option<&'a str>,
{
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();

    for page in pages {
        let Some(raw) = value(*page) else {
            continue;
        };
        let key = raw.trim().to_lowercase();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(page.final_url.clone());
    }

    let mut count = 0;
    let mut urls = Vec::new();
    for key in order {
        if let Some(group) = groups.remove(&key).filter(|g| g.len() > 1) {
            count += 1;
            urls.extend(group);
        }
    }

    (count, urls)
}
