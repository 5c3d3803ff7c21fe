use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::crawler::scheduler::clean_url;

/// One redirect hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectHop {
    pub from: String,
    pub to: String,
    pub status_code: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HreflangEntry {
    pub lang: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkData {
    /// Absolute URL, fragment stripped
    pub href: String,
    pub anchor_text: String,
    pub is_nofollow: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub src: String,
    pub alt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,

    /// Transfer size, when known
    pub size_kb: Option<f64>,

    /// File extension guessed from the URL
    pub format: Option<String>,
}

/// An `itemscope` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicrodataItem {
    pub item_type: Option<String>,

    /// `itemprop` names found inside the block
    pub properties: Vec<String>,
}

/// One fetched resource with everything the analyzers look at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledPage {
    /// URL as requested
    pub url: String,

    /// URL after following redirects
    pub final_url: String,

    pub status_code: u16,
    pub redirect_chain: Vec<RedirectHop>,
    pub response_time_ms: u64,
    pub content_type: String,
    pub content_length: usize,

    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub canonical: Option<String>,
    pub meta_robots: Option<String>,

    /// `X-Robots-Tag` response header
    pub x_robots_tag: Option<String>,

    pub viewport: Option<String>,
    pub hreflang: Vec<HreflangEntry>,

    /// Value of `max-image-preview:` in the meta robots directive
    pub max_image_preview: Option<String>,

    pub h1: Vec<String>,
    pub h2: Vec<String>,
    pub h3: Vec<String>,
    pub word_count: usize,
    pub raw_html_length: usize,

    pub internal_links: Vec<LinkData>,
    pub external_links: Vec<LinkData>,
    pub images: Vec<ImageData>,

    /// Parsed JSON-LD blocks; blocks that are not valid JSON are dropped
    pub json_ld: Vec<Value>,
    pub microdata: Vec<MicrodataItem>,

    pub crawled_at: DateTime<Utc>,

    /// BFS distance from the seed
    pub crawl_depth: u32,
}

impl CrawledPage {
    /// Page answered 200 OK
    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }

    /// Noindex in either the meta robots tag or the X-Robots-Tag header
    pub fn is_noindex(&self) -> bool {
        let combined = format!(
            "{} {}",
            self.meta_robots.as_deref().unwrap_or(""),
            self.x_robots_tag.as_deref().unwrap_or("")
        );
        combined.to_lowercase().contains("noindex")
    }

    /// Page that is only the end of an unresolved redirect chain (loop or hop ceiling)
    pub fn redirect_only(
        url: &str,
        redirect_chain: Vec<RedirectHop>,
        response_time_ms: u64,
        depth: u32,
    ) -> Self {
        let final_url = redirect_chain
            .last()
            .map(|hop| hop.to.clone())
            .unwrap_or_else(|| url.to_string());
        let status_code = redirect_chain.last().map(|hop| hop.status_code).unwrap_or(0);

        Self {
            url: url.to_string(),
            final_url,
            status_code,
            redirect_chain,
            response_time_ms,
            content_type: String::new(),
            content_length: 0,
            title: None,
            meta_description: None,
            canonical: None,
            meta_robots: None,
            x_robots_tag: None,
            viewport: None,
            hreflang: Vec::new(),
            max_image_preview: None,
            h1: Vec::new(),
            h2: Vec::new(),
            h3: Vec::new(),
            word_count: 0,
            raw_html_length: 0,
            internal_links: Vec::new(),
            external_links: Vec::new(),
            images: Vec::new(),
            json_ld: Vec::new(),
            microdata: Vec::new(),
            crawled_at: Utc::now(),
            crawl_depth: depth,
        }
    }
}

/// Final HTML response of a fetch, before parsing
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub url: String,
    pub status_code: u16,
    pub redirect_chain: Vec<RedirectHop>,
    pub response_time_ms: u64,
    pub content_type: String,
    pub x_robots_tag: Option<String>,
    pub body: String,
}

/// A parsed page plus the same-origin URLs it links to
#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub page: CrawledPage,
    pub discovered: Vec<String>,
}

/// Compiled selectors for page extraction
pub struct PageParser {
    title: Selector,
    meta_description: Selector,
    canonical: Selector,
    meta_robots: Selector,
    viewport: Selector,
    hreflang: Selector,
    h1: Selector,
    h2: Selector,
    h3: Selector,
    body: Selector,
    links: Selector,
    images: Selector,
    json_ld: Selector,
    itemscope: Selector,
    itemprop: Selector,
    max_image_preview: Regex,
    image_format: Regex,
}

impl PageParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            title: selector("title")?,
            meta_description: selector(r#"meta[name="description"]"#)?,
            canonical: selector(r#"link[rel="canonical"]"#)?,
            meta_robots: selector(r#"meta[name="robots"]"#)?,
            viewport: selector(r#"meta[name="viewport"]"#)?,
            hreflang: selector(r#"link[rel="alternate"][hreflang]"#)?,
            h1: selector("h1")?,
            h2: selector("h2")?,
            h3: selector("h3")?,
            body: selector("body")?,
            links: selector("a[href]")?,
            images: selector("img")?,
            json_ld: selector(r#"script[type="application/ld+json"]"#)?,
            itemscope: selector("[itemscope]")?,
            itemprop: selector("[itemprop]")?,
            max_image_preview: Regex::new(r"(?i)max-image-preview:\s*([a-z]+)")?,
            image_format: Regex::new(r"(?i)\.(jpe?g|png|gif|webp|avif|svg)")?,
        })
    }

    /// Extract the page model from an HTML response
    pub fn parse(&self, response: FetchedResponse, origin: &Url, depth: u32) -> ParsedPage {
        let document = Html::parse_document(&response.body);

        let final_url = response
            .redirect_chain
            .last()
            .map(|hop| hop.to.clone())
            .unwrap_or_else(|| response.url.clone());

        // Relative references resolve against where the document actually lives
        let base = Url::parse(&final_url).or_else(|_| Url::parse(&response.url)).ok();

        let title = self.first_text(&document, &self.title);
        let meta_description = self.first_attr(&document, &self.meta_description, "content");
        let canonical = self.first_attr(&document, &self.canonical, "href");
        let meta_robots = self.first_attr(&document, &self.meta_robots, "content");
        let viewport = self.first_attr(&document, &self.viewport, "content");

        let max_image_preview = meta_robots.as_deref().and_then(|content| {
            self.max_image_preview
                .captures(content)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_lowercase())
        });

        let hreflang = document
            .select(&self.hreflang)
            .filter_map(|el| {
                let lang = el.value().attr("hreflang")?.trim();
                let href = el.value().attr("href")?.trim();
                if lang.is_empty() || href.is_empty() {
                    return None;
                }
                Some(HreflangEntry {
                    lang: lang.to_string(),
                    href: href.to_string(),
                })
            })
            .collect();

        let headings = |sel: &Selector| -> Vec<String> {
            document.select(sel).map(|el| element_text(&el)).collect()
        };
        let h1 = headings(&self.h1);
        let h2 = headings(&self.h2);
        let h3 = headings(&self.h3);

        let word_count = document
            .select(&self.body)
            .next()
            .map(|body| visible_text(&body).split_whitespace().count())
            .unwrap_or(0);

        // Links
        let mut internal_links = Vec::new();
        let mut external_links = Vec::new();
        let mut discovered = Vec::new();

        if let Some(base) = base.as_ref() {
            for el in document.select(&self.links) {
                let Some(raw_href) = el.value().attr("href").map(str::trim) else {
                    continue;
                };
                if is_skippable_href(raw_href) {
                    continue;
                }
                let Ok(resolved) = base.join(raw_href) else {
                    continue;
                };
                if !matches!(resolved.scheme(), "http" | "https") {
                    continue;
                }

                let href = clean_url(&resolved);
                let is_nofollow = el
                    .value()
                    .attr("rel")
                    .map_or(false, |rel| rel.to_lowercase().contains("nofollow"));
                let link = LinkData {
                    href: href.clone(),
                    anchor_text: element_text(&el),
                    is_nofollow,
                };

                if resolved.origin() == origin.origin() {
                    internal_links.push(link);
                    discovered.push(href);
                } else {
                    external_links.push(link);
                }
            }
        }

        // Images
        let images = document
            .select(&self.images)
            .filter_map(|el| {
                let src = el.value().attr("src")?.trim();
                if src.is_empty() {
                    return None;
                }
                let src = base
                    .as_ref()
                    .and_then(|b| b.join(src).ok())
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| src.to_string());
                let format = self
                    .image_format
                    .captures(&src)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_lowercase());

                Some(ImageData {
                    alt: el.value().attr("alt").map(str::to_string),
                    width: el.value().attr("width").and_then(|w| w.trim().parse().ok()),
                    height: el.value().attr("height").and_then(|h| h.trim().parse().ok()),
                    size_kb: None,
                    format,
                    src,
                })
            })
            .collect();

        // JSON-LD, skipping blocks that fail to parse
        let json_ld = document
            .select(&self.json_ld)
            .filter_map(|el| {
                let raw = el.text().collect::<String>();
                serde_json::from_str::<Value>(raw.trim()).ok()
            })
            .filter(|value| !value.is_null())
            .collect();

        let microdata = document
            .select(&self.itemscope)
            .map(|el| MicrodataItem {
                item_type: el.value().attr("itemtype").map(|t| t.trim().to_string()),
                properties: el
                    .select(&self.itemprop)
                    .filter_map(|prop| prop.value().attr("itemprop"))
                    .map(|name| name.trim().to_string())
                    .collect(),
            })
            .collect();

        let page = CrawledPage {
            url: response.url,
            final_url,
            status_code: response.status_code,
            redirect_chain: response.redirect_chain,
            response_time_ms: response.response_time_ms,
            content_type: response.content_type,
            content_length: response.body.len(),
            title,
            meta_description,
            canonical,
            meta_robots,
            x_robots_tag: response.x_robots_tag,
            viewport,
            hreflang,
            max_image_preview,
            h1,
            h2,
            h3,
            word_count,
            raw_html_length: response.body.len(),
            internal_links,
            external_links,
            images,
            json_ld,
            microdata,
            crawled_at: Utc::now(),
            crawl_depth: depth,
        };

        ParsedPage { page, discovered }
    }

    fn first_text(&self, document: &Html, sel: &Selector) -> Option<String> {
        document
            .select(sel)
            .next()
            .map(|el| element_text(&el))
            .filter(|text| !text.is_empty())
    }

    fn first_attr(&self, document: &Html, sel: &Selector, attr: &str) -> Option<String> {
        document
            .select(sel)
            .next()
            .and_then(|el| el.value().attr(attr))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector '{}': {:?}", css, e))
}

fn is_skippable_href(href: &str) -> bool {
    let lower = href.to_lowercase();
    href.is_empty()
        || href.starts_with('#')
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("javascript:")
}

/// Trimmed text content with internal whitespace collapsed
fn element_text(el: &ElementRef) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text content excluding script, style and noscript elements
fn visible_text(el: &ElementRef) -> String {
    let mut text = String::new();
    for node in el.descendants() {
        let Some(chunk) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(|a| a.value().as_element())
            .any(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"));
        if !hidden {
            text.push_str(chunk);
            text.push(' ');
        }
    }
    text
}
