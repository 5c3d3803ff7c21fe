use anyhow::{anyhow, Result};
use scraper::{Html, Selector};

/// Entries found in one sitemap document
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SitemapDocument {
    /// `<sitemap><loc>` entries of a sitemap index
    pub child_sitemaps: Vec<String>,

    /// `<url><loc>` entries of a urlset
    pub urls: Vec<String>,
}

/// Sitemap reader. Documents go through the lenient HTML parser, so a
/// malformed entry only loses itself, never the rest of the file.
pub struct SitemapParser {
    index_loc: Selector,
    url_loc: Selector,
}

impl SitemapParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            index_loc: parse_selector("sitemap > loc")?,
            url_loc: parse_selector("url > loc")?,
        })
    }

    pub fn parse(&self, xml: &str) -> SitemapDocument {
        let document = Html::parse_document(xml);

        let collect = |selector: &Selector| -> Vec<String> {
            document
                .select(selector)
                .map(|loc| loc.text().collect::<String>().trim().to_string())
                .filter(|loc| !loc.is_empty())
                .collect()
        };

        SitemapDocument {
            child_sitemaps: collect(&self.index_loc),
            urls: collect(&self.url_loc),
        }
    }
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector '{}': {:?}", css, e))
}
