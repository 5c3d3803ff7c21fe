use serde::{Deserialize, Serialize};

use crate::crawler::page::CrawledPage;
use crate::utils::metrics::CrawlMetrics;

/// A URL waiting in the crawl frontier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTask {
    /// URL to crawl
    pub url: String,

    /// Current depth in the crawl tree (0 for the seed)
    pub depth: u32,
}

/// Budgets for one crawl
#[derive(Debug, Clone)]
pub struct CrawlParams {
    /// Bare host name, e.g. `example.com`
    pub domain: String,

    /// Maximum BFS depth
    pub max_depth: u32,

    /// Maximum number of pages in the result
    pub max_pages: usize,
}

/// Everything the crawl produced
#[derive(Debug, Clone)]
pub struct CrawlResult {
    pub pages: Vec<CrawledPage>,

    /// Raw robots.txt, if one was served
    pub robots_txt: Option<String>,

    /// URLs listed in the sitemap(s)
    pub sitemap_urls: Vec<String>,

    /// Resolved origin, e.g. `https://www.example.com`
    pub base_url: String,

    /// `/llms.txt` answered 200
    pub llms_txt_found: bool,

    pub metrics: CrawlMetrics,
}
