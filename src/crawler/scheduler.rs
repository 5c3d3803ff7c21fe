use std::collections::{HashSet, VecDeque};
use tracing::debug;
use url::Url;

use crate::crawler::robots::RobotsRules;
use crate::crawler::task::CrawlTask;

/// Frontier and visited-set bookkeeping for one BFS crawl
pub struct Scheduler {
    /// Origin every crawled URL must share
    origin: Url,

    /// Rules applied before a URL is dispatched
    robots: RobotsRules,

    /// User agent the robots rules are evaluated for
    user_agent: String,

    /// Normalized keys of URLs already dispatched
    seen_urls: HashSet<String>,

    /// Pending tasks, drained front to back
    frontier: VecDeque<CrawlTask>,
}

impl Scheduler {
    /// Create a new scheduler for the given origin
    pub fn new(origin: Url, robots: RobotsRules, user_agent: impl Into<String>) -> Self {
        Self {
            origin,
            robots,
            user_agent: user_agent.into(),
            seen_urls: HashSet::new(),
            frontier: VecDeque::new(),
        }
    }

    /// Queue a URL unless it was already dispatched
    pub fn enqueue(&mut self, url: &str, depth: u32) {
        if self.seen_urls.contains(&normalize_url(url)) {
            return;
        }
        self.frontier.push_back(CrawlTask {
            url: url.to_string(),
            depth,
        });
    }

    /// Pop up to `size` crawlable tasks, marking each as seen.
    /// Duplicates and disallowed URLs are dropped without using a slot.
    pub fn next_batch(&mut self, size: usize) -> Vec<CrawlTask> {
        let mut batch = Vec::with_capacity(size);

        while batch.len() < size {
            let Some(task) = self.frontier.pop_front() else {
                break;
            };
            if self.should_crawl(&task.url) {
                batch.push(task);
            }
        }

        batch
    }

    /// Determine if a URL should be crawled, marking it seen if so
    pub fn should_crawl(&mut self, url: &str) -> bool {
        // Normalize the URL
        let normalized_url = normalize_url(url);

        // Check if we've already seen this URL
        if self.seen_urls.contains(&normalized_url) {
            debug!("Skipping already seen URL: {}", url);
            return false;
        }

        // Parse the URL
        let parsed_url = match Url::parse(url) {
            Ok(url) => url,
            Err(e) => {
                debug!("Skipping invalid URL {}: {}", url, e);
                return false;
            }
        };

        // Same origin only
        if parsed_url.origin() != self.origin.origin() {
            debug!("Skipping off-origin URL: {}", url);
            return false;
        }

        // Check robots.txt
        let path = match parsed_url.query() {
            Some(query) => format!("{}?{}", parsed_url.path(), query),
            None => parsed_url.path().to_string(),
        };
        if !self.robots.is_allowed(&path, &self.user_agent) {
            debug!("Blocked by robots.txt: {}", url);
            // Never offered again
            self.seen_urls.insert(normalized_url);
            return false;
        }

        // Add the URL to the seen set
        self.seen_urls.insert(normalized_url);

        true
    }

    /// Get the current count of seen URLs
    pub fn seen_count(&self) -> usize {
        self.seen_urls.len()
    }

    pub fn pending(&self) -> usize {
        self.frontier.len()
    }
}

/// Absolute URL with the fragment stripped and a trailing slash dropped
/// (except on the root path). Case is preserved.
pub fn clean_url(url: &Url) -> String {
    let mut cleaned = url.clone();
    cleaned.set_fragment(None);

    let path = cleaned.path().to_string();
    if path != "/" && path.ends_with('/') {
        cleaned.set_path(path.trim_end_matches('/'));
        if cleaned.path().is_empty() {
            cleaned.set_path("/");
        }
    }

    cleaned.to_string()
}

/// Comparison key for URLs: cleaned and lowercased
pub fn normalize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => clean_url(&parsed).to_lowercase(),
        // Can't parse, compare as-is
        Err(_) => url.trim().to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(robots: &str) -> Scheduler {
        Scheduler::new(
            Url::parse("https://example.com").unwrap(),
            RobotsRules::parse(robots),
            "MacroBot/1.0",
        )
    }

    #[test]
    fn test_should_crawl() {
        let mut scheduler = scheduler("User-agent: *\nDisallow: /admin\n");

        // Should crawl valid same-origin URL
        assert!(scheduler.should_crawl("https://example.com/page1"));

        // Should not crawl the same URL twice, whatever the case or trailing slash
        assert!(!scheduler.should_crawl("https://example.com/page1"));
        assert!(!scheduler.should_crawl("https://EXAMPLE.com/Page1/"));
        assert!(!scheduler.should_crawl("https://example.com/page1#section"));

        // Should not crawl other origins
        assert!(!scheduler.should_crawl("https://other-site.com/page"));
        assert!(!scheduler.should_crawl("http://example.com/page2"));
        assert!(!scheduler.should_crawl("https://www.example.com/page2"));

        // Should not crawl disallowed paths
        assert!(!scheduler.should_crawl("https://example.com/admin/users"));

        assert!(scheduler.should_crawl("https://example.com/page2"));
        assert_eq!(scheduler.seen_count(), 3);
    }

    #[test]
    fn test_next_batch_skips_without_using_slots() {
        let mut scheduler = scheduler("User-agent: *\nDisallow: /private\n");

        scheduler.enqueue("https://example.com/", 0);
        scheduler.enqueue("https://example.com/private", 1);
        scheduler.enqueue("https://example.com/a", 1);
        scheduler.enqueue("https://example.com/a/", 1);
        scheduler.enqueue("https://example.com/b", 1);

        let batch = scheduler.next_batch(3);
        let urls: Vec<&str> = batch.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://example.com/", "https://example.com/a", "https://example.com/b"]
        );
        assert_eq!(scheduler.pending(), 0);

        // Already-seen URLs are not queued again
        scheduler.enqueue("https://example.com/A", 2);
        assert_eq!(scheduler.pending(), 0);
        assert!(scheduler.next_batch(5).is_empty());
    }

    #[test]
    fn test_normalize_url() {
        // Lowercase
        assert_eq!(
            normalize_url("https://EXAMPLE.com/Path"),
            "https://example.com/path"
        );

        // Trailing slash dropped, except at the root
        assert_eq!(
            normalize_url("https://example.com/blog/"),
            "https://example.com/blog"
        );
        assert_eq!(normalize_url("https://example.com/"), "https://example.com/");
        assert_eq!(normalize_url("https://example.com"), "https://example.com/");

        // Fragment removal
        assert_eq!(
            normalize_url("https://example.com/page#section"),
            "https://example.com/page"
        );

        // Query strings are kept
        assert_eq!(
            normalize_url("https://example.com/search?Q=1"),
            "https://example.com/search?q=1"
        );
    }

    #[test]
    fn test_clean_url_preserves_case() {
        let url = Url::parse("https://example.com/Blog/Post/#top").unwrap();
        assert_eq!(clean_url(&url), "https://example.com/Blog/Post");
    }
}
