pub mod controller;
pub mod page;
pub mod robots;
pub mod scheduler;
pub mod sitemap;
pub mod task;

// Re-export common types
pub use controller::{CrawlError, CrawlerController};
pub use page::{CrawledPage, HreflangEntry, ImageData, LinkData, MicrodataItem, RedirectHop};
pub use robots::RobotsRules;
pub use scheduler::{normalize_url, Scheduler};
pub use task::{CrawlParams, CrawlResult, CrawlTask};
