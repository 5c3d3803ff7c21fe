pub mod logging;
pub mod metrics;

// Re-export common functions and types
pub use logging::{default_log_file, init_logging};
pub use metrics::{CrawlMetrics, FetchOutcome, MetricsCollector, RequestTimer};
