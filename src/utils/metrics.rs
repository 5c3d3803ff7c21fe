use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::info;

/// How a single page fetch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// HTML page added to the crawl
    Parsed,

    /// Response was not HTML
    SkippedNonHtml,

    /// Redirects never resolved (loop or hop ceiling)
    Unresolved,

    /// Network error or timeout
    Failed,
}

/// Per-crawl fetch statistics collector
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// In-memory metrics store
    metrics: Arc<Mutex<CrawlMetrics>>,
}

/// Fetch statistics for one crawl
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CrawlMetrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Total fetches attempted
    pub total_requests: usize,

    /// Fetches that produced a page
    pub successful_requests: usize,

    /// Fetches that failed outright
    pub failed_requests: usize,

    /// Fetches dropped because the response was not HTML
    pub skipped_non_html: usize,

    /// Bytes downloaded
    pub bytes_downloaded: usize,

    /// Sum of request durations in milliseconds
    pub total_duration_ms: u64,

    /// HTTP status code counts
    pub status_codes: BTreeMap<u16, usize>,
}

impl CrawlMetrics {
    /// Mean fetch latency in milliseconds
    pub fn mean_latency_ms(&self) -> u64 {
        if self.total_requests == 0 {
            return 0;
        }
        self.total_duration_ms / self.total_requests as u64
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let metrics = CrawlMetrics {
            start_time: Utc::now(),
            ..Default::default()
        };

        Self {
            metrics: Arc::new(Mutex::new(metrics)),
        }
    }

    /// Record a fetch
    pub async fn record_request(
        &self,
        outcome: FetchOutcome,
        duration_ms: u64,
        status_code: Option<u16>,
        bytes: usize,
    ) {
        let mut metrics = self.metrics.lock().await;

        metrics.total_requests += 1;
        metrics.total_duration_ms += duration_ms;
        metrics.bytes_downloaded += bytes;

        match outcome {
            FetchOutcome::Parsed | FetchOutcome::Unresolved => metrics.successful_requests += 1,
            FetchOutcome::SkippedNonHtml => metrics.skipped_non_html += 1,
            FetchOutcome::Failed => metrics.failed_requests += 1,
        }

        // Record status code if available
        if let Some(code) = status_code {
            *metrics.status_codes.entry(code).or_default() += 1;
        }
    }

    /// Start timing a request
    pub fn start_timer(&self) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
        }
    }

    /// Get all metrics
    pub async fn get_metrics(&self) -> CrawlMetrics {
        self.metrics.lock().await.clone()
    }

    /// Log a one-line summary
    pub async fn log_summary(&self, base_url: &str) {
        let metrics = self.get_metrics().await;
        info!(
            base_url = %base_url,
            requests = metrics.total_requests,
            ok = metrics.successful_requests,
            failed = metrics.failed_requests,
            non_html = metrics.skipped_non_html,
            bytes = metrics.bytes_downloaded,
            mean_latency_ms = metrics.mean_latency_ms(),
            "Crawl fetch statistics"
        );
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Request timer for measuring request durations
pub struct RequestTimer {
    /// Start time of the request
    start: Instant,
}

impl RequestTimer {
    /// End timing and get the duration in milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
