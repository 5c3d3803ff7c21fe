use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::storage::JobQueue;

/// Raised by any progress write attempted after the job deadline
#[derive(Debug, Error)]
#[error("Job timed out")]
pub struct JobTimedOut;

/// Progress sink for one pipeline stage, counted in stage-local units
#[async_trait]
pub trait StageProgress: Send + Sync {
    async fn report(&self, done: usize, total: usize) -> Result<()>;
}

/// Stages run without anyone watching
#[async_trait]
impl StageProgress for () {
    async fn report(&self, _done: usize, _total: usize) -> Result<()> {
        Ok(())
    }
}

/// Job-level progress writer handed to handlers
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Record `progress` percent with a status message
    async fn update(&self, progress: u8, message: &str) -> Result<()>;
}

/// Progress of a local run, written to the log instead of a job store
pub struct LogReporter;

#[async_trait]
impl ProgressReporter for LogReporter {
    async fn update(&self, progress: u8, message: &str) -> Result<()> {
        info!(progress, "{}", message);
        Ok(())
    }
}

/// Percentage range a pipeline stage owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBand {
    pub start: u8,
    pub end: u8,
}

impl ProgressBand {
    pub const PREP: ProgressBand = ProgressBand { start: 0, end: 5 };
    pub const CRAWL: ProgressBand = ProgressBand { start: 5, end: 50 };
    pub const PERFORMANCE: ProgressBand = ProgressBand { start: 50, end: 60 };
    pub const ANALYSIS: ProgressBand = ProgressBand { start: 60, end: 80 };
    pub const AI: ProgressBand = ProgressBand { start: 80, end: 95 };
    pub const ASSEMBLY: ProgressBand = ProgressBand { start: 95, end: 100 };

    /// Map stage-local `done / total` linearly into the band
    pub fn map(&self, done: usize, total: usize) -> u8 {
        let span = f64::from(self.end - self.start);
        let fraction = (done as f64 / total.max(1) as f64).clamp(0.0, 1.0);
        let value = f64::from(self.start) + (fraction * span).round();
        (value as u8).clamp(self.start, self.end)
    }
}

/// Stage progress that maps into a band of a job-level reporter
pub struct BandProgress<'a> {
    reporter: &'a dyn ProgressReporter,
    band: ProgressBand,
    message: fn(usize, usize) -> String,
}

impl<'a> BandProgress<'a> {
    pub fn new(
        reporter: &'a dyn ProgressReporter,
        band: ProgressBand,
        message: fn(usize, usize) -> String,
    ) -> Self {
        Self {
            reporter,
            band,
            message,
        }
    }
}

#[async_trait]
impl<'a> StageProgress for BandProgress<'a> {
    async fn report(&self, done: usize, total: usize) -> Result<()> {
        let message = (self.message)(done, total);
        self.reporter.update(self.band.map(done, total), &message).await
    }
}

/// Last value written for a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub progress: u8,
    pub message: Option<String>,
}

/// Tracks and writes progress for one running job.
///
/// Writes are monotonic: a value below the last one written is raised to it.
/// Once the timeout flag is set every update fails with [`JobTimedOut`].
pub struct ProgressTracker {
    job_id: Uuid,
    queue: Arc<dyn JobQueue>,
    timed_out: Arc<AtomicBool>,
    last: Mutex<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new(
        job_id: Uuid,
        queue: Arc<dyn JobQueue>,
        timed_out: Arc<AtomicBool>,
        initial: ProgressSnapshot,
    ) -> Self {
        Self {
            job_id,
            queue,
            timed_out,
            last: Mutex::new(initial),
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> ProgressSnapshot {
        self.last.lock().await.clone()
    }

    /// Re-write the last known progress
    pub async fn heartbeat(&self) {
        // Held across the write so an older value never lands after a newer one
        let last = self.last.lock().await;
        self.queue
            .update_progress(self.job_id, last.progress, last.message.clone())
            .await;
    }
}

#[async_trait]
impl ProgressReporter for ProgressTracker {
    async fn update(&self, progress: u8, message: &str) -> Result<()> {
        if self.is_timed_out() {
            return Err(JobTimedOut.into());
        }

        let mut last = self.last.lock().await;
        last.progress = last.progress.max(progress.min(100));
        last.message = Some(message.to_string());
        self.queue
            .update_progress(self.job_id, last.progress, last.message.clone())
            .await;

        Ok(())
    }
}
