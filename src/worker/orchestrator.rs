use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cli::config::QueueSettings;
use crate::storage::{AuditLogEntry, FailOutcome, Job, JobError, JobErrorCode, JobQueue};
use crate::worker::progress::{JobTimedOut, ProgressSnapshot, ProgressTracker};
use crate::worker::registry::{job_type_config, HandlerRegistry};

/// Budget for a registered job type missing from the type table
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(900);

/// Polls the job store and runs one job at a time
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    registry: HandlerRegistry,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        registry: HandlerRegistry,
        settings: &QueueSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            registry,
            poll_interval: Duration::from_millis(settings.poll_interval),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval.max(1)),
            shutdown,
        }
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Poll until shutdown is requested. The job in flight is finished first.
    pub async fn run(&self) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            job_types = ?self.registry.job_types(),
            "Job runner started, polling for jobs"
        );

        let mut shutdown = self.shutdown.clone();
        while !self.shutting_down() {
            if let Err(e) = self.process_next().await {
                error!(error = ?e, "Unhandled error in poll loop");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Job runner stopped gracefully");
    }

    /// Claim and process at most one job; `false` when the queue was empty
    pub async fn process_next(&self) -> Result<bool> {
        match self.queue.claim_next_job().await? {
            Some(job) => {
                info!(job_id = %job.id, job_type = %job.job_type, "Job claimed from queue");
                self.process(job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process(&self, job: Job) -> Result<()> {
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            retry = job.retry_count,
            "Processing job"
        );
        let retry_count = u32::try_from(job.retry_count).unwrap_or(0);

        let Some(handler) = self.registry.get(&job.job_type) else {
            error!(job_type = %job.job_type, "No handler registered for job type");
            let error = JobError::new(
                format!("No handler for job type: {}", job.job_type),
                JobErrorCode::NoHandler,
            );
            // Retrying cannot help
            return self.fail(&job, error, retry_count, 0).await;
        };

        let (default_timeout, max_retries) = job_type_config(&job.job_type)
            .map_or((FALLBACK_TIMEOUT, 0), |config| {
                (config.default_timeout, config.max_retries)
            });

        let now = Utc::now();
        if let Some(deadline) = job.timeout_at.filter(|deadline| *deadline <= now) {
            warn!(job_id = %job.id, timeout_at = %deadline, "Job already past timeout");
            let error = JobError::new(
                "Job timed out before processing started",
                JobErrorCode::Timeout,
            );
            return self.fail(&job, error, retry_count, max_retries).await;
        }

        let budget = match job.timeout_at {
            Some(deadline) => (deadline - now).to_std().unwrap_or(Duration::ZERO),
            None => default_timeout,
        };

        let timed_out = Arc::new(AtomicBool::new(false));
        let tracker = Arc::new(ProgressTracker::new(
            job.id,
            self.queue.clone(),
            timed_out.clone(),
            ProgressSnapshot {
                progress: job.progress.clamp(0, 100) as u8,
                message: job.progress_message.clone(),
            },
        ));

        let timer = spawn_timeout(job.id, budget, timed_out.clone());
        let heartbeat = self.spawn_heartbeat(tracker.clone());

        let outcome = handler.handle(&job, tracker.as_ref()).await;

        timer.abort();
        heartbeat.abort();

        // A result produced after the deadline is discarded
        let fired = timed_out.load(Ordering::SeqCst);
        let outcome = match outcome {
            Ok(_) if fired => Err(JobTimedOut.into()),
            other => other,
        };

        match outcome {
            Ok(result) => self.complete(&job, result).await,
            Err(e) => {
                let code = if fired {
                    JobErrorCode::Timeout
                } else {
                    JobErrorCode::HandlerError
                };
                error!(job_id = %job.id, error = %e, code = ?code, "Job failed");
                self.fail(&job, JobError::from_anyhow(&e, code), retry_count, max_retries)
                    .await
            }
        }
    }

    /// Re-write the last progress at a fixed interval until aborted
    fn spawn_heartbeat(&self, tracker: Arc<ProgressTracker>) -> JoinHandle<()> {
        let interval = self.heartbeat_interval;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stopping = tracker.is_timed_out() || *shutdown.borrow();
                if !stopping {
                    tracker.heartbeat().await;
                }
            }
        })
    }

    async fn complete(&self, job: &Job, result: Value) -> Result<()> {
        self.queue.complete_job(job.id, result).await?;
        info!(job_id = %job.id, "Job completed successfully");

        self.write_audit(
            job,
            "job.completed",
            json!({
                "job_id": job.id,
                "job_type": job.job_type,
            }),
        )
        .await;
        Ok(())
    }

    async fn fail(&self, job: &Job, error: JobError, retry_count: u32, max_retries: u32) -> Result<()> {
        let message = error.message.clone();
        let outcome = self
            .queue
            .fail_job(job.id, error, retry_count, max_retries)
            .await?;

        match outcome {
            FailOutcome::Requeued => info!(
                job_id = %job.id,
                retry = retry_count + 1,
                max_retries,
                "Job requeued for retry"
            ),
            FailOutcome::Failed => info!(
                job_id = %job.id,
                retry_count,
                max_retries,
                "Job permanently failed"
            ),
        }

        self.write_audit(
            job,
            "job.failed",
            json!({
                "job_id": job.id,
                "job_type": job.job_type,
                "error": message,
                "outcome": outcome.as_str(),
            }),
        )
        .await;
        Ok(())
    }

    /// Audit writes never fail the job
    async fn write_audit(&self, job: &Job, action: &str, metadata: Value) {
        let entry = AuditLogEntry {
            user_id: job.created_by,
            client_id: job.client_id,
            action: action.to_string(),
            metadata,
        };

        if let Err(e) = self.queue.write_audit_log(entry).await {
            error!(job_id = %job.id, action, error = %e, "Failed to write audit log");
        }
    }
}

/// Flip `flag` once `budget` has elapsed
fn spawn_timeout(job_id: Uuid, budget: Duration, flag: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(budget).await;
        flag.store(true, Ordering::SeqCst);
        warn!(
            job_id = %job_id,
            timeout_ms = budget.as_millis() as u64,
            "Job timeout triggered"
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::queue::MockJobQueue;
    use crate::storage::JobStatus;
    use crate::worker::progress::ProgressReporter;
    use crate::worker::registry::{JobHandler, KEYWORD_ANALYSIS, TECHNICAL_AUDIT};
    use async_trait::async_trait;
    use mockall::predicate::{always, eq, function};
    use std::sync::atomic::AtomicUsize;
    use crate::cli::config::WorkerConfig;
    use crate::worker::audit::TechnicalAuditHandler;
    use tokio_test::assert_ok;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StubHandler {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl JobHandler for StubHandler {
        async fn handle(&self, _job: &Job, progress: &dyn ProgressReporter) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            progress.update(40, "Half way").await?;
            tokio::time::sleep(self.delay).await;
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(json!({ "ok": true }))
        }
    }

    fn job(job_type: &str) -> Job {
        Job {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            status: JobStatus::Running,
            params: json!({}),
            progress: 0,
            progress_message: None,
            result: None,
            error: None,
            retry_count: 0,
            started_at: Some(Utc::now()),
            completed_at: None,
            timeout_at: None,
            created_at: Utc::now(),
            created_by: Uuid::new_v4(),
        }
    }

    fn registry(delay: Duration, fail: bool) -> (HandlerRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(
            TECHNICAL_AUDIT,
            Arc::new(StubHandler {
                calls: calls.clone(),
                delay,
                fail,
            }),
        );
        (registry, calls)
    }

    fn claiming(queue: &mut MockJobQueue, job: &Job) {
        let job = job.clone();
        queue
            .expect_claim_next_job()
            .times(1)
            .returning(move || Ok(Some(job.clone())));
        queue.expect_update_progress().returning(|_, _, _| ());
    }

    fn expect_audit(queue: &mut MockJobQueue, action: &'static str, outcome: Option<&'static str>) {
        queue
            .expect_write_audit_log()
            .with(function(move |entry: &AuditLogEntry| {
                entry.action == action
                    && outcome.map_or(true, |o| entry.metadata["outcome"] == o)
            }))
            .times(1)
            .returning(|_| Ok(()));
    }

    fn worker(queue: MockJobQueue, registry: HandlerRegistry) -> (Worker, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(Arc::new(queue), registry, &QueueSettings::default(), rx);
        (worker, tx)
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let mut queue = MockJobQueue::new();
        queue.expect_claim_next_job().times(1).returning(|| Ok(None));

        let (worker, _tx) = worker(queue, HandlerRegistry::new());
        assert!(!worker.process_next().await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_handler_fails_without_retries() {
        let job = job(KEYWORD_ANALYSIS);
        let mut queue = MockJobQueue::new();
        claiming(&mut queue, &job);
        queue
            .expect_fail_job()
            .with(
                eq(job.id),
                function(|e: &JobError| e.code == Some(JobErrorCode::NoHandler)),
                eq(0u32),
                eq(0u32),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(FailOutcome::Failed));
        expect_audit(&mut queue, "job.failed", Some("failed"));

        let (registry, _) = registry(Duration::ZERO, false);
        let (worker, _tx) = worker(queue, registry);
        assert!(worker.process_next().await.unwrap());
    }

    #[tokio::test]
    async fn test_past_deadline_skips_handler() {
        let mut job = job(TECHNICAL_AUDIT);
        job.retry_count = 1;
        job.timeout_at = Some(Utc::now() - chrono::Duration::minutes(1));

        let mut queue = MockJobQueue::new();
        claiming(&mut queue, &job);
        queue
            .expect_fail_job()
            .with(
                eq(job.id),
                function(|e: &JobError| e.code == Some(JobErrorCode::Timeout)),
                eq(1u32),
                eq(3u32),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(FailOutcome::Requeued));
        expect_audit(&mut queue, "job.failed", Some("requeued"));

        let (registry, calls) = registry(Duration::ZERO, false);
        let (worker, _tx) = worker(queue, registry);
        assert_ok!(worker.process_next().await);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_job_is_completed() {
        let job = job(TECHNICAL_AUDIT);
        let mut queue = MockJobQueue::new();
        claiming(&mut queue, &job);
        queue
            .expect_complete_job()
            .with(eq(job.id), eq(json!({ "ok": true })))
            .times(1)
            .returning(|_, _| Ok(()));
        queue.expect_fail_job().never();
        expect_audit(&mut queue, "job.completed", None);

        let (registry, calls) = registry(Duration::ZERO, false);
        let (worker, _tx) = worker(queue, registry);
        assert_ok!(worker.process_next().await);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_is_requeued() {
        let mut job = job(TECHNICAL_AUDIT);
        job.retry_count = 2;

        let mut queue = MockJobQueue::new();
        claiming(&mut queue, &job);
        queue
            .expect_fail_job()
            .with(
                eq(job.id),
                function(|e: &JobError| {
                    e.code == Some(JobErrorCode::HandlerError) && e.message == "boom"
                }),
                eq(2u32),
                eq(3u32),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(FailOutcome::Requeued));
        expect_audit(&mut queue, "job.failed", Some("requeued"));

        let (registry, _) = registry(Duration::ZERO, true);
        let (worker, _tx) = worker(queue, registry);
        assert_ok!(worker.process_next().await);
    }

    #[tokio::test]
    async fn test_crawl_without_pages_is_a_handler_error() {
        let site = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 4], "application/pdf"))
            .mount(&site)
            .await;

        let mut config = WorkerConfig::default();
        config.crawler.politeness_delay = 0;
        config.crawler.request_timeout = 5_000;
        config.pagespeed.enabled = false;

        let mut job = job(TECHNICAL_AUDIT);
        job.params = json!({ "domain": site.address().to_string(), "max_pages": 10 });

        let mut queue = MockJobQueue::new();
        claiming(&mut queue, &job);
        queue.expect_complete_job().never();
        queue
            .expect_fail_job()
            .with(
                eq(job.id),
                function(|e: &JobError| {
                    e.code == Some(JobErrorCode::HandlerError)
                        && e.message.starts_with("Crawl selhal")
                        && e.message.contains("no pages")
                }),
                eq(0u32),
                eq(3u32),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(FailOutcome::Requeued));
        expect_audit(&mut queue, "job.failed", Some("requeued"));

        let mut registry = HandlerRegistry::new();
        registry.register(TECHNICAL_AUDIT, Arc::new(TechnicalAuditHandler::new(&config).unwrap()));
        let (worker, _tx) = worker(queue, registry);
        assert_ok!(worker.process_next().await);
    }

    #[tokio::test]
    async fn test_result_after_deadline_counts_as_timeout() {
        let mut job = job(TECHNICAL_AUDIT);
        job.timeout_at = Some(Utc::now() + chrono::Duration::milliseconds(50));

        let mut queue = MockJobQueue::new();
        claiming(&mut queue, &job);
        queue.expect_complete_job().never();
        queue
            .expect_fail_job()
            .with(
                eq(job.id),
                function(|e: &JobError| e.code == Some(JobErrorCode::Timeout)),
                always(),
                eq(3u32),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(FailOutcome::Requeued));
        expect_audit(&mut queue, "job.failed", Some("requeued"));

        let (registry, _) = registry(Duration::from_millis(300), false);
        let (worker, _tx) = worker(queue, registry);
        assert_ok!(worker.process_next().await);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut queue = MockJobQueue::new();
        queue.expect_claim_next_job().returning(|| Ok(None));

        let (worker, tx) = worker(queue, HandlerRegistry::new());
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), worker.run())
            .await
            .unwrap();
    }
}
