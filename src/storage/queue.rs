use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cli::config::QueueSettings;
use crate::storage::models::{AuditLogEntry, FailOutcome, Job, JobError};

/// Narrow contract to the external job store.
///
/// The worker never writes job fields directly; every mutation goes through
/// one of these operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Atomically claim the oldest queued job, or `None` if the queue is empty
    async fn claim_next_job(&self) -> Result<Option<Job>>;

    /// Write progress. Best effort: failures are logged, never returned.
    async fn update_progress(&self, job_id: Uuid, progress: u8, message: Option<String>);

    /// Mark the job completed with its result
    async fn complete_job(&self, job_id: Uuid, result: Value) -> Result<()>;

    /// Requeue the job if retries remain, otherwise fail it permanently
    async fn fail_job(
        &self,
        job_id: Uuid,
        error: JobError,
        retry_count: u32,
        max_retries: u32,
    ) -> Result<FailOutcome>;

    /// Append an audit record
    async fn write_audit_log(&self, entry: AuditLogEntry) -> Result<()>;
}

/// Message stored on a job that goes back to the queue
pub fn retry_message(retry_count: u32, max_retries: u32) -> String {
    format!("Retry {}/{}", retry_count + 1, max_retries)
}

pub const COMPLETED_MESSAGE: &str = "Dokončeno";
pub const PERMANENT_FAILURE_MESSAGE: &str = "Selhalo po maximálním počtu pokusů";

/// Row shape of the `jobs` table
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    client_id: Uuid,
    job_type: String,
    status: String,
    params: Json<Value>,
    progress: i32,
    progress_message: Option<String>,
    result: Option<Json<Value>>,
    error: Option<Json<Value>>,
    retry_count: i32,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    timeout_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    created_by: Uuid,
}

impl TryFrom<JobRow> for Job {
    type Error = anyhow::Error;

    fn try_from(row: JobRow) -> Result<Self> {
        // A malformed stored error is not worth refusing the job over
        let error = row
            .error
            .and_then(|json| serde_json::from_value::<JobError>(json.0).ok());

        Ok(Job {
            id: row.id,
            client_id: row.client_id,
            job_type: row.job_type,
            status: row.status.parse()?,
            params: row.params.0,
            progress: row.progress,
            progress_message: row.progress_message,
            result: row.result.map(|json| json.0),
            error,
            retry_count: row.retry_count,
            started_at: row.started_at,
            completed_at: row.completed_at,
            timeout_at: row.timeout_at,
            created_at: row.created_at,
            created_by: row.created_by,
        })
    }
}

/// PostgreSQL-backed job queue
pub struct PgJobQueue {
    /// PostgreSQL connection pool
    pool: Pool<Postgres>,
}

impl PgJobQueue {
    /// Connect to the job store
    pub async fn new(settings: &QueueSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&settings.database_url)
            .await
            .context("Failed to connect to the job store")?;

        info!("Connected to job store");

        Ok(Self { pool })
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn claim_next_job(&self) -> Result<Option<Job>> {
        // SKIP LOCKED keeps two workers from ever claiming the same row
        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE jobs
             SET status = 'running', started_at = NOW()
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE status = 'queued'
                 ORDER BY created_at
                 FOR UPDATE SKIP LOCKED
                 LIMIT 1
             )
             RETURNING id, client_id, job_type, status, params, progress, progress_message,
                       result, error, retry_count, started_at, completed_at, timeout_at,
                       created_at, created_by",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to claim next job")?;

        match row {
            Some(row) => {
                let job = Job::try_from(row)?;
                info!(job_id = %job.id, job_type = %job.job_type, "Job claimed from queue");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn update_progress(&self, job_id: Uuid, progress: u8, message: Option<String>) {
        let result = sqlx::query(
            "UPDATE jobs SET progress = $2, progress_message = $3 WHERE id = $1",
        )
        .bind(job_id)
        .bind(i32::from(progress))
        .bind(message)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!(job_id = %job_id, error = %e, "Failed to update progress");
        }
    }

    async fn complete_job(&self, job_id: Uuid, result: Value) -> Result<()> {
        sqlx::query(
            "UPDATE jobs
             SET status = 'completed', progress = 100, progress_message = $2,
                 result = $3, completed_at = NOW()
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(COMPLETED_MESSAGE)
        .bind(Json(result))
        .execute(&self.pool)
        .await
        .context(format!("Failed to complete job {}", job_id))?;

        debug!(job_id = %job_id, "Job marked completed");

        Ok(())
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        error: JobError,
        retry_count: u32,
        max_retries: u32,
    ) -> Result<FailOutcome> {
        let error_json = serde_json::to_value(&error).context("Failed to serialize job error")?;

        if retry_count < max_retries {
            sqlx::query(
                "UPDATE jobs
                 SET status = 'queued', progress = 0, progress_message = $2,
                     error = $3, retry_count = $4, started_at = NULL
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(retry_message(retry_count, max_retries))
            .bind(Json(error_json))
            .bind((retry_count + 1) as i32)
            .execute(&self.pool)
            .await
            .context(format!("Failed to requeue job {}", job_id))?;

            return Ok(FailOutcome::Requeued);
        }

        sqlx::query(
            "UPDATE jobs
             SET status = 'failed', progress_message = $2, error = $3, completed_at = NOW()
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(PERMANENT_FAILURE_MESSAGE)
        .bind(Json(error_json))
        .execute(&self.pool)
        .await
        .context(format!("Failed to mark job {} as failed", job_id))?;

        Ok(FailOutcome::Failed)
    }

    async fn write_audit_log(&self, entry: AuditLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (user_id, client_id, action, metadata) VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.user_id)
        .bind(entry.client_id)
        .bind(&entry.action)
        .bind(Json(&entry.metadata))
        .execute(&self.pool)
        .await
        .context(format!("Failed to write audit log entry {}", entry.action))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::JobStatus;
    use serde_json::json;

    fn sample_row(status: &str, error: Option<Value>) -> JobRow {
        JobRow {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            job_type: "seo.technical-audit".to_string(),
            status: status.to_string(),
            params: Json(json!({ "domain": "example.com" })),
            progress: 0,
            progress_message: None,
            result: None,
            error: error.map(Json),
            retry_count: 1,
            started_at: Some(Utc::now()),
            completed_at: None,
            timeout_at: None,
            created_at: Utc::now(),
            created_by: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_row_converts_to_job() {
        let row = sample_row("running", Some(json!({ "message": "boom", "code": "HANDLER_ERROR" })));
        let job = Job::try_from(row).unwrap();

        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.params["domain"], "example.com");
        assert_eq!(job.error.unwrap().message, "boom");
    }

    #[test]
    fn test_row_with_unknown_status_is_rejected() {
        assert!(Job::try_from(sample_row("paused", None)).is_err());
    }

    #[test]
    fn test_malformed_stored_error_is_dropped() {
        let job = Job::try_from(sample_row("running", Some(json!("not an object")))).unwrap();
        assert!(job.error.is_none());
    }

    #[test]
    fn test_retry_message_counts_from_one() {
        assert_eq!(retry_message(0, 3), "Retry 1/3");
        assert_eq!(retry_message(2, 3), "Retry 3/3");
    }
}
