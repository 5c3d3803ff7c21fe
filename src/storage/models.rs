use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of a job record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => anyhow::bail!("Unknown job status: {}", other),
        }
    }
}

/// A queued unit of work, as held by the job store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,

    /// Client the job is run for
    pub client_id: Uuid,

    /// Job-type tag, e.g. `seo.technical-audit`
    pub job_type: String,

    pub status: JobStatus,

    /// Raw input parameters; each handler validates its own shape
    pub params: Value,

    /// Progress percentage (0-100)
    pub progress: i32,

    /// Human-readable progress message
    pub progress_message: Option<String>,

    pub result: Option<Value>,
    pub error: Option<JobError>,

    /// Number of retries already consumed
    pub retry_count: i32,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Hard deadline for the current attempt
    pub timeout_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    /// User that submitted the job
    pub created_by: Uuid,
}

/// Machine-readable failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobErrorCode {
    Timeout,
    HandlerError,
    NoHandler,
}

/// Structured error attached to a failed or requeued job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<JobErrorCode>,

    /// Full cause chain of the underlying error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl JobError {
    pub fn new(message: impl Into<String>, code: JobErrorCode) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
            stack: None,
        }
    }

    /// Build a job error from a handler failure, keeping the cause chain
    pub fn from_anyhow(err: &anyhow::Error, code: JobErrorCode) -> Self {
        Self {
            message: err.to_string(),
            code: Some(code),
            stack: Some(format!("{:?}", err)),
        }
    }
}

/// Which way a failure transition went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailOutcome {
    Requeued,
    Failed,
}

impl FailOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailOutcome::Requeued => "requeued",
            FailOutcome::Failed => "failed",
        }
    }
}

/// Append-only audit record written on every terminal transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub action: String,
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_error_serializes_code_in_upper_case() {
        let error = JobError::new("Job timed out", JobErrorCode::Timeout);
        let json = serde_json::to_value(&error).unwrap();

        assert_eq!(json["code"], "TIMEOUT");
        assert!(json.get("stack").is_none());
    }

    #[test]
    fn test_job_error_keeps_cause_chain() {
        let err = anyhow::anyhow!("connection refused").context("Crawl failed");
        let error = JobError::from_anyhow(&err, JobErrorCode::HandlerError);

        assert_eq!(error.message, "Crawl failed");
        assert!(error.stack.unwrap().contains("connection refused"));
    }
}
