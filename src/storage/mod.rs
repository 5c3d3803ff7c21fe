pub mod models;
pub mod queue;

// Re-export common types
pub use models::{AuditLogEntry, FailOutcome, Job, JobError, JobErrorCode, JobStatus};
pub use queue::{JobQueue, PgJobQueue};
