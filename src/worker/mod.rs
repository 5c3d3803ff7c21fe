pub mod audit;
pub mod orchestrator;
pub mod progress;
pub mod registry;

// Re-export common types
pub use audit::{ParamsError, TechnicalAuditHandler, TechnicalAuditParams};
pub use orchestrator::Worker;
pub use progress::{JobTimedOut, LogReporter, ProgressReporter};
pub use registry::{register_handlers, HandlerRegistry, JobHandler};
