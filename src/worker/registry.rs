use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cli::config::WorkerConfig;
use crate::storage::Job;
use crate::worker::audit::TechnicalAuditHandler;
use crate::worker::progress::ProgressReporter;

pub const TECHNICAL_AUDIT: &str = "seo.technical-audit";
pub const KEYWORD_ANALYSIS: &str = "seo.keyword-analysis";

/// Timeout and retry budget of one job type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTypeConfig {
    pub job_type: &'static str,
    pub label: &'static str,
    pub default_timeout: Duration,
    pub max_retries: u32,
}

/// Every job type the platform can enqueue
pub const JOB_TYPES: &[JobTypeConfig] = &[
    JobTypeConfig {
        job_type: TECHNICAL_AUDIT,
        label: "Technická SEO analýza",
        default_timeout: Duration::from_secs(900),
        max_retries: 3,
    },
    JobTypeConfig {
        job_type: KEYWORD_ANALYSIS,
        label: "Analýza klíčových slov",
        default_timeout: Duration::from_secs(600),
        max_retries: 3,
    },
];

pub fn job_type_config(job_type: &str) -> Option<&'static JobTypeConfig> {
    JOB_TYPES.iter().find(|config| config.job_type == job_type)
}

/// Processor for one job type.
///
/// Returns the JSON result stored on the completed job. Progress writes go
/// through `progress`, which fails once the job deadline has passed.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job, progress: &dyn ProgressReporter) -> Result<Value>;
}

/// Job-type to handler dispatch table, built once at start-up
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Registered job types, sorted
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// Build the registry with every handler this worker implements
pub fn register_handlers(config: &WorkerConfig) -> Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(
        TECHNICAL_AUDIT,
        Arc::new(TechnicalAuditHandler::new(config)?),
    );

    info!(job_types = ?registry.job_types(), "Registered job handlers");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_budgets() {
        let audit = job_type_config(TECHNICAL_AUDIT).unwrap();
        assert_eq!(audit.default_timeout, Duration::from_secs(900));
        assert_eq!(audit.max_retries, 3);

        let keywords = job_type_config(KEYWORD_ANALYSIS).unwrap();
        assert_eq!(keywords.default_timeout, Duration::from_secs(600));

        assert!(job_type_config("seo.unknown").is_none());
    }

    #[test]
    fn test_register_handlers_covers_technical_audit_only() {
        let registry = register_handlers(&WorkerConfig::default()).unwrap();

        assert_eq!(registry.job_types(), vec![TECHNICAL_AUDIT]);
        assert!(registry.get(TECHNICAL_AUDIT).is_some());
        assert!(registry.get(KEYWORD_ANALYSIS).is_none());
    }
}
