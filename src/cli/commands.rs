use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cli::config::WorkerConfig;
use crate::storage::PgJobQueue;
use crate::utils::default_log_file;
use crate::worker::{register_handlers, LogReporter, TechnicalAuditHandler, TechnicalAuditParams, Worker};

const REDACTED: &str = "********";

/// Start the polling worker; returns after a shutdown signal
pub async fn run_worker(config: WorkerConfig) -> Result<()> {
    let queue = PgJobQueue::new(&config.queue)
        .await
        .context("Failed to connect to the job store")?;
    let registry = register_handlers(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown_tx.send(true).ok();
    });

    let worker = Worker::new(Arc::new(queue), registry, &config.queue, shutdown_rx);
    worker.run().await;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down..."),
                    _ = sigterm.recv() => info!("SIGTERM received, shutting down..."),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("SIGINT received, shutting down..."),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signals");
            std::future::pending::<()>().await;
        }
    }
}

/// Run one audit locally and print or save the JSON report
pub async fn audit_once(
    config: WorkerConfig,
    params: TechnicalAuditParams,
    output: Option<PathBuf>,
) -> Result<()> {
    params.validate()?;

    let handler = TechnicalAuditHandler::new(&config)?;
    let result = handler.run(&params, &LogReporter).await?;

    let json = serde_json::to_string_pretty(&result).context("Failed to serialize audit result")?;
    match output {
        Some(path) => {
            fs::write(&path, json)
                .context(format!("Failed to write report to {}", path.display()))?;
            info!(
                path = %path.display(),
                score = result.summary.overall_score,
                issues = result.summary.total_issues,
                "Report written"
            );
        }
        None => println!("{}", json),
    }

    Ok(())
}

/// Print the effective configuration with secrets masked
pub fn show_config(config: &WorkerConfig, path: Option<&Path>) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(WorkerConfig::default_path);
    let yaml = serde_yaml::to_string(&redacted(config)).context("Failed to serialize configuration")?;

    println!("# Configuration file: {}", path.display());
    println!("# Default log file: {}", default_log_file().display());
    println!("{}", yaml);
    Ok(())
}

/// Write the built-in defaults; an existing file is left alone
pub fn init_config(path: Option<&Path>) -> Result<()> {
    let target = path.map(Path::to_path_buf).unwrap_or_else(WorkerConfig::default_path);
    if target.exists() {
        bail!("Configuration file {} already exists", target.display());
    }

    let written = WorkerConfig::default().save(Some(&target))?;
    println!("Configuration written to {}", written.display());
    Ok(())
}

fn redacted(config: &WorkerConfig) -> WorkerConfig {
    let mask = |secret: &Option<String>| secret.as_ref().map(|_| REDACTED.to_string());

    let mut config = config.clone();
    config.pagespeed.api_key = mask(&config.pagespeed.api_key);
    config.ai.api_key = mask(&config.ai.api_key);
    if let Ok(mut url) = url::Url::parse(&config.queue.database_url) {
        if url.password().is_some() && url.set_password(Some(REDACTED)).is_ok() {
            config.queue.database_url = url.to_string();
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_masks_secrets() {
        let mut config = WorkerConfig::default();
        config.ai.api_key = Some("sk-ant-secret".to_string());
        config.queue.database_url = "postgresql://worker:hunter2@db:5432/macro".to_string();

        let masked = redacted(&config);

        assert_eq!(masked.ai.api_key.as_deref(), Some(REDACTED));
        assert_eq!(masked.pagespeed.api_key, None);
        assert!(!masked.queue.database_url.contains("hunter2"));
        assert!(masked.queue.database_url.starts_with("postgresql://worker:"));
    }

    #[test]
    fn test_init_config_refuses_to_overwrite() {
        let path = std::env::temp_dir().join(format!("audit-worker-{}.yaml", uuid::Uuid::new_v4()));

        init_config(Some(&path)).unwrap();
        let written = WorkerConfig::load(Some(&path)).unwrap();
        assert_eq!(written.crawler.max_concurrency, 5);
        assert!(init_config(Some(&path)).is_err());

        fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_audit_once_rejects_invalid_params() {
        let params = TechnicalAuditParams {
            crawl_depth: 9,
            ..TechnicalAuditParams::new("example.com")
        };

        let err = audit_once(WorkerConfig::default(), params, None).await.unwrap_err();
        assert!(err.to_string().contains("crawl_depth"));
    }
}
