use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging system.
///
/// `RUST_LOG` is honoured; the crate's own level is raised to `debug`
/// under `verbose`. A file layer without ANSI colours is added when
/// `log_file` is given.
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let crate_level = if verbose {
        "seo_audit_worker=debug"
    } else {
        "seo_audit_worker=info"
    };
    let env_filter = EnvFilter::from_default_env()
        .add_directive(crate_level.parse()?)
        .add_directive("warn".parse()?);

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    match log_file {
        Some(log_file) => {
            if let Some(parent) = log_file.parent() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create log directory {}", parent.display()))?;
            }

            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .context(format!("Failed to open log file {}", log_file.display()))?;
            let file_layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(file);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
        }
    }

    Ok(())
}

/// Default log file under the platform data directory
pub fn default_log_file() -> PathBuf {
    let mut path = match directories::ProjectDirs::from("cz", "macroconsulting", "seo-audit-worker") {
        Some(proj_dirs) => proj_dirs.data_dir().to_path_buf(),
        None => PathBuf::from("./logs"),
    };

    path.push("audit-worker.log");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_file_name() {
        let path = default_log_file();
        assert_eq!(path.file_name().unwrap(), "audit-worker.log");
    }
}
