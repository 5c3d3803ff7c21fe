pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::cli::config::WorkerConfig;
use crate::worker::TechnicalAuditParams;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the job store and process queued jobs until interrupted
    Run,

    /// Audit one domain locally, without the job store
    Audit {
        /// Domain to audit, e.g. example.com
        #[arg(required = true)]
        domain: String,

        /// Maximum crawl depth (1-5)
        #[arg(short, long, default_value_t = 3)]
        depth: u32,

        /// Maximum number of pages to crawl (10-500)
        #[arg(short = 'p', long, default_value_t = 100)]
        max_pages: usize,

        /// Context for the AI report, e.g. the client's business
        #[arg(short, long)]
        notes: Option<String>,

        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run => {
            let config = WorkerConfig::load(config_path)?;
            commands::run_worker(config).await
        }
        Commands::Audit {
            domain,
            depth,
            max_pages,
            notes,
            output,
        } => {
            let config = WorkerConfig::load(config_path)?;
            let params = TechnicalAuditParams {
                crawl_depth: depth,
                max_pages,
                custom_instructions: notes,
                ..TechnicalAuditParams::new(&domain)
            };
            info!("Auditing {} (depth {}, max {} pages)", params.domain, depth, max_pages);
            commands::audit_once(config, params, output).await
        }
        Commands::Config { init } => {
            if init {
                commands::init_config(config_path)
            } else {
                let config = WorkerConfig::load(config_path)?;
                commands::show_config(&config, config_path)
            }
        }
    }
}
