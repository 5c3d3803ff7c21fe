use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::analyzers::{self, AnalyzerInput, Severity};
use crate::cli::config::WorkerConfig;
use crate::crawler::{CrawlParams, CrawledPage, CrawlerController};
use crate::pagespeed::{self, PageSpeedClient, PageSpeedResult};
use crate::report::{assemble, AssemblyInput, CrawlStats, ReportCompiler, TechnicalAuditResult};
use crate::storage::Job;
use crate::worker::progress::{BandProgress, JobTimedOut, ProgressBand, ProgressReporter};
use crate::worker::registry::JobHandler;

pub const MIN_CRAWL_DEPTH: u32 = 1;
pub const MAX_CRAWL_DEPTH: u32 = 5;
pub const MIN_MAX_PAGES: usize = 10;
pub const MAX_MAX_PAGES: usize = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("Invalid job parameters: {0}")]
    Malformed(String),

    #[error("Invalid job parameters: domain must not be empty")]
    EmptyDomain,

    #[error("Invalid job parameters: crawl_depth must be between 1 and 5, got {0}")]
    CrawlDepth(u32),

    #[error("Invalid job parameters: max_pages must be between 10 and 500, got {0}")]
    MaxPages(usize),
}

/// Input of a `seo.technical-audit` job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicalAuditParams {
    pub domain: String,

    #[serde(default = "default_crawl_depth")]
    pub crawl_depth: u32,

    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Free-text notes from the operator, passed to the AI compiler
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

fn default_crawl_depth() -> u32 {
    3
}

fn default_max_pages() -> usize {
    100
}

impl TechnicalAuditParams {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: bare_host(domain),
            crawl_depth: default_crawl_depth(),
            max_pages: default_max_pages(),
            custom_instructions: None,
        }
    }

    /// Parse and validate raw job parameters
    pub fn from_value(value: &Value) -> Result<Self, ParamsError> {
        let mut params: Self = serde_json::from_value(value.clone())
            .map_err(|e| ParamsError::Malformed(e.to_string()))?;
        params.domain = bare_host(&params.domain);
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.domain.is_empty() {
            return Err(ParamsError::EmptyDomain);
        }
        if !(MIN_CRAWL_DEPTH..=MAX_CRAWL_DEPTH).contains(&self.crawl_depth) {
            return Err(ParamsError::CrawlDepth(self.crawl_depth));
        }
        if !(MIN_MAX_PAGES..=MAX_MAX_PAGES).contains(&self.max_pages) {
            return Err(ParamsError::MaxPages(self.max_pages));
        }
        Ok(())
    }
}

/// `https://Example.com/path?q` -> `example.com`
fn bare_host(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map_or(trimmed, |(_, rest)| rest);

    without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Crawl, measure, analyze, compile and assemble one technical audit
pub struct TechnicalAuditHandler {
    crawler: CrawlerController,
    pagespeed: Option<PageSpeedClient>,
    compiler: ReportCompiler,
    top_pages: usize,
}

impl TechnicalAuditHandler {
    pub fn new(config: &WorkerConfig) -> Result<Self> {
        let pagespeed = if config.pagespeed.enabled {
            Some(PageSpeedClient::new(config.pagespeed.clone())?)
        } else {
            None
        };

        Ok(Self {
            crawler: CrawlerController::new(config.crawler.clone())?,
            pagespeed,
            compiler: ReportCompiler::new(config.ai.clone())?,
            top_pages: config.pagespeed.top_pages,
        })
    }

    /// Run the audit pipeline, reporting progress through the job bands
    pub async fn run(
        &self,
        params: &TechnicalAuditParams,
        progress: &dyn ProgressReporter,
    ) -> Result<TechnicalAuditResult> {
        let started = Instant::now();

        progress
            .update(ProgressBand::CRAWL.start, "Zahajuji crawling...")
            .await?;

        let crawl_params = CrawlParams {
            domain: params.domain.clone(),
            max_depth: params.crawl_depth,
            max_pages: params.max_pages,
        };
        let crawl_progress = BandProgress::new(progress, ProgressBand::CRAWL, |done, total| {
            format!("Crawling... {}/{} stránek", done, total)
        });
        let crawl = self
            .crawler
            .crawl(&crawl_params, &crawl_progress)
            .await
            .map_err(|e| {
                if e.is::<JobTimedOut>() {
                    e
                } else {
                    let message = format!("Crawl selhal: {}", e);
                    e.context(message)
                }
            })?;

        info!(
            pages = crawl.pages.len(),
            sitemap_urls = crawl.sitemap_urls.len(),
            base_url = %crawl.base_url,
            "Crawl complete"
        );

        progress
            .update(ProgressBand::PERFORMANCE.start, "Měřím rychlost stránek (PageSpeed)...")
            .await?;
        let pagespeed = self.measure_performance(&crawl.pages, progress).await?;

        progress
            .update(ProgressBand::ANALYSIS.start, "Analyzuji data...")
            .await?;
        let input = Arc::new(AnalyzerInput {
            pages: crawl.pages,
            robots_txt: crawl.robots_txt,
            sitemap_urls: crawl.sitemap_urls,
            pagespeed,
            llms_txt_found: crawl.llms_txt_found,
        });
        let findings = analyzers::run_all(input.clone()).await?;

        info!(
            total = findings.total(),
            critical = findings.count(Severity::Critical),
            warning = findings.count(Severity::Warning),
            info = findings.count(Severity::Info),
            "Analysis complete"
        );

        progress
            .update(ProgressBand::AI.start, "Generuji AI report...")
            .await?;
        let stats = CrawlStats {
            domain: params.domain.clone(),
            total_pages_crawled: input.pages.len(),
            crawl_depth_used: params.crawl_depth,
            crawl_duration_ms: elapsed_ms(started),
        };
        let ai_report = self
            .compiler
            .compile(&findings.all(), &stats, params.custom_instructions.as_deref())
            .await;
        if ai_report.is_none() {
            warn!("No AI report, proceeding with automated findings only");
        }

        progress
            .update(ProgressBand::ASSEMBLY.start, "Sestavuji finální report...")
            .await?;

        Ok(assemble(AssemblyInput {
            pages: &input.pages,
            findings: &findings,
            ai_report: ai_report.as_ref(),
            crawl_duration_ms: elapsed_ms(started),
        }))
    }

    /// PageSpeed results for the homepage and the most-linked pages.
    /// Prober failures degrade to no data; a timed-out job still aborts.
    async fn measure_performance(
        &self,
        pages: &[CrawledPage],
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<PageSpeedResult>> {
        let Some(client) = &self.pagespeed else {
            return Ok(Vec::new());
        };

        let urls = pagespeed::select_urls(pages, self.top_pages);
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let stage = BandProgress::new(progress, ProgressBand::PERFORMANCE, |done, total| {
            format!("PageSpeed... {}/{} měření", done, total)
        });

        match client.run(&urls, &stage).await {
            Ok(results) => Ok(results),
            Err(e) if e.is::<JobTimedOut>() => Err(e),
            Err(e) => {
                warn!(error = %e, "PageSpeed failed, continuing without performance data");
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl JobHandler for TechnicalAuditHandler {
    async fn handle(&self, job: &Job, progress: &dyn ProgressReporter) -> Result<Value> {
        progress
            .update(ProgressBand::PREP.start, "Příprava auditu...")
            .await?;

        let params = TechnicalAuditParams::from_value(&job.params)?;
        info!(
            job_id = %job.id,
            domain = %params.domain,
            crawl_depth = params.crawl_depth,
            max_pages = params.max_pages,
            "Starting technical audit"
        );

        let result = self.run(&params, progress).await?;

        info!(
            job_id = %job.id,
            score = result.summary.overall_score,
            total_issues = result.summary.total_issues,
            duration_ms = result.summary.crawl_duration_ms,
            "Technical audit complete"
        );

        serde_json::to_value(&result).context("Failed to serialize audit result")
    }
}
