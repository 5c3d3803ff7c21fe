use anyhow::{Context, Result};
use futures::future::join_all;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::cli::config::CrawlerSettings;
use crate::crawler::page::{CrawledPage, FetchedResponse, PageParser, ParsedPage, RedirectHop};
use crate::crawler::robots::RobotsRules;
use crate::crawler::scheduler::{clean_url, normalize_url, Scheduler};
use crate::crawler::sitemap::SitemapParser;
use crate::crawler::task::{CrawlParams, CrawlResult, CrawlTask};
use crate::utils::metrics::{FetchOutcome, MetricsCollector};
use crate::worker::progress::StageProgress;

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Crawl returned no pages for {domain}; check the domain and robots.txt")]
    NoPages { domain: String },
}

/// What a single page fetch produced
enum PageFetch {
    Parsed(ParsedPage),
    Unresolved(CrawledPage),
    NonHtml,
}

/// Breadth-first, same-origin site crawler
pub struct CrawlerController {
    config: CrawlerSettings,

    /// Client for page fetches; redirects are followed by hand
    client: Client,

    /// Client for the origin probe and auxiliary files; follows redirects
    probe_client: Client,

    parser: PageParser,
    sitemap_parser: SitemapParser,
}

impl CrawlerController {
    /// Create a new crawler with the given settings
    pub fn new(config: CrawlerSettings) -> Result<Self> {
        let timeout = Duration::from_millis(config.request_timeout);

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .context("Failed to build crawl HTTP client")?;

        let probe_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(timeout)
            .redirect(Policy::limited(config.max_redirects))
            .build()
            .context("Failed to build probe HTTP client")?;

        Ok(Self {
            config,
            client,
            probe_client,
            parser: PageParser::new()?,
            sitemap_parser: SitemapParser::new()?,
        })
    }

    /// Crawl a site within the given budgets
    pub async fn crawl(
        &self,
        params: &CrawlParams,
        progress: &dyn StageProgress,
    ) -> Result<CrawlResult> {
        let metrics = MetricsCollector::new();

        // Step 1: resolve the canonical origin
        let origin = self.resolve_origin(&params.domain).await?;
        let base_url = origin.origin().ascii_serialization();
        info!(domain = %params.domain, base_url = %base_url, "Resolved base URL");

        // Step 2: robots.txt
        let robots_txt = self.fetch_robots(&base_url).await;
        let robots = robots_txt
            .as_deref()
            .map(RobotsRules::parse)
            .unwrap_or_default();

        // Step 3: sitemaps
        let sitemap_urls = self.fetch_sitemap_urls(&base_url, &robots).await;
        let llms_txt_found = self.probe_llms_txt(&base_url).await;

        // Step 4: BFS crawl
        let mut scheduler = Scheduler::new(origin.clone(), robots, self.config.user_agent.clone());
        scheduler.enqueue(&format!("{}/", base_url), 0);
        if params.max_depth >= 1 {
            for sitemap_url in &sitemap_urls {
                match Url::parse(sitemap_url) {
                    Ok(url) if url.origin() == origin.origin() => {
                        scheduler.enqueue(&clean_url(&url), 1)
                    }
                    _ => {}
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let politeness = Duration::from_millis(self.config.politeness_delay);
        let mut pages: Vec<CrawledPage> = Vec::new();
        let mut last_report = 0;

        while pages.len() < params.max_pages {
            let budget = (params.max_pages - pages.len()).min(self.config.max_concurrency.max(1));
            let batch = scheduler.next_batch(budget);
            if batch.is_empty() {
                break;
            }

            let fetches = batch.into_iter().map(|task| {
                let semaphore = semaphore.clone();
                let metrics = &metrics;
                let origin = &origin;
                async move {
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            tokio::time::sleep(politeness).await;
                            self.fetch_page(&task, origin, metrics).await
                        }
                        Err(e) => Err(e.into()),
                    };
                    (task, result)
                }
            });

            for (task, result) in join_all(fetches).await {
                let parsed = match result {
                    Ok(PageFetch::Parsed(parsed)) => parsed,
                    Ok(PageFetch::Unresolved(page)) => ParsedPage {
                        page,
                        discovered: Vec::new(),
                    },
                    Ok(PageFetch::NonHtml) => {
                        debug!(url = %task.url, "Skipping non-HTML response");
                        continue;
                    }
                    Err(e) => {
                        warn!(url = %task.url, error = %e, "Failed to fetch page");
                        continue;
                    }
                };

                pages.push(parsed.page);

                // Discover new URLs
                if task.depth < params.max_depth && pages.len() < params.max_pages {
                    for url in &parsed.discovered {
                        scheduler.enqueue(url, task.depth + 1);
                    }
                }

                if pages.len() - last_report >= self.config.progress_every.max(1) {
                    last_report = pages.len();
                    progress.report(pages.len(), params.max_pages).await?;
                }
            }
        }

        // Final progress report
        progress.report(pages.len(), params.max_pages).await?;

        info!(
            pages = pages.len(),
            visited = scheduler.seen_count(),
            max_pages = params.max_pages,
            "Crawl finished"
        );
        metrics.log_summary(&base_url).await;

        if pages.is_empty() {
            return Err(CrawlError::NoPages {
                domain: params.domain.clone(),
            }
            .into());
        }

        Ok(CrawlResult {
            pages,
            robots_txt,
            sitemap_urls,
            base_url,
            llms_txt_found,
            metrics: metrics.get_metrics().await,
        })
    }

    /// Try the usual origin candidates; the first one that answers wins
    async fn resolve_origin(&self, domain: &str) -> Result<Url> {
        let candidates = [
            format!("https://{}", domain),
            format!("https://www.{}", domain),
            format!("http://{}", domain),
        ];

        for candidate in &candidates {
            match self.probe_client.head(candidate).send().await {
                Ok(response) => return Ok(response.url().clone()),
                Err(e) => debug!(candidate = %candidate, error = %e, "Origin candidate unreachable"),
            }
        }

        // Fallback
        let fallback = format!("https://{}", domain);
        Url::parse(&fallback).context(format!("Invalid domain: {}", domain))
    }

    /// Fetch a small text resource, `None` unless it answers with success
    async fn fetch_text(&self, url: &str) -> Option<String> {
        let response = match self.probe_client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(url = %url, status = response.status().as_u16(), "Resource not available");
            return None;
        }

        match response.text().await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read response body");
                None
            }
        }
    }

    async fn fetch_robots(&self, base_url: &str) -> Option<String> {
        let robots = self.fetch_text(&format!("{}/robots.txt", base_url)).await;
        if robots.is_none() {
            warn!(base_url = %base_url, "robots.txt not found");
        }
        robots
    }

    async fn probe_llms_txt(&self, base_url: &str) -> bool {
        let url = format!("{}/llms.txt", base_url);
        match self.probe_client.get(&url).send().await {
            Ok(response) => response.status().as_u16() == 200,
            Err(_) => false,
        }
    }

    /// Collect sitemap URLs, expanding sitemap indexes one level
    async fn fetch_sitemap_urls(&self, base_url: &str, robots: &RobotsRules) -> Vec<String> {
        let mut sources: Vec<String> = robots.sitemaps().to_vec();
        if sources.is_empty() {
            sources.push(format!("{}/sitemap.xml", base_url));
        }

        let mut seen = HashSet::new();
        let mut collected = Vec::new();
        let mut collect = |urls: Vec<String>| {
            for url in urls {
                if seen.insert(url.clone()) {
                    collected.push(url);
                }
            }
        };

        for source in &sources {
            let Some(xml) = self.fetch_text(source).await else {
                continue;
            };
            let document = self.sitemap_parser.parse(&xml);

            for child in &document.child_sitemaps {
                // Children are read as urlsets only; nested indexes are not followed
                if let Some(child_xml) = self.fetch_text(child).await {
                    collect(self.sitemap_parser.parse(&child_xml).urls);
                }
            }
            collect(document.urls);
        }

        info!(count = collected.len(), "Sitemap URLs collected");
        collected
    }

    /// Fetch one page, following redirects by hand
    async fn fetch_page(
        &self,
        task: &CrawlTask,
        origin: &Url,
        metrics: &MetricsCollector,
    ) -> Result<PageFetch> {
        let timer = metrics.start_timer();
        let mut chain: Vec<RedirectHop> = Vec::new();
        let mut current = Url::parse(&task.url).context(format!("Invalid URL: {}", task.url))?;

        let response = loop {
            let response = match self
                .client
                .get(current.clone())
                .header(ACCEPT, HTML_ACCEPT)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    metrics.record_request(FetchOutcome::Failed, timer.end(), None, 0).await;
                    return Err(e).context(format!("Request to {} failed", current));
                }
            };

            let status = response.status();
            if !status.is_redirection() {
                break response;
            }

            let next = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|location| current.join(location).ok());

            let Some(next) = next else {
                // A redirect without a usable Location is treated as final
                break response;
            };

            let next_url = clean_url(&next);
            let revisits = chain.iter().any(|hop| normalize_url(&hop.from) == normalize_url(&next_url))
                || normalize_url(current.as_str()) == normalize_url(&next_url);
            chain.push(RedirectHop {
                from: clean_url(&current),
                to: next_url,
                status_code: status.as_u16(),
            });

            if revisits || chain.len() > self.config.max_redirects {
                warn!(url = %task.url, hops = chain.len(), "Redirects did not resolve");
                metrics
                    .record_request(FetchOutcome::Unresolved, timer.end(), Some(status.as_u16()), 0)
                    .await;
                return Ok(PageFetch::Unresolved(CrawledPage::redirect_only(
                    &task.url,
                    chain,
                    timer.end(),
                    task.depth,
                )));
            }

            current = next;
        };

        let status_code = response.status().as_u16();
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE).unwrap_or_default();
        let x_robots_tag = header(reqwest::header::HeaderName::from_static("x-robots-tag"));

        // Only parse HTML
        let lower = content_type.to_lowercase();
        if !lower.contains("text/html") && !lower.contains("application/xhtml") {
            metrics
                .record_request(FetchOutcome::SkippedNonHtml, timer.end(), Some(status_code), 0)
                .await;
            return Ok(PageFetch::NonHtml);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                metrics
                    .record_request(FetchOutcome::Failed, timer.end(), Some(status_code), 0)
                    .await;
                return Err(e).context(format!("Failed to read body of {}", task.url));
            }
        };
        let response_time_ms = timer.end();
        metrics
            .record_request(FetchOutcome::Parsed, response_time_ms, Some(status_code), body.len())
            .await;

        let fetched = FetchedResponse {
            url: task.url.clone(),
            status_code,
            redirect_chain: chain,
            response_time_ms,
            content_type,
            x_robots_tag,
            body,
        };

        Ok(PageFetch::Parsed(self.parser.parse(fetched, origin, task.depth)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> CrawlerSettings {
        CrawlerSettings {
            politeness_delay: 0,
            request_timeout: 5_000,
            ..CrawlerSettings::default()
        }
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8")
    }

    async fn fetch(server: &MockServer, route: &str) -> Result<PageFetch> {
        fetch_with(settings(), server, route).await
    }

    async fn fetch_with(
        settings: CrawlerSettings,
        server: &MockServer,
        route: &str,
    ) -> Result<PageFetch> {
        let crawler = CrawlerController::new(settings).unwrap();
        let origin = Url::parse(&server.uri()).unwrap();
        let task = CrawlTask {
            url: format!("{}{}", server.uri(), route),
            depth: 0,
        };
        crawler.fetch_page(&task, &origin, &MetricsCollector::new()).await
    }

    #[tokio::test]
    async fn test_fetch_page_records_redirect_chain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/middle"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/middle"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(html("<title>New</title><h1>New</h1>"))
            .mount(&server)
            .await;

        let PageFetch::Parsed(parsed) = fetch(&server, "/old").await.unwrap() else {
            panic!("expected a parsed page");
        };

        let page = parsed.page;
        assert_eq!(page.redirect_chain.len(), 2);
        assert_eq!(page.redirect_chain[0].status_code, 301);
        assert_eq!(page.redirect_chain[1].status_code, 302);
        assert_eq!(page.final_url, format!("{}/new", server.uri()));
        assert_eq!(page.title.as_deref(), Some("New"));
    }

    #[tokio::test]
    async fn test_fetch_page_stops_on_redirect_loop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/b"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/a"))
            .mount(&server)
            .await;

        let PageFetch::Unresolved(page) = fetch(&server, "/a").await.unwrap() else {
            panic!("expected an unresolved redirect");
        };

        assert_eq!(page.redirect_chain.len(), 2);
        assert_eq!(page.status_code, 301);
        assert_eq!(page.final_url, page.url);
    }

    async fn redirect_chain(server: &MockServer, hops: usize) {
        for hop in 0..hops {
            let target = if hop + 1 == hops {
                "/final".to_string()
            } else {
                format!("/r{}", hop + 1)
            };
            Mock::given(method("GET"))
                .and(path(format!("/r{}", hop)))
                .respond_with(ResponseTemplate::new(301).insert_header("location", target.as_str()))
                .mount(server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/final"))
            .respond_with(html("<title>Final</title>"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_page_follows_redirects_up_to_ceiling() {
        let server = MockServer::start().await;
        redirect_chain(&server, 2).await;
        let ceiling = CrawlerSettings {
            max_redirects: 2,
            ..settings()
        };

        let PageFetch::Parsed(parsed) = fetch_with(ceiling, &server, "/r0").await.unwrap() else {
            panic!("expected a parsed page");
        };
        assert_eq!(parsed.page.redirect_chain.len(), 2);
        assert_eq!(parsed.page.final_url, format!("{}/final", server.uri()));
    }

    #[tokio::test]
    async fn test_fetch_page_gives_up_past_ceiling() {
        let server = MockServer::start().await;
        redirect_chain(&server, 3).await;
        let ceiling = CrawlerSettings {
            max_redirects: 2,
            ..settings()
        };

        let PageFetch::Unresolved(page) = fetch_with(ceiling, &server, "/r0").await.unwrap() else {
            panic!("expected an unresolved redirect");
        };
        assert_eq!(page.redirect_chain.len(), 3);
        assert_eq!(page.status_code, 301);
    }

    #[tokio::test]
    async fn test_fetch_page_skips_non_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(vec![1, 2, 3]),
            )
            .mount(&server)
            .await;

        assert!(matches!(fetch(&server, "/file.pdf").await.unwrap(), PageFetch::NonHtml));
    }

    /// Root links to 30 sections, each section links to 30 leaves
    fn link_tree(request: &wiremock::Request) -> ResponseTemplate {
        let route = request.url.path().to_string();
        let links = |prefix: &str| {
            (0..30)
                .map(|i| format!("<a href=\"{}{}\">{}</a>", prefix, i, i))
                .collect::<String>()
        };

        match route.as_str() {
            "/" => html(&links("/s")),
            "/robots.txt" | "/sitemap.xml" | "/llms.txt" => ResponseTemplate::new(404),
            section if !section.contains('-') => html(&links(&format!("{}-", section))),
            _ => html("<p>leaf</p>"),
        }
    }

    async fn crawl_tree(server: &MockServer, max_depth: u32, max_pages: usize) -> Vec<CrawledPage> {
        let crawler = CrawlerController::new(settings()).unwrap();
        let params = CrawlParams {
            domain: server.address().to_string(),
            max_depth,
            max_pages,
        };
        crawler.crawl(&params, &()).await.unwrap().pages
    }

    #[tokio::test]
    async fn test_crawl_respects_depth_and_page_budgets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(link_tree)
            .mount(&server)
            .await;

        fn deepest(pages: &[CrawledPage]) -> u32 {
            pages.iter().map(|p| p.crawl_depth).max().unwrap()
        }

        let pages = crawl_tree(&server, 0, 10).await;
        assert_eq!(pages.len(), 1);
        assert_eq!(deepest(&pages), 0);

        let pages = crawl_tree(&server, 1, 10).await;
        assert_eq!(pages.len(), 10);
        assert_eq!(deepest(&pages), 1);

        let pages = crawl_tree(&server, 1, 1000).await;
        assert_eq!(pages.len(), 31);
        assert_eq!(deepest(&pages), 1);

        let pages = crawl_tree(&server, 2, 50).await;
        assert_eq!(pages.len(), 50);
        assert_eq!(deepest(&pages), 2);

        let mut urls: Vec<&str> = pages.iter().map(|p| p.url.as_str()).collect();
        urls.sort();
        urls.dedup();
        assert_eq!(urls.len(), 50);
    }

    #[tokio::test]
    async fn test_crawl_without_html_pages_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8, 2, 3], "application/pdf"))
            .mount(&server)
            .await;

        let crawler = CrawlerController::new(settings()).unwrap();
        let params = CrawlParams {
            domain: server.address().to_string(),
            max_depth: 2,
            max_pages: 10,
        };

        let err = crawler.crawl(&params, &()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CrawlError>(),
            Some(CrawlError::NoPages { domain }) if *domain == params.domain
        ));
    }

    #[tokio::test]
    async fn test_fetch_sitemap_urls_expands_index() {
        let server = MockServer::start().await;
        let base = server.uri();
        Mock::given(method("GET"))
            .and(path("/sitemap_index.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<sitemapindex><sitemap><loc>{base}/pages.xml</loc></sitemap></sitemapindex>"
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pages.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<urlset><url><loc>{base}/a</loc></url><url><loc>{base}/b</loc></url></urlset>"
            )))
            .mount(&server)
            .await;

        let crawler = CrawlerController::new(settings()).unwrap();
        let robots = RobotsRules::parse(&format!("Sitemap: {}/sitemap_index.xml\n", base));
        let urls = crawler.fetch_sitemap_urls(&base, &robots).await;

        assert_eq!(urls, vec![format!("{}/a", base), format!("{}/b", base)]);
    }
}
