//! Web Connector (C6): crawl a URL list under the Rate Governor,
//! skipping binary extensions, normalizing each page into a `DataItem`
//! (spec.md §4.6).
//!
//! Grounded on
//! `examples/original_source/core/connectors/web/__init__.py`'s
//! `DomainRateLimiter`-gated crawl loop and bounded failed-URL map.

mod stats;

pub use stats::{FailedUrl, WebStats};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;
use wiseflow_connector::{Connector, ConnectorParams};
use wiseflow_core::collaborators::{FetchOptions, HTMLFetcher};
use wiseflow_core::error::{EngineError, EngineResult};
use wiseflow_core::item::DataItem;
use wiseflow_ratelimit::RateGovernor;

const BINARY_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "doc", "xls", "xlsx", "zip", "rar", "7z", "tar", "gz", "mp4", "mov", "avi",
    "mkv", "mp3", "wav", "jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "ico", "exe", "dmg",
];

#[derive(Debug, Clone)]
pub struct WebConnectorConfig {
    pub concurrency: usize,
    pub timeout_s: u64,
    pub failed_url_capacity: usize,
}

impl Default for WebConnectorConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            timeout_s: 30,
            failed_url_capacity: 500,
        }
    }
}

/// The Web Connector.
pub struct WebConnector {
    fetcher: Arc<dyn HTMLFetcher>,
    governor: Arc<RateGovernor>,
    semaphore: Arc<tokio::sync::Semaphore>,
    config: WebConnectorConfig,
    stats: Mutex<WebStats>,
    failed: Mutex<stats::FailedUrlMap>,
}

impl WebConnector {
    pub fn new(fetcher: Arc<dyn HTMLFetcher>, governor: Arc<RateGovernor>, config: WebConnectorConfig) -> Self {
        Self {
            semaphore: Arc::new(tokio::sync::Semaphore::new(config.concurrency.max(1))),
            failed: Mutex::new(stats::FailedUrlMap::new(config.failed_url_capacity)),
            fetcher,
            governor,
            config,
            stats: Mutex::new(WebStats::default()),
        }
    }

    pub fn stats(&self) -> WebStats {
        self.stats.lock().unwrap().clone()
    }

    pub fn failed_urls(&self) -> HashMap<String, FailedUrl> {
        self.failed.lock().unwrap().snapshot()
    }

    /// Re-enqueues failed URLs younger than `max_age_minutes` whose
    /// attempts are below `retry_count`, re-running them through
    /// [`WebConnector::crawl`] (spec.md §4.6).
    pub async fn retry_failed_urls(&self, max_age_minutes: u64, retry_count: u32) -> Vec<DataItem> {
        let urls = self
            .failed
            .lock()
            .unwrap()
            .retryable(Duration::from_secs(max_age_minutes * 60), retry_count);
        self.crawl(&urls, &FetchOptions::default()).await
    }

    /// Zero URLs returns immediately with no fetcher use (spec.md §8
    /// boundary behavior).
    pub async fn crawl(&self, urls: &[String], overrides: &FetchOptions) -> Vec<DataItem> {
        if urls.is_empty() {
            return Vec::new();
        }

        let mut items = Vec::with_capacity(urls.len());
        let mut handles = Vec::with_capacity(urls.len());

        for url in urls {
            let url = url.clone();
            let overrides = overrides.clone();
            let semaphore = self.semaphore.clone();
            let fetcher = self.fetcher.clone();
            let governor = self.governor.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                crawl_one(&fetcher, &governor, &url, &overrides).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(Some(item))) => {
                    let domain = item
                        .metadata
                        .get("domain")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    self.stats.lock().unwrap().record_success(
                        &domain,
                        Duration::from_millis(
                            item.metadata
                                .get("crawl_duration_ms")
                                .and_then(|v| v.as_u64())
                                .unwrap_or(0),
                        ),
                        false,
                    );
                    self.failed.lock().unwrap().clear(&item.url.clone().unwrap_or_default());
                    items.push(item);
                }
                Ok(Ok(None)) => {}
                Ok(Err((url, err))) => {
                    let domain = domain_of(&url);
                    self.stats.lock().unwrap().record_failure(&domain);
                    self.failed.lock().unwrap().record(&url, err.to_string());
                    warn!(url, %err, "web crawl failed");
                }
                Err(join_err) => {
                    warn!(%join_err, "web crawl task panicked");
                }
            }
        }

        items
    }
}

fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}

fn is_binary_url(url: &str) -> bool {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let lower = path.to_ascii_lowercase();
    BINARY_EXTENSIONS.iter().any(|ext| lower.ends_with(&format!(".{ext}")))
}

async fn crawl_one(
    fetcher: &Arc<dyn HTMLFetcher>,
    governor: &Arc<RateGovernor>,
    url: &str,
    overrides: &FetchOptions,
) -> Result<Option<DataItem>, (String, EngineError)> {
    if is_binary_url(url) {
        return Ok(None);
    }

    let domain = domain_of(url);
    governor.wait_if_throttled(&domain).await;
    governor.register(&domain);

    let start = Instant::now();
    let page = fetcher
        .fetch(url, overrides)
        .await
        .map_err(|err| (url.to_string(), err))?;
    let elapsed = start.elapsed();

    governor.adapt(&domain, elapsed, page.http_status);

    let word_count = page.markdown.split_whitespace().count();
    let author = page.author.clone().unwrap_or_else(|| domain.clone());

    let item = DataItem::new(url, page.markdown, "text/markdown")
        .with_url(url)
        .with_metadata("domain", domain)
        .with_metadata("crawl_duration_ms", elapsed.as_millis() as u64)
        .with_metadata("word_count", word_count as u64)
        .with_metadata("author", author)
        .with_metadata("media", serde_json::json!(page.media));

    let item = if let Some(title) = page.title {
        item.with_metadata("title", title)
    } else {
        item
    };
    let item = if let Some(publish_date) = page.publish_date {
        item.with_metadata("publish_date", publish_date)
    } else {
        item
    };

    Ok(Some(item))
}

#[async_trait]
impl Connector for WebConnector {
    fn name(&self) -> &str {
        "web"
    }

    fn connector_type(&self) -> &str {
        "web"
    }

    async fn initialize(&self) -> EngineResult<bool> {
        Ok(true)
    }

    async fn shutdown(&self) -> EngineResult<bool> {
        Ok(true)
    }

    async fn collect(&self, params: &ConnectorParams) -> EngineResult<Vec<DataItem>> {
        let urls: Vec<String> = params
            .get("urls")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let mut overrides = FetchOptions::default();
        if let Some(timeout) = params.get("timeout_s").and_then(|v| v.as_u64()) {
            overrides.timeout_s = Some(timeout);
        }
        if params.get("force_refresh").and_then(|v| v.as_bool()).unwrap_or(false) {
            overrides.force_refresh = true;
        }

        Ok(self.crawl(&urls, &overrides).await)
    }

    fn raw_config(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("concurrency".to_string(), serde_json::json!(self.config.concurrency));
        map.insert("timeout_s".to_string(), serde_json::json!(self.config.timeout_s));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiseflow_core::collaborators::RenderedPage;

    struct StubFetcher {
        ok: bool,
    }

    #[async_trait]
    impl HTMLFetcher for StubFetcher {
        async fn fetch(&self, url: &str, _opts: &FetchOptions) -> EngineResult<RenderedPage> {
            if self.ok {
                Ok(RenderedPage {
                    markdown: "# hello world".to_string(),
                    title: Some("Hello".to_string()),
                    author: None,
                    publish_date: None,
                    media: vec![],
                    http_status: Some(200),
                })
            } else {
                let _ = url;
                Err(EngineError::Transport("boom".into()))
            }
        }
    }

    #[tokio::test]
    async fn zero_urls_returns_immediately() {
        let connector = WebConnector::new(
            Arc::new(StubFetcher { ok: true }),
            Arc::new(RateGovernor::with_defaults()),
            WebConnectorConfig::default(),
        );
        let items = connector.crawl(&[], &FetchOptions::default()).await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn binary_extensions_are_skipped() {
        let connector = WebConnector::new(
            Arc::new(StubFetcher { ok: true }),
            Arc::new(RateGovernor::with_defaults()),
            WebConnectorConfig::default(),
        );
        let items = connector
            .crawl(&["https://example.com/file.pdf".to_string()], &FetchOptions::default())
            .await;
        assert!(items.is_empty());
        assert_eq!(connector.stats().total_requests, 0);
    }

    #[tokio::test]
    async fn successful_crawl_produces_markdown_item() {
        let connector = WebConnector::new(
            Arc::new(StubFetcher { ok: true }),
            Arc::new(RateGovernor::with_defaults()),
            WebConnectorConfig::default(),
        );
        let items = connector
            .crawl(&["https://example.com/a".to_string()], &FetchOptions::default())
            .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content_type, "text/markdown");
        assert_eq!(connector.stats().successful_requests, 1);
    }

    #[tokio::test]
    async fn failed_crawl_is_recorded_and_retryable() {
        let connector = WebConnector::new(
            Arc::new(StubFetcher { ok: false }),
            Arc::new(RateGovernor::with_defaults()),
            WebConnectorConfig::default(),
        );
        let items = connector
            .crawl(&["https://example.com/b".to_string()], &FetchOptions::default())
            .await;
        assert!(items.is_empty());
        assert_eq!(connector.failed_urls().len(), 1);

        let retried = connector.retry_failed_urls(60, 5).await;
        assert!(retried.is_empty());
        assert_eq!(connector.failed_urls()["https://example.com/b"].attempts, 2);
    }
}
