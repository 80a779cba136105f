//! Fetcher (C4): the uniform HTTP call every connector routes through —
//! conditional headers, governor-aware throttling, retry on 5xx/429
//! honoring provider rate-limit signals, and response caching for
//! idempotent GETs (spec.md §4.4).
//!
//! Grounded on the teacher's retry/backoff shape
//! (`tower-resilience-retry::lib`) for the exponential-backoff-with-
//! `Retry-After` loop, and on `wiseflow-ratelimit`/`wiseflow-cache` for
//! the two collaborators this component sits between.

pub mod config;
pub mod request;

pub use config::FetchConfig;
pub use request::{FetchRequest, FetchResponse, Method};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wiseflow_cache::{cache_key, ResponseCache};
use wiseflow_core::error::{EngineError, EngineResult};
use wiseflow_ratelimit::RateGovernor;

/// The Fetcher. One instance is typically owned per connector, sized by
/// that connector's declared concurrency (spec.md §4.4 "Attempts capped
/// ... All fetches funnel through a concurrency semaphore sized by the
/// connector").
pub struct Fetcher {
    client: reqwest::Client,
    governor: Arc<RateGovernor>,
    cache: Option<Arc<ResponseCache>>,
    semaphore: Arc<tokio::sync::Semaphore>,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(
        governor: Arc<RateGovernor>,
        cache: Option<Arc<ResponseCache>>,
        config: FetchConfig,
    ) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            governor,
            cache,
            semaphore: Arc::new(tokio::sync::Semaphore::new(config.concurrency.max(1))),
            config,
        })
    }

    /// Performs one logical call, including cache lookups, conditional
    /// revalidation, throttling, and retries (spec.md §4.4 steps 1-9).
    pub async fn call(&self, request: FetchRequest) -> EngineResult<FetchResponse> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| EngineError::Cancelled)?;

        let cacheable = request.method.is_cacheable() && self.cache.is_some() && !request.force_refresh;
        let key = cache_key(request.method.as_str(), &request.path(), &request.query);

        if cacheable {
            if let Some(cache) = &self.cache {
                if let Some(hit) = cache.get(&key).await {
                    debug!(url = %request.url, "fetch served from cache");
                    return Ok(FetchResponse {
                        status: 200,
                        headers: Default::default(),
                        body: serde_json::to_vec(&hit.body).unwrap_or_default(),
                        from_cache: true,
                    });
                }
            }
        }

        let known_etag = if request.method.is_cacheable() {
            self.cache.as_ref().and_then(|c| c.etag(&key))
        } else {
            None
        };

        let authority = request.authority();
        let mut attempt = 0usize;

        loop {
            self.governor.wait_if_throttled(&authority).await;

            let start = Instant::now();
            let outcome = self.send_once(&request, known_etag.as_deref()).await;
            self.governor.register(&authority);

            match outcome {
                Ok(response) if response.status == 304 => {
                    self.governor.adapt(&authority, start.elapsed(), Some(304));
                    if let Some(cache) = &self.cache {
                        cache.revalidate(&key).await?;
                        if let Some(hit) = cache.get(&key).await {
                            return Ok(FetchResponse {
                                status: 200,
                                headers: response.headers,
                                body: serde_json::to_vec(&hit.body).unwrap_or_default(),
                                from_cache: true,
                            });
                        }
                    }
                    return Ok(response);
                }
                Ok(response) if (200..300).contains(&response.status) => {
                    self.governor.adapt(&authority, start.elapsed(), Some(response.status));
                    if cacheable {
                        if let (Some(cache), Ok(body)) = (&self.cache, response.json()) {
                            let etag = response.headers.get("etag").cloned();
                            cache.put(&key, body, etag).await?;
                        }
                    }
                    return Ok(response);
                }
                Ok(response) if response.status == 429 => {
                    self.governor.adapt(&authority, start.elapsed(), Some(429));
                    let reset = parse_reset(&response.headers);
                    let wait = reset
                        .map(|r| r.saturating_add(Duration::from_secs(5)))
                        .unwrap_or(Duration::from_secs(5))
                        .max(Duration::from_secs(1));
                    warn!(url = %request.url, ?wait, "rate limited, retrying after reset");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(EngineError::RateLimited { reset });
                    }
                    continue;
                }
                Ok(response) if response.status >= 500 => {
                    self.governor.adapt(&authority, start.elapsed(), Some(response.status));
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(EngineError::ServerError { status: response.status });
                    }
                    let wait = parse_retry_after(&response.headers)
                        .unwrap_or_else(|| self.config.retry_delay * 2u32.pow(attempt as u32 - 1));
                    warn!(url = %request.url, attempt, ?wait, "server error, retrying");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Ok(response) => {
                    self.governor.adapt(&authority, start.elapsed(), Some(response.status));
                    return Err(classify_client_error(response.status, &response.body));
                }
                Err(err) => {
                    self.governor.adapt(&authority, start.elapsed(), None);
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(err);
                    }
                    let wait = self.config.retry_delay * 2u32.pow(attempt as u32 - 1);
                    warn!(url = %request.url, attempt, ?wait, %err, "transport error, retrying");
                    tokio::time::sleep(wait).await;
                    continue;
                }
            }
        }
    }

    async fn send_once(
        &self,
        request: &FetchRequest,
        etag: Option<&str>,
    ) -> EngineResult<FetchResponse> {
        let mut builder = self
            .client
            .request(request.method.as_reqwest(), &request.url)
            .query(&request.query);

        for (k, v) in &request.headers {
            builder = builder.header(k, v);
        }
        if let Some(etag) = etag {
            builder = builder.header("If-None-Match", etag);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?
            .to_vec();

        Ok(FetchResponse {
            status,
            headers,
            body,
            from_cache: false,
        })
    }
}

fn parse_reset(headers: &std::collections::HashMap<String, String>) -> Option<Duration> {
    let reset_unix: i64 = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("x-ratelimit-reset"))
        .and_then(|(_, v)| v.parse().ok())?;
    let now_unix = chrono::Utc::now().timestamp();
    let delta = reset_unix - now_unix;
    Some(Duration::from_secs(delta.max(0) as u64))
}

fn parse_retry_after(headers: &std::collections::HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, v)| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn classify_client_error(status: u16, body: &[u8]) -> EngineError {
    let message = String::from_utf8_lossy(body).to_string();
    match status {
        404 => EngineError::NotFound,
        401 | 403 => EngineError::AuthFailed,
        422 => EngineError::Validation { message },
        _ => EngineError::ProviderError {
            code: status,
            message,
            details: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_4xx_by_status() {
        assert!(matches!(classify_client_error(404, b""), EngineError::NotFound));
        assert!(matches!(classify_client_error(401, b""), EngineError::AuthFailed));
        assert!(matches!(classify_client_error(403, b""), EngineError::AuthFailed));
        assert!(matches!(
            classify_client_error(422, b"bad"),
            EngineError::Validation { .. }
        ));
        assert!(matches!(
            classify_client_error(400, b""),
            EngineError::ProviderError { code: 400, .. }
        ));
    }

    #[test]
    fn parses_retry_after_seconds() {
        let mut headers = std::collections::HashMap::new();
        headers.insert("Retry-After".to_string(), "7".to_string());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
    }
}
