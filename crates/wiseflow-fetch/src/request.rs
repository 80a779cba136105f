//! Request/response shapes for one fetch call.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    pub fn is_cacheable(&self) -> bool {
        matches!(self, Method::Get)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// One fetch call. `query` is carried separately from `url` so the
/// cache key can be computed without re-parsing the URL.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
    /// Skip the cache for this call even if otherwise cacheable
    /// (spec.md §4.6 per-run `force_refresh` override).
    pub force_refresh: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            body: None,
            headers: HashMap::new(),
            timeout: None,
            force_refresh: false,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(url)
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    /// The key under which the cache/rate-governor address this
    /// request's endpoint — the authority part of the URL (host[:port]),
    /// used as the rate-governor key, separate from the cache key which
    /// covers the full `(method, path, query)` tuple.
    pub fn authority(&self) -> String {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| self.url.clone())
    }

    pub fn path(&self) -> String {
        url::Url::parse(&self.url)
            .ok()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| self.url.clone())
    }
}

/// A successful fetch result.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub from_cache: bool,
}

impl FetchResponse {
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
