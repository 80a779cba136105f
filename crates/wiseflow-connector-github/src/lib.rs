//! REST Connector (C7, GitHub-shaped): repo/issue/PR/user/search
//! operations over the Fetcher, with provider quota compliance and
//! conditional-request caching (spec.md §4.7).
//!
//! Grounded on
//! `examples/original_source/core/connectors/github/__init__.py`'s
//! operation surface (repo info, contents, commits, issues, pulls,
//! user info, search) and pagination loop, reworked onto
//! `wiseflow-fetch::Fetcher` for the actual HTTP/cache/retry mechanics.

mod auth;
mod markdown;
mod quota;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use wiseflow_connector::{Connector, ConnectorParams};
use wiseflow_core::error::{EngineError, EngineResult};
use wiseflow_core::item::DataItem;
use wiseflow_fetch::{FetchRequest, Fetcher};
use quota::QuotaTracker;

const API_BASE: &str = "https://api.github.com";
const PER_PAGE: u32 = 100;

#[derive(Debug, Clone)]
pub struct GithubConnectorConfig {
    pub api_base: String,
    pub max_items: usize,
}

impl Default for GithubConnectorConfig {
    fn default() -> Self {
        Self {
            api_base: API_BASE.to_string(),
            max_items: 500,
        }
    }
}

/// The GitHub-shaped REST Connector.
pub struct GithubConnector {
    fetcher: Arc<Fetcher>,
    token: Option<String>,
    quota: QuotaTracker,
    config: GithubConnectorConfig,
}

impl GithubConnector {
    pub fn new(fetcher: Arc<Fetcher>, token: Option<String>, config: GithubConnectorConfig) -> Self {
        Self {
            fetcher,
            token,
            quota: QuotaTracker::new(),
            config,
        }
    }

    fn authed_get(&self, path: &str) -> FetchRequest {
        let url = format!("{}{}", self.config.api_base, path);
        let mut request = FetchRequest::get(url);
        if let Some(token) = &self.token {
            request = request.header("Authorization", auth::authorization_header(token));
        }
        request.header("Accept", "application/vnd.github+json")
    }

    async fn call(&self, request: FetchRequest) -> EngineResult<Value> {
        self.quota.wait_if_exhausted().await;
        let response = self.fetcher.call(request).await?;
        self.quota.observe(&response.headers);
        response.json().map_err(|e| EngineError::Validation {
            message: format!("malformed github response: {e}"),
        })
    }

    /// Walks a paginated GitHub list endpoint, stopping at an empty page
    /// or once `max_items` results have accumulated (spec.md §4.7 "lazy
    /// sequence" pagination contract).
    async fn paginate(&self, path: &str, query: &[(&str, String)]) -> EngineResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let mut request = self.authed_get(path).query("per_page", PER_PAGE.to_string()).query("page", page.to_string());
            for (key, value) in query {
                request = request.query(*key, value.clone());
            }

            let payload = self.call(request).await?;
            let page_items = match payload.as_array() {
                Some(arr) => arr.clone(),
                None => vec![payload],
            };

            if page_items.is_empty() {
                break;
            }
            items.extend(page_items);
            if items.len() >= self.config.max_items {
                items.truncate(self.config.max_items);
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    pub async fn repo_info(&self, owner: &str, repo: &str) -> EngineResult<DataItem> {
        let path = format!("/repos/{owner}/{repo}");
        let payload = self.call(self.authed_get(&path)).await?;
        Ok(repo_info_to_item(owner, repo, &payload))
    }

    pub async fn repo_readme(&self, owner: &str, repo: &str) -> EngineResult<DataItem> {
        let path = format!("/repos/{owner}/{repo}/readme");
        let payload = self.call(self.authed_get(&path)).await?;
        let content = markdown::decode_file_content(&payload);
        Ok(DataItem::new(format!("github:{owner}/{repo}:readme"), content, "text/markdown")
            .with_url(format!("https://github.com/{owner}/{repo}"))
            .with_metadata("owner", owner)
            .with_metadata("repo", repo)
            .with_raw(payload))
    }

    /// Recursively walks a directory, emitting one `DataItem` per file
    /// (spec.md §4.7 "directory listing produces one item per file").
    pub async fn repo_contents(&self, owner: &str, repo: &str, path: &str) -> EngineResult<Vec<DataItem>> {
        let api_path = if path.is_empty() {
            format!("/repos/{owner}/{repo}/contents")
        } else {
            format!("/repos/{owner}/{repo}/contents/{path}")
        };
        let payload = self.call(self.authed_get(&api_path)).await?;

        match payload {
            Value::Array(entries) => {
                let mut items = Vec::new();
                for entry in entries {
                    let entry_path = entry.get("path").and_then(|v| v.as_str()).unwrap_or_default();
                    let entry_type = entry.get("type").and_then(|v| v.as_str()).unwrap_or_default();
                    if entry_type == "dir" {
                        items.extend(Box::pin(self.repo_contents(owner, repo, entry_path)).await?);
                    } else {
                        items.push(file_entry_to_item(owner, repo, &entry, None));
                    }
                }
                Ok(items)
            }
            file => {
                let content = markdown::decode_file_content(&file);
                Ok(vec![file_entry_to_item(owner, repo, &file, Some(content))])
            }
        }
    }

    pub async fn commits(&self, owner: &str, repo: &str) -> EngineResult<Vec<DataItem>> {
        let path = format!("/repos/{owner}/{repo}/commits");
        let payloads = self.paginate(&path, &[]).await?;
        Ok(payloads.iter().map(|c| commit_to_item(owner, repo, c)).collect())
    }

    pub async fn issues(&self, owner: &str, repo: &str, state: &str) -> EngineResult<Vec<DataItem>> {
        let path = format!("/repos/{owner}/{repo}/issues");
        let payloads = self.paginate(&path, &[("state", state.to_string())]).await?;
        let mut items = Vec::with_capacity(payloads.len());
        for issue in payloads {
            if issue.get("pull_request").is_some() {
                continue;
            }
            let number = issue.get("number").and_then(|v| v.as_u64()).unwrap_or(0);
            let comments_path = format!("/repos/{owner}/{repo}/issues/{number}/comments");
            let comments = self.paginate(&comments_path, &[]).await.unwrap_or_default();
            items.push(issue_to_item(owner, repo, &issue, &comments, &[]));
        }
        Ok(items)
    }

    pub async fn pulls(&self, owner: &str, repo: &str, state: &str) -> EngineResult<Vec<DataItem>> {
        let path = format!("/repos/{owner}/{repo}/pulls");
        let payloads = self.paginate(&path, &[("state", state.to_string())]).await?;
        let mut items = Vec::with_capacity(payloads.len());
        for pr in payloads {
            let number = pr.get("number").and_then(|v| v.as_u64()).unwrap_or(0);
            let comments_path = format!("/repos/{owner}/{repo}/issues/{number}/comments");
            let review_path = format!("/repos/{owner}/{repo}/pulls/{number}/comments");
            let comments = self.paginate(&comments_path, &[]).await.unwrap_or_default();
            let review_comments = self.paginate(&review_path, &[]).await.unwrap_or_default();
            items.push(issue_to_item(owner, repo, &pr, &comments, &review_comments));
        }
        Ok(items)
    }

    pub async fn user_info(&self, username: &str) -> EngineResult<DataItem> {
        let path = format!("/users/{username}");
        let payload = self.call(self.authed_get(&path)).await?;
        Ok(user_to_item(&payload))
    }

    pub async fn search_repositories(&self, query: &str) -> EngineResult<Vec<DataItem>> {
        let payload = self.call(self.authed_get("/search/repositories").query("q", query)).await?;
        Ok(search_items(&payload, |repo| {
            let owner = repo.get("owner").and_then(|o| o.get("login")).and_then(|v| v.as_str()).unwrap_or("");
            let name = repo.get("name").and_then(|v| v.as_str()).unwrap_or("");
            repo_info_to_item(owner, name, repo)
        }))
    }

    pub async fn search_issues(&self, query: &str) -> EngineResult<Vec<DataItem>> {
        let payload = self.call(self.authed_get("/search/issues").query("q", query)).await?;
        Ok(search_items(&payload, |issue| issue_to_item("", "", issue, &[], &[])))
    }

    pub async fn search_code(&self, query: &str) -> EngineResult<Vec<DataItem>> {
        let payload = self.call(self.authed_get("/search/code").query("q", query)).await?;
        Ok(search_items(&payload, |hit| {
            let repo = hit.get("repository").and_then(|r| r.get("full_name")).and_then(|v| v.as_str()).unwrap_or("");
            let path = hit.get("path").and_then(|v| v.as_str()).unwrap_or("");
            DataItem::new(
                format!("github:search:code:{repo}:{path}"),
                hit.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                "text/plain",
            )
            .with_metadata("repo", repo)
            .with_metadata("path", path)
            .with_raw(hit.clone())
        }))
    }

    /// Maps a terminal failure into a synthetic error `DataItem`
    /// (spec.md §4.7) instead of silently dropping it from the batch.
    pub fn error_item(&self, context: &str, err: &EngineError) -> DataItem {
        DataItem::new(format!("github:error:{context}"), err.to_string(), "text/plain")
            .with_metadata("error", err.metadata_tag())
    }
}

fn search_items(payload: &Value, to_item: impl Fn(&Value) -> DataItem) -> Vec<DataItem> {
    payload
        .get("items")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().map(to_item).collect())
        .unwrap_or_default()
}

fn repo_info_to_item(owner: &str, repo: &str, payload: &Value) -> DataItem {
    let description = payload.get("description").and_then(|v| v.as_str()).unwrap_or("");
    let stars = payload.get("stargazers_count").and_then(|v| v.as_u64()).unwrap_or(0);
    let language = payload.get("language").and_then(|v| v.as_str());

    let mut item = DataItem::new(format!("github:{owner}/{repo}"), description.to_string(), "text/plain")
        .with_url(format!("https://github.com/{owner}/{repo}"))
        .with_metadata("owner", owner)
        .with_metadata("repo", repo)
        .with_metadata("stars", stars)
        .with_raw(payload.clone());
    if let Some(language) = language {
        item = item.with_language(language);
    }
    item
}

fn file_entry_to_item(owner: &str, repo: &str, payload: &Value, content: Option<String>) -> DataItem {
    let path = payload.get("path").and_then(|v| v.as_str()).unwrap_or_default();
    let content = content.unwrap_or_else(|| markdown::decode_file_content(payload));
    DataItem::new(format!("github:{owner}/{repo}:{path}"), content, "text/plain")
        .with_url(format!("https://github.com/{owner}/{repo}/blob/HEAD/{path}"))
        .with_metadata("owner", owner)
        .with_metadata("repo", repo)
        .with_metadata("path", path)
        .with_raw(payload.clone())
}

fn commit_to_item(owner: &str, repo: &str, payload: &Value) -> DataItem {
    let sha = payload.get("sha").and_then(|v| v.as_str()).unwrap_or_default();
    let message = payload
        .get("commit")
        .and_then(|c| c.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    DataItem::new(format!("github:{owner}/{repo}:commit:{sha}"), message.to_string(), "text/plain")
        .with_url(format!("https://github.com/{owner}/{repo}/commit/{sha}"))
        .with_metadata("owner", owner)
        .with_metadata("repo", repo)
        .with_metadata("sha", sha)
        .with_raw(payload.clone())
}

fn issue_to_item(owner: &str, repo: &str, payload: &Value, comments: &[Value], review_comments: &[Value]) -> DataItem {
    let number = payload.get("number").and_then(|v| v.as_u64()).unwrap_or(0);
    let markdown = markdown::render_issue_or_pr(payload, comments, review_comments);
    let is_pr = payload.get("pull_request").is_some();
    let kind = if is_pr { "pull" } else { "issue" };

    DataItem::new(format!("github:{owner}/{repo}:{kind}:{number}"), markdown, "text/markdown")
        .with_url(
            payload
                .get("html_url")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        )
        .with_metadata("owner", owner)
        .with_metadata("repo", repo)
        .with_metadata("number", number)
        .with_metadata("kind", kind)
        .with_metadata("state", payload.get("state").and_then(|v| v.as_str()).unwrap_or_default())
        .with_raw(payload.clone())
}

fn user_to_item(payload: &Value) -> DataItem {
    let login = payload.get("login").and_then(|v| v.as_str()).unwrap_or_default();
    let bio = payload.get("bio").and_then(|v| v.as_str()).unwrap_or_default();
    DataItem::new(format!("github:user:{login}"), bio.to_string(), "text/plain")
        .with_url(format!("https://github.com/{login}"))
        .with_metadata("login", login)
        .with_raw(payload.clone())
}

#[async_trait]
impl Connector for GithubConnector {
    fn name(&self) -> &str {
        "github"
    }

    fn connector_type(&self) -> &str {
        "github"
    }

    async fn initialize(&self) -> EngineResult<bool> {
        Ok(true)
    }

    async fn shutdown(&self) -> EngineResult<bool> {
        Ok(true)
    }

    async fn collect(&self, params: &ConnectorParams) -> EngineResult<Vec<DataItem>> {
        let operation = params.get("operation").and_then(|v| v.as_str()).unwrap_or("repo_info");
        let owner = params.get("owner").and_then(|v| v.as_str()).unwrap_or_default();
        let repo = params.get("repo").and_then(|v| v.as_str()).unwrap_or_default();

        let result = match operation {
            "repo_info" => self.repo_info(owner, repo).await.map(|item| vec![item]),
            "repo_readme" => self.repo_readme(owner, repo).await.map(|item| vec![item]),
            "repo_contents" => {
                let path = params.get("path").and_then(|v| v.as_str()).unwrap_or_default();
                self.repo_contents(owner, repo, path).await
            }
            "commits" => self.commits(owner, repo).await,
            "issues" => {
                let state = params.get("state").and_then(|v| v.as_str()).unwrap_or("open");
                self.issues(owner, repo, state).await
            }
            "pulls" => {
                let state = params.get("state").and_then(|v| v.as_str()).unwrap_or("open");
                self.pulls(owner, repo, state).await
            }
            "user_info" => {
                let username = params.get("username").and_then(|v| v.as_str()).unwrap_or_default();
                self.user_info(username).await.map(|item| vec![item])
            }
            "search_repositories" => {
                let query = params.get("query").and_then(|v| v.as_str()).unwrap_or_default();
                self.search_repositories(query).await
            }
            "search_issues" => {
                let query = params.get("query").and_then(|v| v.as_str()).unwrap_or_default();
                self.search_issues(query).await
            }
            "search_code" => {
                let query = params.get("query").and_then(|v| v.as_str()).unwrap_or_default();
                self.search_code(query).await
            }
            other => {
                return Err(EngineError::Config(format!("unknown github operation '{other}'")));
            }
        };

        match result {
            Ok(items) => Ok(items),
            Err(err) if err.is_retryable() => Err(err),
            Err(err) => Ok(vec![self.error_item(operation, &err)]),
        }
    }

    fn raw_config(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("api_base".to_string(), Value::String(self.config.api_base.clone()));
        map.insert("max_items".to_string(), Value::from(self.config.max_items as u64));
        if let Some(token) = &self.token {
            map.insert("token".to_string(), Value::String(token.clone()));
        }
        map
    }

    fn safe_config_extensions(&self) -> &[&str] {
        &["api_base", "max_items"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_info_carries_stars_and_language() {
        let payload = serde_json::json!({
            "description": "a repo",
            "stargazers_count": 42,
            "language": "Rust",
        });
        let item = repo_info_to_item("acme", "widget", &payload);
        assert_eq!(item.source_id, "github:acme/widget");
        assert_eq!(item.language.as_deref(), Some("Rust"));
        assert_eq!(item.metadata["stars"], serde_json::json!(42));
    }

    #[test]
    fn issue_item_tags_kind_and_state() {
        let payload = serde_json::json!({"number": 7, "title": "t", "body": "b", "state": "open"});
        let item = issue_to_item("acme", "widget", &payload, &[], &[]);
        assert_eq!(item.metadata["kind"], serde_json::json!("issue"));
        assert_eq!(item.content_type, "text/markdown");
        assert!(item.content.contains("# t"));
    }

    #[test]
    fn pull_request_is_tagged_as_pull_not_issue() {
        let payload = serde_json::json!({
            "number": 9, "title": "t", "body": "b", "state": "open",
            "pull_request": {"url": "https://api.github.com/x"}
        });
        let item = issue_to_item("acme", "widget", &payload, &[], &[]);
        assert_eq!(item.metadata["kind"], serde_json::json!("pull"));
    }
}
