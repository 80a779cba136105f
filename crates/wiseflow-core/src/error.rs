//! Engine-wide error taxonomy.
//!
//! Every fallible operation in the workspace eventually resolves into an
//! [`EngineError`] variant. This plays the role the teacher crate gives
//! `ResilienceError<E>` (see `tower-resilience-core::error`): a single
//! type every layer can match on without hand-writing `From` impls per
//! pair of crates. Unlike `ResilienceError<E>` this type is closed, not
//! generic over an application error — the engine has no wrapped
//! service of its own, only connectors that already speak this
//! vocabulary (spec.md §7).

use std::time::Duration;
use thiserror::Error;

/// The full error taxonomy from spec.md §7 ("kinds, not names").
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// DNS failure, socket error, or read timeout below the task-level
    /// deadline. Retried with backoff up to policy; reported as an
    /// engine failure only once retries are exhausted.
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider rate limit hit; retry after `reset` without consuming an
    /// additional attempt from the caller's budget.
    #[error("rate limited, reset at {reset:?}")]
    RateLimited { reset: Option<Duration> },

    /// 4xx other than 429/404/401/403/422; not retried.
    #[error("provider error {code}: {message}")]
    ProviderError {
        code: u16,
        message: String,
        details: Option<String>,
    },

    /// 404. Not retried.
    #[error("not found")]
    NotFound,

    /// 401/403 that is not itself a rate-limit signal. Not retried.
    #[error("authentication failed")]
    AuthFailed,

    /// 422 or local schema validation failure. Not retried.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// 5xx. Retried with `Retry-After` if present, else exponential
    /// backoff; reported as a failure once retries are exhausted.
    #[error("server error ({status})")]
    ServerError { status: u16 },

    /// The task-level deadline fired. Never retried at the engine level.
    #[error("operation timed out")]
    Timeout,

    /// Cooperative cancellation observed at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    /// A dependency required for this task is not `completed`.
    #[error("dependency {task_id} unsatisfied")]
    DependencyUnsatisfied { task_id: String },

    /// The dependency graph submitted for execution contains a cycle.
    #[error("cycle detected: {path}")]
    CycleDetected { path: String },

    /// The `Store` collaborator failed.
    #[error("store error: {0}")]
    Store(String),

    /// Configuration failed validation at load or registration time.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether this kind is ever worth retrying at the connector/fetch
    /// layer (spec.md §7 propagation policy). `Cancelled`/`Timeout` are
    /// terminal at the engine level by definition, not retry candidates.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Transport(_)
                | EngineError::RateLimited { .. }
                | EngineError::ServerError { .. }
        )
    }

    /// The stable `metadata.error` tag used for synthetic error
    /// `DataItem`s (spec.md §4.7, §7).
    pub fn metadata_tag(&self) -> &'static str {
        match self {
            EngineError::Transport(_) => "transport",
            EngineError::RateLimited { .. } => "rate_limited",
            EngineError::ProviderError { .. } => "api_error",
            EngineError::NotFound => "not_found",
            EngineError::AuthFailed => "auth",
            EngineError::Validation { .. } => "validation",
            EngineError::ServerError { .. } => "server_error",
            EngineError::Timeout => "timeout",
            EngineError::Cancelled => "cancelled",
            EngineError::DependencyUnsatisfied { .. } => "dependency_unsatisfied",
            EngineError::CycleDetected { .. } => "cycle_detected",
            EngineError::Store(_) => "store",
            EngineError::Config(_) => "config",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(EngineError::Transport("x".into()).is_retryable());
        assert!(EngineError::RateLimited { reset: None }.is_retryable());
        assert!(EngineError::ServerError { status: 503 }.is_retryable());
        assert!(!EngineError::NotFound.is_retryable());
        assert!(!EngineError::AuthFailed.is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
    }

    #[test]
    fn metadata_tags_match_spec() {
        assert_eq!(EngineError::NotFound.metadata_tag(), "not_found");
        assert_eq!(EngineError::AuthFailed.metadata_tag(), "auth");
        assert_eq!(
            EngineError::ProviderError {
                code: 422,
                message: "bad".into(),
                details: None
            }
            .metadata_tag(),
            "api_error"
        );
    }
}
