//! Error types for the orchestrator.
//!
//! Two layers: `BackendError` is the typed failure a backend reports instead
//! of crashing the caller. It is recorded per attempt and never propagated
//! past the cascade.
//! `OrchestratorError` is the caller-visible taxonomy; in practice only
//! `NoCandidateBackends` ever reaches a caller from `analyze`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed failure from a single backend invocation.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),
}

impl BackendError {
    /// Short stable code for logs and feedback metadata.
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::Unavailable(_) => "unavailable",
            BackendError::Timeout { .. } => "timeout",
            BackendError::MalformedResponse(_) => "malformed_response",
            BackendError::MalformedInput(_) => "malformed_input",
        }
    }
}

/// Orchestrator-level errors.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// No registered backend supports the requested task. The only error
    /// surfaced to callers of `analyze`.
    #[error("no registered backend supports task '{task}'")]
    NoCandidateBackends { task: String },

    /// Cache snapshot unreadable. Recovered internally (cache starts empty).
    #[error("cache snapshot unreadable: {0}")]
    CacheCorrupt(String),

    #[error("satisfaction rating {0} out of range, expected 1..=5")]
    InvalidRating(u8),

    #[error("duplicate backend id '{0}' registered")]
    DuplicateBackend(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
