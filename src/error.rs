//! Error types for article-pool.

use std::time::Duration;
use thiserror::Error;

/// Main error type for article-pool.
///
/// None of these escape [`crate::ArticleProcessor::process`]; they drive the
/// fallback chain and show up in logs.
#[derive(Error, Debug)]
pub enum ArticleError {
    #[error("Failed to spawn worker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {worker_id} closed its output without responding")]
    EmptyResponse { worker_id: usize },

    #[error("Worker {worker_id} did not respond within {}ms", timeout.as_millis())]
    Timeout { worker_id: usize, timeout: Duration },

    #[error("Worker {worker_id} sent an invalid response: {message}")]
    InvalidResponse { worker_id: usize, message: String },

    #[error("Worker {worker_id} is not running")]
    NotRunning { worker_id: usize },

    #[error("Worker pipe error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker slot {slot} exhausted its restart budget ({restarts} restarts)")]
    PoolDegraded { slot: usize, restarts: usize },

    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("Fallback extractor '{extractor}' failed: {message}")]
    Fallback {
        extractor: &'static str,
        message: String,
    },

    #[error("External extraction panicked: {0}")]
    Panicked(String),

    #[error("All fallback extractors failed")]
    FallbackExhausted,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ArticleError {
    /// Whether the worker handle involved must be discarded.
    ///
    /// The protocol has no request ids, so any handle that failed mid-exchange
    /// may still emit a stale line and can never serve another request.
    pub fn is_worker_fault(&self) -> bool {
        matches!(
            self,
            Self::EmptyResponse { .. }
                | Self::Timeout { .. }
                | Self::InvalidResponse { .. }
                | Self::NotRunning { .. }
                | Self::Io(_)
        )
    }
}

/// Result type alias for article-pool operations.
pub type Result<T> = std::result::Result<T, ArticleError>;
