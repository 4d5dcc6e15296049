//! Error types for the obituary discovery workspace.
//!
//! Library crates use [`ObituaryError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all discovery operations.
#[derive(Debug, thiserror::Error)]
pub enum ObituaryError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the search provider or classifier.
    #[error("network error: {0}")]
    Network(String),

    /// Provider or model response could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Content store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Classification service error (API or response shape).
    #[error("classification error: {0}")]
    Classification(String),

    /// The remote service asked us to slow down.
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// An operation did not finish within its deadline.
    #[error("timed out after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },

    /// A pipeline stage failed; the run is aborted.
    #[error("stage {stage} failed after {elapsed_ms}ms: {source}")]
    Stage {
        stage: &'static str,
        elapsed_ms: u128,
        #[source]
        source: Box<ObituaryError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ObituaryError>;

impl ObituaryError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach the failing stage and time spent so far.
    pub fn in_stage(self, stage: &'static str, elapsed: std::time::Duration) -> Self {
        Self::Stage {
            stage,
            elapsed_ms: elapsed.as_millis(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ObituaryError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = ObituaryError::validation("threshold 1.5 out of range");
        assert!(err.to_string().contains("threshold 1.5"));
    }

    #[test]
    fn stage_error_carries_context() {
        let err = ObituaryError::Storage("connection refused".into())
            .in_stage("deduping", std::time::Duration::from_millis(1500));
        let msg = err.to_string();
        assert!(msg.contains("deduping"));
        assert!(msg.contains("1500ms"));
        assert!(msg.contains("connection refused"));
    }
}
