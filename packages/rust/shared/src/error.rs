//! Error types for variantflow.
//!
//! Library crates use [`VariantFlowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all variantflow operations.
///
/// Variants line up with how the pipeline reacts to them: `Config` refuses to
/// start, `Network`/`Inference`/`Parse` are recovered by skipping one unit,
/// and the rest fail the task.
#[derive(Debug, thiserror::Error)]
pub enum VariantFlowError {
    /// Configuration loading or a missing required collaborator.
    #[error("config error: {message}")]
    Config { message: String },

    /// HTTP error talking to a remote knowledge source.
    #[error("network error: {0}")]
    Network(String),

    /// Generative inference call failed or returned nothing usable.
    #[error("inference error: {0}")]
    Inference(String),

    /// Malformed tool output, XML, or model response.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Task database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The external annotation tool could not be run or exited non-zero.
    #[error("annotation tool error: {0}")]
    Annotation(String),

    /// A task or artifact that should exist does not.
    #[error("not found: {0}")]
    NotFound(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Structural problem with stored data (bad artifact, illegal transition, missing context).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, VariantFlowError>;

impl VariantFlowError {
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

    /// Create a not-found error naming the missing thing.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the pipeline may skip the failing unit and keep going.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Inference(_) | Self::Parse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = VariantFlowError::config("missing task database");
        assert_eq!(err.to_string(), "config error: missing task database");

        let err = VariantFlowError::not_found("task 0191");
        assert_eq!(err.to_string(), "not found: task 0191");

        let err = VariantFlowError::validation("task already completed");
        assert!(err.to_string().contains("already completed"));
    }

    #[test]
    fn transient_classification() {
        assert!(VariantFlowError::Network("timeout".into()).is_transient());
        assert!(VariantFlowError::parse("bad line").is_transient());
        assert!(!VariantFlowError::Annotation("exit 2".into()).is_transient());
        assert!(!VariantFlowError::config("x").is_transient());
    }
}
