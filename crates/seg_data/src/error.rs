//! Error taxonomy for the preparation pipeline.
//!
//! Fatal conditions (bad configuration, an unreadable store, a corrupt
//! record) surface as `Err(PipelineError)`; the host decides to abort.
//! Recoverable anomalies (decoded channel mismatch, skipped dataset items,
//! cursor wraparound) are logged instead and never reach this type.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Contradictory or out-of-range options, or a structural invariant
    /// (crop larger than source, mean shape mismatch, ...) violated at run time.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("record store error at {path}: {msg}")]
    Store { path: PathBuf, msg: String },

    #[error("image decode error: {0}")]
    Decode(String),

    /// Wire encoding failures and record invariant violations.
    #[error("malformed record: {0}")]
    Record(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The background producer died, timed out or was halted by an earlier error.
    #[error("prefetch producer failure: {0}")]
    Producer(String),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }

    pub fn store(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        PipelineError::Store {
            path: path.into(),
            msg: msg.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error represents a configuration mistake.
    pub fn is_configuration(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }
}

/// `ensure!`-style guard producing a [`PipelineError::Configuration`].
macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::PipelineError::Configuration(format!($($arg)+)));
        }
    };
}

pub(crate) use ensure_config;

#[cfg(test)]
mod tests {
    use super::*;

    fn guarded(value: usize) -> Result<usize> {
        ensure_config!(value > 0, "value must be positive (got {})", value);
        Ok(value)
    }

    #[test]
    fn test_ensure_config_macro() {
        assert_eq!(guarded(3).unwrap(), 3);
        let err = guarded(0).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("value must be positive (got 0)"));
    }

    #[test]
    fn test_store_error_display() {
        let err = PipelineError::store("/tmp/db", "missing data file");
        assert_eq!(
            err.to_string(),
            "record store error at /tmp/db: missing data file"
        );
        assert!(!err.is_configuration());
    }
}
