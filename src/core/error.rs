//! Error taxonomy for the training pipeline.
//!
//! Backpressure timeouts are not errors: they are logged and counted at the
//! point where they happen. Everything here halts the affected subsystem.

use std::path::PathBuf;

/// Errors surfaced by the training pipeline.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    /// Invalid or inconsistent configuration. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The game does not have the properties the pipeline requires.
    #[error("unsupported game: {0}")]
    UnsupportedGame(String),

    /// Filesystem failure, with the path that was being accessed.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted file exists but cannot be trusted.
    #[error("corrupt file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// Binary (de)serialization failure.
    #[error("binary serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON (de)serialization failure.
    #[error("json serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A worker thread could not be started.
    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// An operation was called with arguments it cannot honour,
    /// e.g. sampling from an empty replay buffer.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl TrainError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl TrainError {
    /// Wrap a thread spawn failure with the thread's name.
    pub fn spawn(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            name: name.into(),
            source,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, TrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mentions_path() {
        let err = TrainError::io(
            "/tmp/replay_buffer.data",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/replay_buffer.data"));
        assert!(msg.contains("gone"));
    }

    #[test]
    fn test_json_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: TrainError = parse.unwrap_err().into();
        assert!(matches!(err, TrainError::Json(_)));
    }
}
