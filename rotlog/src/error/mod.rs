use std::io;
use std::path::PathBuf;

/// Result type used across rotlog.
pub type Result<T> = std::result::Result<T, LogError>;

/// Errors produced by rotlog writers.
///
/// Only construction errors (`Open`, `Config`) are returned to the code that
/// builds a writer. Steady-state failures (`Rotation`, `Io` on the write path)
/// are counted in [`WriterStats`](crate::writer::WriterStats) and reported to
/// the hook instead of the logging call site. `Format` is returned by the
/// `*f` methods because the caller handed in a bad format string.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
  /// I/O error on the underlying sink
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  /// The log file could not be created or opened
  #[error("failed to open log file {path}: {source}")]
  Open {
    /// Path that failed to open
    path: PathBuf,
    /// The underlying error
    source: io::Error,
  },

  /// A rotation step (rename or reopen) failed
  #[error("failed to rotate log file {path}: {source}")]
  Rotation {
    /// Path involved in the failed step
    path: PathBuf,
    /// The underlying error
    source: io::Error,
  },

  /// Format string and arguments do not agree
  #[error("invalid format at byte {position}: {reason}")]
  Format {
    /// Byte offset in the format string
    position: usize,
    /// What went wrong
    reason: String,
  },

  /// Invalid writer configuration
  #[error("configuration error: {0}")]
  Config(String),

  /// Background thread could not be started
  #[error("failed to spawn {name} thread: {source}")]
  Spawn {
    /// Thread name
    name: &'static str,
    /// The underlying error
    source: io::Error,
  },
}

impl LogError {
  pub(crate) fn format(position: usize, reason: impl Into<String>) -> Self {
    LogError::Format {
      position,
      reason: reason.into(),
    }
  }
}

impl From<serde_json::Error> for LogError {
  fn from(err: serde_json::Error) -> Self {
    LogError::Config(err.to_string())
  }
}
