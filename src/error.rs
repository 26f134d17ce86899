//! Error taxonomy for indexing, search and build jobs.
//!
//! Library code returns [`RecallError`]; the `recall` binary converts to
//! `anyhow::Error` at the boundary. A document that vanishes between
//! discovery and read is not an error at all: the builder skips it and
//! counts it in `IndexMeta::skipped_files`.

use std::path::PathBuf;

/// Errors that can occur while building or querying an index.
///
/// # Examples
///
/// ```
/// use notes_recall::error::RecallError;
///
/// let err = RecallError::Config("unknown provider 'foo'".into());
/// assert!(err.to_string().contains("unknown provider"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    /// Invalid configuration: unknown provider, missing credential, bad knob.
    /// Raised before any I/O takes place.
    #[error("configuration error: {0}")]
    Config(String),

    /// The embedding provider failed (network, status, malformed response).
    /// Aborts the current build; nothing is persisted.
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// No persisted index exists for the workspace.
    #[error("index not found at {}: run a build first", .0.display())]
    NotFound(PathBuf),

    /// The persisted index exists but cannot be interpreted.
    #[error("index is corrupt: {0}")]
    Corrupt(String),

    /// The build was canceled through its cancellation token.
    #[error("build canceled")]
    Canceled,

    /// A git query failed. Callers fall back to filesystem stamps.
    #[error("git error: {0}")]
    Git(String),

    /// The build task of a job aborted without returning (a runner panic).
    #[error("build task aborted: {0}")]
    Job(String),

    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RecallError {
    /// Whether this error represents an explicit cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, RecallError::Canceled)
    }
}

/// A convenience `Result` type for recall operations.
pub type Result<T> = std::result::Result<T, RecallError>;
