//! Error hierarchy for the resource monitor.
//!
//! Errors are categorized by the component they originate from; every
//! variant folds into the top-level [`Error`] so callers can use the
//! crate-wide [`Result`] alias throughout.

use std::path::PathBuf;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Resource construction violations (fatal, never retried)
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Backend data retrieval failures, tagged with the backend name
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Template staging and destination sync failures
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Child process supervision failures
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Plain I/O failures outside the render pipeline
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Construction-time violations. These are configuration mistakes; the
/// resource never starts.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("a resource requires at least one backend")]
    NoBackends,

    #[error("empty src template")]
    EmptySrc,

    #[error("unknown signal: {0}")]
    InvalidSignal(String),

    #[error("invalid file mode: {0}")]
    InvalidFileMode(String),
}

/// A failure while talking to a backend, carrying the backend name for
/// structured logging.
#[derive(Debug, Clone, thiserror::Error)]
#[error("backend {backend}: {message}")]
pub struct BackendError {
    pub backend: String,
    pub message: String,
}

impl BackendError {
    pub fn new(
        backend: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by a concrete [`StoreClient`](crate::backend::StoreClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transient request failure; the caller may retry
    #[error("request failed: {0}")]
    Request(String),

    /// The backend has no change notification mechanism. Fatal for the
    /// watch task; polling still works.
    #[error("watch is not supported by this backend")]
    WatchUnsupported,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The source template could not be read
    #[error("failed to read template {path}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Template parse or evaluation failure
    #[error("template {path} failed to render: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: Box<minijinja::Error>,
    },

    /// Failure to create or write the staged file
    #[error("failed to stage {path}")]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Check command rejected the staged file; the destination is untouched
    #[error("check command failed for {dst} (exit code {code:?})")]
    CheckFailed { dst: PathBuf, code: Option<i32> },

    /// Reload command failed after the destination was already swapped
    #[error("reload command failed for {dst} (exit code {code:?})")]
    ReloadFailed { dst: PathBuf, code: Option<i32> },

    /// A check/reload command could not be started at all
    #[error("failed to run command `{command}`")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Atomic rename failed; the staged file is kept for inspection
    #[error("failed to replace {dst}, staged file kept at {staged}")]
    Swap {
        dst: PathBuf,
        staged: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn child `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal child (pid {pid}): {source}")]
    Signal { pid: i32, source: nix::Error },
}
