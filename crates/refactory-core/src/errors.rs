//! Error types for the Refactory core library.

/// Failure reported by the source-control host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The host refused the request, e.g. a comment position outside the diff.
    #[error("host rejected request: {0}")]
    Rejected(String),

    /// Server-side or network failure that may succeed on another attempt.
    #[error("transient host failure: {0}")]
    Transient(String),

    #[error("not found on host: {0}")]
    NotFound(String),
}

/// Top-level error enum for the Refactory core library.
#[derive(Debug, thiserror::Error)]
pub enum RefactoryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Working copy error: {0}")]
    WorkingCopy(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Granularity at which an error stops the polling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Only the current change request is abandoned.
    ChangeRequest,
    /// The remaining change requests of the project are skipped for this pass.
    Project,
}

impl RefactoryError {
    pub fn scope(&self) -> ErrorScope {
        match self {
            RefactoryError::WorkingCopy(_) => ErrorScope::Project,
            _ => ErrorScope::ChangeRequest,
        }
    }
}

pub type RefactoryResult<T> = Result<T, RefactoryError>;
