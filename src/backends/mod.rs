//! Backend adapters: thin call-throughs to the external capability behind
//! each deployment. Each capability is a trait so tests can substitute stubs.

pub mod fs;
pub mod http;
pub mod sqlite;
pub mod weather;

/// Failure reported by an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP {status} {reason}")]
    Status { status: u16, reason: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
    #[error("backend handle is closed")]
    Closed,
    #[error("backend task failed: {0}")]
    Task(String),
}

impl BackendError {
    pub fn io(op: &'static str, path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<tokio::task::JoinError> for BackendError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
