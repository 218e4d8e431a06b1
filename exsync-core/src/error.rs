//! Error types shared across the sync engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::remote::RemotePath;

/// A remote store rejected or failed an operation.
///
/// Absence is never a fault: lookups report it as `None` / `false`.
#[derive(Debug, Clone, Error)]
#[error("{op} {path}: {message}")]
pub struct RemoteFault {
    pub op: &'static str,
    pub path: String,
    pub message: String,
}

impl RemoteFault {
    pub fn new(op: &'static str, path: &RemotePath, message: impl Into<String>) -> Self {
        Self {
            op,
            path: path.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote fault: {0}")]
    Remote(#[from] RemoteFault),

    #[error("local io error on {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("watch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The base collection could not be established; the run cannot start.
    #[error("cannot establish base collection {path}: {fault}")]
    BaseCollection { path: String, fault: RemoteFault },
}

impl SyncError {
    pub(crate) fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::LocalIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
