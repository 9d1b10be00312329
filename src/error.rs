//! Error types for the offline library

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the offline store, the download manager and the
/// offline library provider
#[derive(Debug, Error)]
pub enum OfflineError {
    /// Lookup by content id or transfer id failed
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The transfer subsystem refused or lost a transfer
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// The offline store could not be written; the mutation was rolled back
    #[error("failed to persist offline store: {0}")]
    PersistenceFailure(#[source] std::io::Error),

    /// The offline store could not be encoded or decoded
    #[error("offline store is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Moving or removing offline content failed
    #[error("filesystem operation on {} failed: {source}", path.display())]
    FilesystemFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The download manager task has stopped
    #[error("download manager is not running")]
    ManagerClosed,
}

impl OfflineError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FilesystemFailure {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, OfflineError>;
