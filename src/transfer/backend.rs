//! Contract of the background transfer subsystem

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::error::Result;

/// Opaque identifier of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub u64);

impl TransferId {
    /// Allocate a random identifier
    ///
    /// Random rather than sequential so ids of records left behind by an
    /// earlier process cannot collide with new transfers.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Why a transfer did not complete
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer cancelled")]
    Cancelled,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("server returned an error document instead of content")]
    ErrorDocument,

    #[error("failed to write transfer data: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal callback of a transfer; exactly one is delivered per transfer
#[derive(Debug)]
pub enum TransferEvent {
    Succeeded {
        id: TransferId,
        /// Temporary location of the fetched bytes, owned by the receiver
        location: PathBuf,
        mime_type: Option<String>,
    },
    Failed {
        id: TransferId,
        error: TransferError,
    },
}

/// A background transfer subsystem
///
/// Transfers are created suspended so the caller can record the identifier
/// before any callback can arrive, then started with [`TransferBackend::resume`].
/// Terminal callbacks are delivered on the event channel the backend was
/// built with.
pub trait TransferBackend: Send + Sync {
    /// Create a suspended transfer of `source`
    fn create(&self, source: &Url) -> Result<TransferId>;

    /// Start a created transfer
    fn resume(&self, id: TransferId);

    /// Cancel a transfer
    ///
    /// Unknown ids get no callback, but any data still staged for them is
    /// removed.
    fn cancel(&self, id: TransferId);
}

/// Handle to a created transfer which the requester must resume
#[derive(Clone)]
pub struct TransferHandle {
    id: TransferId,
    backend: Arc<dyn TransferBackend>,
}

impl TransferHandle {
    pub(crate) fn new(id: TransferId, backend: Arc<dyn TransferBackend>) -> Self {
        Self { id, backend }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Activate the transfer
    pub fn resume(&self) {
        self.backend.resume(self.id);
    }
}

impl fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferHandle").field("id", &self.id).finish()
    }
}
