//! HTTP transfer subsystem backed by reqwest
//!
//! Each resumed transfer streams its response body into a `.part` file in
//! the staging directory on its own tokio task. The terminal callback is
//! sent on the event channel; ownership of the staged file passes to the
//! receiver together with a `Succeeded` event.

use futures::StreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use url::Url;

use super::backend::{TransferBackend, TransferError, TransferEvent, TransferId};
use crate::error::{OfflineError, Result};

enum Slot {
    Suspended(Url),
    Running(AbortHandle),
}

struct Inner {
    client: Client,
    staging: PathBuf,
    events: mpsc::UnboundedSender<TransferEvent>,
    slots: Mutex<HashMap<TransferId, Slot>>,
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, HashMap<TransferId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn part_path(&self, id: TransferId) -> PathBuf {
        self.staging.join(format!("{}.part", id))
    }
}

/// Background HTTP downloads
#[derive(Clone)]
pub struct HttpTransfers {
    inner: Arc<Inner>,
}

impl HttpTransfers {
    /// Create a transfer subsystem staging files in `staging`
    pub fn new(staging: PathBuf, events: mpsc::UnboundedSender<TransferEvent>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("tunestash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OfflineError::TransferFailed(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                staging,
                events,
                slots: Mutex::new(HashMap::new()),
            }),
        })
    }

    #[cfg(test)]
    fn active(&self) -> usize {
        self.inner.slots().len()
    }
}

impl TransferBackend for HttpTransfers {
    fn create(&self, source: &Url) -> Result<TransferId> {
        let mut slots = self.inner.slots();
        let mut id = TransferId::random();
        while slots.contains_key(&id) {
            id = TransferId::random();
        }
        slots.insert(id, Slot::Suspended(source.clone()));

        debug!("Created transfer {} for {}", id, source);
        Ok(id)
    }

    fn resume(&self, id: TransferId) {
        let mut slots = self.inner.slots();
        let url = match slots.get(&id) {
            Some(Slot::Suspended(url)) => url.clone(),
            Some(Slot::Running(_)) => {
                debug!("Transfer {} already running", id);
                return;
            }
            None => {
                debug!("Ignoring resume of unknown transfer {}", id);
                return;
            }
        };

        // The slot lock is held until the handle is stored, so the task
        // cannot observe its own slot missing.
        let handle = tokio::spawn(run_transfer(self.inner.clone(), id, url));
        slots.insert(id, Slot::Running(handle.abort_handle()));
    }

    fn cancel(&self, id: TransferId) {
        let slot = self.inner.slots().remove(&id);

        // Data of a transfer from an earlier process may still be staged
        let part = self.inner.part_path(id);
        tokio::spawn(async move {
            let _ = tokio::fs::remove_file(part).await;
        });

        let Some(slot) = slot else {
            return;
        };
        if let Slot::Running(handle) = slot {
            handle.abort();
        }

        debug!("Cancelled transfer {}", id);
        let _ = self.inner.events.send(TransferEvent::Failed {
            id,
            error: TransferError::Cancelled,
        });
    }
}

async fn run_transfer(inner: Arc<Inner>, id: TransferId, url: Url) {
    let location = inner.part_path(id);
    let result = fetch(&inner.client, &url, &location).await;

    // Whoever removes the slot owns the terminal callback
    if inner.slots().remove(&id).is_none() {
        let _ = tokio::fs::remove_file(&location).await;
        return;
    }

    let event = match result {
        Ok(mime_type) => TransferEvent::Succeeded {
            id,
            location,
            mime_type,
        },
        Err(error) => {
            warn!("Transfer {} failed: {}", id, error);
            let _ = tokio::fs::remove_file(&location).await;
            TransferEvent::Failed { id, error }
        }
    };

    if inner.events.send(event).is_err() {
        debug!("No receiver for transfer {} callback", id);
    }
}

/// Stream `url` into `location`, returning the response MIME type
async fn fetch(
    client: &Client,
    url: &Url,
    location: &Path,
) -> std::result::Result<Option<String>, TransferError> {
    let response = client.get(url.clone()).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransferError::Status(status.as_u16()));
    }

    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());

    // Subsonic reports errors as a JSON document with status 200
    if mime_type.as_deref().is_some_and(|m| m.contains("json")) {
        return Err(TransferError::ErrorDocument);
    }

    if let Some(parent) = location.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(location).await?;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;

    Ok(mime_type)
}
