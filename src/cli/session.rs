//! Wiring of the offline store, transfers and download manager for one CLI run

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::auth;
use crate::config::Config;
use crate::download::{DownloadManager, DownloadServices, LyricsSource, OfflineFiles};
use crate::events::EventBus;
use crate::offline::{Lyrics, OfflineReader, OfflineStore};
use crate::subsonic::SubsonicClient;
use crate::transfer::HttpTransfers;

/// Stand-in when no server is configured; every lookup fails
struct NoLyrics;

#[async_trait]
impl LyricsSource for NoLyrics {
    async fn fetch_lyrics(&self, track_id: &str) -> anyhow::Result<Lyrics> {
        anyhow::bail!("no server configured to fetch lyrics for {}", track_id)
    }
}

pub struct Session {
    pub client: Option<SubsonicClient>,
    pub manager: DownloadManager,
    pub bus: EventBus,
}

impl Session {
    pub fn client(&self) -> Result<&SubsonicClient> {
        self.client
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No server credentials available. Run 'tunestash configure' first."))
    }
}

/// Client for the configured server, if its password is available
fn client(config: &Config) -> Result<Option<SubsonicClient>> {
    let Some(server) = &config.server else {
        return Ok(None);
    };

    match auth::load_password(server) {
        Ok(password) => SubsonicClient::new(&server.url, &server.username, &password).map(Some),
        Err(e) => {
            warn!("{:#}", e);
            Ok(None)
        }
    }
}

/// Read-only access to the offline store
pub fn open_reader(config: &Config) -> Result<OfflineReader> {
    let dir = config.storage_dir()?;
    let store = OfflineStore::open(&dir)
        .with_context(|| format!("Failed to open offline store in {:?}", dir))?;
    Ok(store.reader())
}

/// Start the download manager over the configured storage
pub async fn start(config: Config) -> Result<Session> {
    let dir = config.storage_dir()?;
    let files = OfflineFiles::new(dir.clone());
    files
        .init()
        .await
        .with_context(|| format!("Failed to prepare storage in {:?}", dir))?;

    let store = OfflineStore::open(&dir)
        .with_context(|| format!("Failed to open offline store in {:?}", dir))?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transfers = HttpTransfers::new(files.staging_dir(), events_tx)?;

    let client = client(&config)?;
    let lyrics: Arc<dyn LyricsSource> = match &client {
        Some(client) => Arc::new(client.clone()),
        None => Arc::new(NoLyrics),
    };

    let bus = EventBus::default();
    let manager = DownloadManager::start(
        DownloadServices {
            store,
            files,
            transfers: Arc::new(transfers),
            transfer_events: events_rx,
            lyrics,
            bus: bus.clone(),
        },
        config.download,
    );

    debug!("Download manager started on {:?}", dir);
    Ok(Session {
        client,
        manager,
        bus,
    })
}
