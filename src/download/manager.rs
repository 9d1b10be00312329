//! Download orchestration
//!
//! [`DownloadManager`] is a cheap, cloneable handle to a single orchestrator
//! task. The task owns every writer of offline state: the offline store,
//! the transfer registry, the permanent file namespace and the parent
//! notifier. Requests from callers and terminal callbacks from the transfer
//! subsystem both arrive as messages and are handled one at a time, so
//! store mutations never race.
//!
//! Per track the state machine is `none -> working -> downloaded`, with
//! `working -> none` on failure or deletion and `downloaded -> none` on
//! deletion. Failures of any kind during a transfer or its finalize
//! collapse the track back to `none`.

use async_trait::async_trait;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::files::{self, OfflineFiles};
use super::notifier::ParentNotifier;
use super::parallel::{ParallelError, parallel_map};
use crate::config::DownloadConfig;
use crate::error::{OfflineError, Result};
use crate::events::EventBus;
use crate::offline::{
    AlbumInfo, Lyrics, OfflineAlbum, OfflineReader, OfflineStatus, OfflineStore, OfflineTrack,
    TrackInfo,
};
use crate::transfer::{
    TransferBackend, TransferError, TransferEvent, TransferHandle, TransferId, TransferRegistry,
};

/// Remote source of time-synced lyrics
#[async_trait]
pub trait LyricsSource: Send + Sync {
    async fn fetch_lyrics(&self, track_id: &str) -> anyhow::Result<Lyrics>;
}

/// A request to make one track available offline
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub track: TrackInfo,
    /// Album owning the track, created offline on first use
    pub album: AlbumInfo,
    /// Where the transfer fetches the content from
    pub source: Url,
}

/// Collaborators the orchestrator is built from
pub struct DownloadServices {
    pub store: OfflineStore,
    pub files: OfflineFiles,
    pub transfers: Arc<dyn TransferBackend>,
    /// Terminal callbacks of `transfers`
    pub transfer_events: mpsc::UnboundedReceiver<TransferEvent>,
    pub lyrics: Arc<dyn LyricsSource>,
    pub bus: EventBus,
}

enum Command {
    Request {
        request: DownloadRequest,
        reply: oneshot::Sender<Result<Option<TransferHandle>>>,
    },
    Delete {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    DeleteAlbum {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    StoreLyrics {
        batch: Vec<(String, Lyrics)>,
        reply: oneshot::Sender<Result<usize>>,
    },
    Orphaned {
        reply: oneshot::Sender<Vec<OfflineTrack>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the download orchestrator
#[derive(Clone)]
pub struct DownloadManager {
    commands: mpsc::UnboundedSender<Command>,
    reader: OfflineReader,
    lyrics: Arc<dyn LyricsSource>,
    config: DownloadConfig,
}

impl DownloadManager {
    /// Spawn the orchestrator task; must be called within a tokio runtime
    pub fn start(services: DownloadServices, config: DownloadConfig) -> Self {
        let DownloadServices {
            store,
            files,
            transfers,
            transfer_events,
            lyrics,
            bus,
        } = services;

        let reader = store.reader();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (lyrics_tx, lyrics_rx) = mpsc::unbounded_channel();

        let orchestrator = Orchestrator {
            notifier: ParentNotifier::new(reader.clone(), bus.clone(), config.debounce()),
            store,
            files,
            transfers,
            registry: TransferRegistry::new(),
            bus,
            lyrics: lyrics.clone(),
            lyrics_timeout: config.lyrics_timeout(),
            lyrics_tx,
        };
        tokio::spawn(orchestrator.run(commands_rx, transfer_events, lyrics_rx));

        Self {
            commands: commands_tx,
            reader,
            lyrics,
            config,
        }
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| OfflineError::ManagerClosed)?;
        response.await.map_err(|_| OfflineError::ManagerClosed)
    }

    /// Register a download and create its transfer
    ///
    /// Returns `None` if the track is already available offline. A request
    /// for a track whose transfer is still in flight discards that transfer
    /// and starts over. The returned handle must be resumed to start the
    /// transfer.
    pub async fn request_download(&self, request: DownloadRequest) -> Result<Option<TransferHandle>> {
        self.call(|reply| Command::Request { request, reply }).await?
    }

    /// Request a download and start its transfer right away
    pub async fn download(&self, request: DownloadRequest) -> Result<OfflineStatus> {
        match self.request_download(request).await? {
            Some(handle) => {
                handle.resume();
                Ok(OfflineStatus::Working)
            }
            None => Ok(OfflineStatus::Downloaded),
        }
    }

    /// Download every given track of an album; returns how many transfers started
    pub async fn download_album(&self, album: AlbumInfo, tracks: Vec<(TrackInfo, Url)>) -> Result<usize> {
        let mut started = 0;
        for (track, source) in tracks {
            let request = DownloadRequest {
                track,
                album: album.clone(),
                source,
            };
            if self.download(request).await? == OfflineStatus::Working {
                started += 1;
            }
        }
        Ok(started)
    }

    /// Remove a track's offline copy, cancelling its transfer if in flight
    ///
    /// Removing a track that is not offline succeeds without effect.
    pub async fn delete_offline(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.call(|reply| Command::Delete { id, reply }).await?
    }

    /// Remove every track of an album and then the album itself
    pub async fn delete_album(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.call(|reply| Command::DeleteAlbum { id, reply }).await?
    }

    /// Tracks whose transfer was interrupted, e.g. by a restart
    ///
    /// Resolve them with [`Self::delete_offline`] or by requesting the
    /// download again.
    pub async fn orphaned(&self) -> Result<Vec<OfflineTrack>> {
        self.call(|reply| Command::Orphaned { reply }).await
    }

    /// Fetch lyrics for downloaded tracks that have none, a few at a time
    ///
    /// Failed lookups are skipped. Returns how many lyrics were stored.
    pub async fn backfill_lyrics(&self, cancel: &CancellationToken) -> Result<usize> {
        let missing = self.reader.tracks_without_lyrics();
        if missing.is_empty() {
            return Ok(0);
        }
        info!("Fetching lyrics for {} track(s)", missing.len());

        let source = self.lyrics.clone();
        let timeout = self.config.lyrics_timeout();
        let fetched = parallel_map(missing, self.config.lyrics_parallelism, cancel, |track_id| {
            let source = source.clone();
            async move {
                let lyrics = fetch_lyrics(source.as_ref(), &track_id, timeout).await;
                Ok::<_, Infallible>((track_id, lyrics))
            }
        })
        .await;

        let batch: Vec<_> = match fetched {
            Ok(results) => results
                .into_iter()
                .filter_map(|(id, lyrics)| lyrics.map(|l| (id, l)))
                .collect(),
            Err(ParallelError::Cancelled) => {
                info!("Lyrics backfill cancelled");
                return Ok(0);
            }
            Err(ParallelError::Failed(never)) => match never {},
        };

        if batch.is_empty() {
            return Ok(0);
        }
        self.call(|reply| Command::StoreLyrics { batch, reply }).await?
    }

    /// Announce pending parent notifications and stop the orchestrator
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| Command::Shutdown { reply }).await
    }

    pub fn reader(&self) -> OfflineReader {
        self.reader.clone()
    }

    pub fn status(&self, track_id: &str) -> OfflineStatus {
        self.reader.status(track_id)
    }

    pub fn album_status(&self, album_id: &str) -> OfflineStatus {
        self.reader.album_status(album_id)
    }

    pub fn is_album_downloaded(&self, album_id: &str) -> bool {
        self.album_status(album_id) == OfflineStatus::Downloaded
    }

    pub fn lyrics(&self, track_id: &str) -> Option<Lyrics> {
        self.reader.lyrics(track_id)
    }
}

async fn fetch_lyrics(source: &dyn LyricsSource, track_id: &str, timeout: Duration) -> Option<Lyrics> {
    match tokio::time::timeout(timeout, source.fetch_lyrics(track_id)).await {
        Ok(Ok(lyrics)) => Some(lyrics),
        Ok(Err(e)) => {
            debug!("No lyrics for {}: {}", track_id, e);
            None
        }
        Err(_) => {
            debug!("Lyrics request for {} timed out", track_id);
            None
        }
    }
}

/// The single writer of offline state
struct Orchestrator {
    store: OfflineStore,
    files: OfflineFiles,
    transfers: Arc<dyn TransferBackend>,
    registry: TransferRegistry,
    notifier: ParentNotifier,
    bus: EventBus,
    lyrics: Arc<dyn LyricsSource>,
    lyrics_timeout: Duration,
    lyrics_tx: mpsc::UnboundedSender<(String, Option<Lyrics>)>,
}

impl Orchestrator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transfer_events: mpsc::UnboundedReceiver<TransferEvent>,
        mut lyrics: mpsc::UnboundedReceiver<(String, Option<Lyrics>)>,
    ) {
        debug!("Download orchestrator started");

        loop {
            // Callbacks take priority over new commands
            tokio::select! {
                biased;

                Some(event) = transfer_events.recv() => self.handle_transfer_event(event).await,
                Some((track_id, fetched)) = lyrics.recv() => self.lyrics_fetched(&track_id, fetched),
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.notifier.flush();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }

        self.notifier.flush();
        debug!("Download orchestrator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Request { request, reply } => {
                let _ = reply.send(self.request_download(request));
            }
            Command::Delete { id, reply } => {
                let _ = reply.send(self.delete_offline(&id).await);
            }
            Command::DeleteAlbum { id, reply } => {
                let _ = reply.send(self.delete_album(&id).await);
            }
            Command::StoreLyrics { batch, reply } => {
                let _ = reply.send(self.store.put_lyrics_batch(batch));
            }
            Command::Orphaned { reply } => {
                let _ = reply.send(self.orphaned());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn handle_transfer_event(&mut self, event: TransferEvent) {
        match event {
            TransferEvent::Succeeded {
                id,
                location,
                mime_type,
            } => self.transfer_succeeded(id, location, mime_type.as_deref()).await,
            TransferEvent::Failed { id, error } => self.transfer_failed(id, &error),
        }
    }

    fn request_download(&mut self, request: DownloadRequest) -> Result<Option<TransferHandle>> {
        let DownloadRequest {
            track,
            album,
            source,
        } = request;

        if let Some(existing) = self.store.reader().track(&track.id) {
            let Some(previous) = existing.download_id else {
                debug!("{} is already available offline", track.id);
                return Ok(None);
            };

            info!("Restarting download of {} (replacing transfer {})", track.id, previous);
            self.transfers.cancel(previous);
            self.registry.remove(previous);
            self.store.remove_track(&track.id)?;
        }

        let album = self.store.ensure_album(OfflineAlbum::from(album))?;
        let transfer_id = self.transfers.create(&source)?;

        let record = OfflineTrack::pending(track, &album.id, transfer_id);
        let track_id = record.id.clone();
        if let Err(e) = self.store.put_track(record) {
            self.transfers.cancel(transfer_id);
            return Err(e);
        }

        self.registry.register(transfer_id, &track_id);
        self.bus.post_status_changed(&track_id);

        info!("Download requested: {} (transfer {})", track_id, transfer_id);
        Ok(Some(TransferHandle::new(transfer_id, self.transfers.clone())))
    }

    async fn transfer_succeeded(&mut self, id: TransferId, location: PathBuf, mime_type: Option<&str>) {
        let Some(track_id) = self.registry.remove(id) else {
            debug!("Ignoring completion of unknown transfer {}", id);
            files::discard(&location).await;
            return;
        };

        if !self.is_current_transfer(&track_id, id) {
            debug!("Ignoring completion of stale transfer {} for {}", id, track_id);
            files::discard(&location).await;
            return;
        }

        let extension = files::extension_for_mime(mime_type);
        if let Err(e) = self.files.store_track(&track_id, extension, &location).await {
            warn!("Failed to store download of {}: {}", track_id, e);
            self.roll_back(&track_id);
            return;
        }

        match self.store.finalize_track(&track_id, extension) {
            Ok(true) => {}
            Ok(false) => {
                self.discard_content(&track_id, extension).await;
                return;
            }
            Err(e) => {
                warn!("Failed to finalize download of {}: {}", track_id, e);
                self.discard_content(&track_id, extension).await;
                self.roll_back(&track_id);
                return;
            }
        }

        info!("Download finished: {}", track_id);
        self.bus.post_status_changed(&track_id);
        self.notifier.notify(&track_id);
        self.spawn_lyrics_fetch(track_id);
    }

    fn transfer_failed(&mut self, id: TransferId, error: &TransferError) {
        let Some(track_id) = self.registry.remove(id) else {
            debug!("Ignoring failure of unknown transfer {}: {}", id, error);
            return;
        };

        if !self.is_current_transfer(&track_id, id) {
            debug!("Ignoring failure of stale transfer {} for {}", id, track_id);
            return;
        }

        warn!("Download of {} failed: {}", track_id, error);
        self.roll_back(&track_id);
    }

    fn is_current_transfer(&self, track_id: &str, id: TransferId) -> bool {
        self.store
            .reader()
            .track_by_download_id(id)
            .is_some_and(|t| t.id == track_id)
    }

    /// Return a track to `none` after its transfer could not be completed
    fn roll_back(&mut self, track_id: &str) {
        self.notifier.notify(track_id);
        if let Err(e) = self.store.remove_track(track_id) {
            error!("Failed to roll back {}: {}", track_id, e);
        }
        self.bus.post_status_changed(track_id);
    }

    async fn discard_content(&self, track_id: &str, extension: &str) {
        if let Err(e) = self.files.remove_track(track_id, extension).await {
            warn!("Failed to remove content of {}: {}", track_id, e);
        }
    }

    fn spawn_lyrics_fetch(&self, track_id: String) {
        let source = self.lyrics.clone();
        let timeout = self.lyrics_timeout;
        let results = self.lyrics_tx.clone();

        tokio::spawn(async move {
            let lyrics = fetch_lyrics(source.as_ref(), &track_id, timeout).await;
            let _ = results.send((track_id, lyrics));
        });
    }

    fn lyrics_fetched(&mut self, track_id: &str, lyrics: Option<Lyrics>) {
        let Some(lyrics) = lyrics else {
            return;
        };
        match self.store.put_lyrics(track_id, lyrics) {
            Ok(true) => debug!("Stored lyrics for {}", track_id),
            Ok(false) => debug!("Dropping lyrics for removed track {}", track_id),
            Err(e) => warn!("Failed to store lyrics for {}: {}", track_id, e),
        }
    }

    async fn delete_offline(&mut self, id: &str) -> Result<()> {
        let Some(track) = self.store.reader().track(id) else {
            debug!("{} has no offline copy", id);
            return Ok(());
        };

        // Cancel first so a late callback cannot resurrect the record
        if let Some(transfer_id) = track.download_id {
            self.transfers.cancel(transfer_id);
        }

        self.notifier.notify(id);
        self.store.remove_track(id)?;

        if let Some(transfer_id) = track.download_id {
            self.registry.remove(transfer_id);
        }
        if let Some(extension) = &track.file_type {
            self.discard_content(id, extension).await;
        }

        info!("Removed offline copy of {}", id);
        self.bus.post_status_changed(id);
        Ok(())
    }

    async fn delete_album(&mut self, id: &str) -> Result<()> {
        let children = self.store.reader().album_tracks(id);
        for track in &children {
            self.delete_offline(&track.id).await?;
        }

        if self.store.remove_album(id)?.is_some() || !children.is_empty() {
            info!("Removed offline album {}", id);
            self.bus.post_status_changed(id);
        }
        Ok(())
    }

    fn orphaned(&self) -> Vec<OfflineTrack> {
        self.store
            .reader()
            .unfinished()
            .into_iter()
            .filter(|t| t.download_id.is_some_and(|d| !self.registry.contains(d)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OfflineEvent;
    use crate::offline::{ArtistRef, TrackIndex};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    struct FakeTransfers {
        next: AtomicU64,
        events: mpsc::UnboundedSender<TransferEvent>,
        created: Mutex<Vec<TransferId>>,
        resumed: Mutex<Vec<TransferId>>,
        cancelled: Mutex<Vec<TransferId>>,
    }

    impl FakeTransfers {
        fn new(events: mpsc::UnboundedSender<TransferEvent>) -> Self {
            Self {
                next: AtomicU64::new(100),
                events,
                created: Mutex::new(Vec::new()),
                resumed: Mutex::new(Vec::new()),
                cancelled: Mutex::new(Vec::new()),
            }
        }

        fn was_cancelled(&self, id: TransferId) -> bool {
            self.cancelled.lock().unwrap().contains(&id)
        }
    }

    impl TransferBackend for FakeTransfers {
        fn create(&self, _source: &Url) -> Result<TransferId> {
            let id = TransferId(self.next.fetch_add(1, Ordering::SeqCst));
            self.created.lock().unwrap().push(id);
            Ok(id)
        }

        fn resume(&self, id: TransferId) {
            self.resumed.lock().unwrap().push(id);
        }

        fn cancel(&self, id: TransferId) {
            if !self.created.lock().unwrap().contains(&id) || self.was_cancelled(id) {
                return;
            }
            self.cancelled.lock().unwrap().push(id);
            let _ = self.events.send(TransferEvent::Failed {
                id,
                error: TransferError::Cancelled,
            });
        }
    }

    #[derive(Default)]
    struct FakeLyrics {
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl LyricsSource for FakeLyrics {
        async fn fetch_lyrics(&self, track_id: &str) -> anyhow::Result<Lyrics> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                anyhow::bail!("no lyrics for {}", track_id);
            }
            let mut lyrics = Lyrics::new();
            lyrics.insert(Duration::from_secs(1), Some("la la la"));
            Ok(lyrics)
        }
    }

    struct Harness {
        manager: DownloadManager,
        transfers: Arc<FakeTransfers>,
        files: OfflineFiles,
        events: broadcast::Receiver<OfflineEvent>,
        _dir: TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = OfflineStore::open(dir.path()).unwrap();
            Self::with_store(dir, store, FakeLyrics::default()).await
        }

        async fn with_store(dir: TempDir, store: OfflineStore, lyrics: FakeLyrics) -> Self {
            let files = OfflineFiles::new(dir.path().to_path_buf());
            files.init().await.unwrap();

            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let transfers = Arc::new(FakeTransfers::new(events_tx));
            let bus = EventBus::default();
            let events = bus.subscribe();

            let config = DownloadConfig {
                notify_debounce_ms: 100,
                ..Default::default()
            };
            let manager = DownloadManager::start(
                DownloadServices {
                    store,
                    files: files.clone(),
                    transfers: transfers.clone(),
                    transfer_events: events_rx,
                    lyrics: Arc::new(lyrics),
                    bus,
                },
                config,
            );

            Self {
                manager,
                transfers,
                files,
                events,
                _dir: dir,
            }
        }

        /// Wait until the orchestrator has handled everything queued so far
        async fn settle(&self) {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            self.manager.orphaned().await.unwrap();
        }

        async fn complete(&self, id: TransferId) -> PathBuf {
            let staged = self.files.staging_dir().join(format!("{}.part", id));
            std::fs::write(&staged, b"audio").unwrap();
            self.transfers
                .events
                .send(TransferEvent::Succeeded {
                    id,
                    location: staged.clone(),
                    mime_type: Some("audio/flac".to_string()),
                })
                .unwrap();
            self.settle().await;
            staged
        }

        async fn fail(&self, id: TransferId) {
            self.transfers
                .events
                .send(TransferEvent::Failed {
                    id,
                    error: TransferError::Status(500),
                })
                .unwrap();
            self.settle().await;
        }

        async fn request(&self, track_id: &str, album_id: &str) -> TransferHandle {
            self.manager
                .request_download(request(track_id, album_id))
                .await
                .unwrap()
                .expect("transfer created")
        }

        fn drain(&mut self) -> Vec<String> {
            let mut ids = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                ids.push(event.subject().to_string());
            }
            ids
        }
    }

    fn album(id: &str) -> AlbumInfo {
        AlbumInfo {
            id: id.to_string(),
            name: format!("Album {}", id),
            sort_name: None,
            artists: vec![ArtistRef::new("ar", "Artist")],
            release_date: None,
        }
    }

    fn track(id: &str) -> TrackInfo {
        TrackInfo {
            id: id.to_string(),
            name: format!("Track {}", id),
            sort_name: None,
            index: TrackIndex::new(1, 1),
            release_date: None,
            artists: vec![ArtistRef::new("ar", "Artist")],
            favorite: false,
        }
    }

    fn request(track_id: &str, album_id: &str) -> DownloadRequest {
        DownloadRequest {
            track: track(track_id),
            album: album(album_id),
            source: Url::parse(&format!("http://music.test/stream/{}", track_id)).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_successful_download_is_finalized() {
        let mut h = Harness::new().await;

        let handle = h.request("t1", "al").await;
        assert_eq!(h.manager.status("t1"), OfflineStatus::Working);
        assert_eq!(h.manager.album_status("al"), OfflineStatus::Working);

        handle.resume();
        assert_eq!(*h.transfers.resumed.lock().unwrap(), vec![handle.id()]);

        let staged = h.complete(handle.id()).await;

        let track = h.manager.reader().track("t1").unwrap();
        assert!(track.download_id.is_none());
        assert_eq!(track.file_type.as_deref(), Some("flac"));
        assert!(h.files.track_path("t1", "flac").exists());
        assert!(!staged.exists());
        assert!(h.manager.is_album_downloaded("al"));
        assert_eq!(h.drain().iter().filter(|id| *id == "t1").count(), 2);

        // Already available offline
        assert!(h.manager.request_download(request("t1", "al")).await.unwrap().is_none());
        assert_eq!(h.manager.download(request("t1", "al")).await.unwrap(), OfflineStatus::Downloaded);
    }

    #[tokio::test]
    async fn test_failed_transfer_rolls_back() {
        let mut h = Harness::new().await;
        let handle = h.request("t1", "al").await;

        h.fail(handle.id()).await;

        assert_eq!(h.manager.status("t1"), OfflineStatus::None);
        assert!(h.manager.reader().track("t1").is_none());
        assert_eq!(h.manager.album_status("al"), OfflineStatus::None);
        assert_eq!(h.drain().iter().filter(|id| *id == "t1").count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_transfer_callbacks_are_ignored() {
        let h = Harness::new().await;
        h.fail(TransferId(42)).await;
        let staged = h.complete(TransferId(43)).await;

        assert!(h.manager.reader().tracks().is_empty());
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_duplicate_success_callback_is_ignored() {
        let mut h = Harness::new().await;
        let handle = h.request("t1", "al").await;
        h.complete(handle.id()).await;

        let content = h.files.track_path("t1", "flac");
        std::fs::write(&content, b"finalized").unwrap();

        let staged = h.complete(handle.id()).await;

        assert_eq!(h.manager.status("t1"), OfflineStatus::Downloaded);
        assert_eq!(std::fs::read(&content).unwrap(), b"finalized");
        assert!(!staged.exists());
        assert_eq!(h.drain().iter().filter(|id| *id == "t1").count(), 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_on_request_leaves_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("store");
        let store = OfflineStore::open(&store_dir).unwrap();
        let mut h = Harness::with_store(dir, store, FakeLyrics::default()).await;

        std::fs::remove_dir_all(&store_dir).unwrap();

        let err = h.manager.request_download(request("t1", "al")).await.unwrap_err();
        assert!(matches!(err, OfflineError::PersistenceFailure(_)));
        assert_eq!(h.manager.status("t1"), OfflineStatus::None);
        assert!(h.manager.reader().album("al").is_none());
        assert!(h.transfers.created.lock().unwrap().is_empty());
        assert!(h.manager.orphaned().await.unwrap().is_empty());
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_on_finalize_discards_content() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("store");
        let store = OfflineStore::open(&store_dir).unwrap();
        let h = Harness::with_store(dir, store, FakeLyrics::default()).await;

        let handle = h.request("t1", "al").await;
        std::fs::remove_dir_all(&store_dir).unwrap();
        h.complete(handle.id()).await;

        assert_ne!(h.manager.status("t1"), OfflineStatus::Downloaded);
        assert!(!h.files.track_path("t1", "flac").exists());

        // The record the store kept is no longer tracked by a transfer
        let orphans = h.manager.orphaned().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, "t1");

        std::fs::create_dir_all(&store_dir).unwrap();
        h.manager.delete_offline("t1").await.unwrap();
        assert_eq!(h.manager.status("t1"), OfflineStatus::None);
    }

    #[tokio::test]
    async fn test_delete_without_record_succeeds() {
        let mut h = Harness::new().await;
        h.manager.delete_offline("nothing").await.unwrap();
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_new_request_replaces_in_flight_transfer() {
        let h = Harness::new().await;
        let first = h.request("t1", "al").await;
        let second = h.request("t1", "al").await;

        assert_ne!(first.id(), second.id());
        assert!(h.transfers.was_cancelled(first.id()));

        // Late completion of the replaced transfer
        let staged = h.complete(first.id()).await;
        assert!(!staged.exists());
        let track = h.manager.reader().track("t1").unwrap();
        assert_eq!(track.download_id, Some(second.id()));
        assert_eq!(h.manager.reader().tracks().len(), 1);

        h.complete(second.id()).await;
        assert_eq!(h.manager.status("t1"), OfflineStatus::Downloaded);
    }

    #[tokio::test]
    async fn test_delete_in_flight_cancels_and_ignores_late_callback() {
        let h = Harness::new().await;
        let handle = h.request("t1", "al").await;

        h.manager.delete_offline("t1").await.unwrap();
        assert!(h.transfers.was_cancelled(handle.id()));
        assert_eq!(h.manager.status("t1"), OfflineStatus::None);

        h.complete(handle.id()).await;
        assert_eq!(h.manager.status("t1"), OfflineStatus::None);
        assert!(!h.files.track_path("t1", "flac").exists());
    }

    #[tokio::test]
    async fn test_delete_downloaded_removes_content() {
        let h = Harness::new().await;
        let handle = h.request("t1", "al").await;
        h.complete(handle.id()).await;
        assert!(h.files.track_path("t1", "flac").exists());

        h.manager.delete_offline("t1").await.unwrap();

        assert_eq!(h.manager.status("t1"), OfflineStatus::None);
        assert!(!h.files.track_path("t1", "flac").exists());
        assert!(h.manager.lyrics("t1").is_none());
    }

    #[tokio::test]
    async fn test_move_failure_rolls_back() {
        let h = Harness::new().await;
        let handle = h.request("t1", "al").await;

        h.transfers
            .events
            .send(TransferEvent::Succeeded {
                id: handle.id(),
                location: h.files.staging_dir().join("vanished.part"),
                mime_type: None,
            })
            .unwrap();
        h.settle().await;

        assert_eq!(h.manager.status("t1"), OfflineStatus::None);
        assert!(!h.files.track_path("t1", "mp3").exists());
    }

    #[tokio::test]
    async fn test_lyrics_are_fetched_after_download() {
        let h = Harness::new().await;
        let handle = h.request("t1", "al").await;
        h.complete(handle.id()).await;

        let lyrics = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(lyrics) = h.manager.lyrics("t1") {
                    return lyrics;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(lyrics.len(), 2);
        assert!(!lyrics.is_blank());
    }

    #[tokio::test]
    async fn test_lyrics_failure_keeps_download_and_notifies_album() {
        let dir = tempfile::tempdir().unwrap();
        let store = OfflineStore::open(dir.path()).unwrap();
        let lyrics = FakeLyrics {
            fail: true,
            ..Default::default()
        };
        let mut h = Harness::with_store(dir, store, lyrics).await;

        let handle = h.request("t1", "al").await;
        h.complete(handle.id()).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(h.manager.status("t1"), OfflineStatus::Downloaded);
        assert!(h.manager.lyrics("t1").is_none());
        assert!(h.drain().contains(&"al".to_string()));
    }

    #[tokio::test]
    async fn test_slow_lyrics_do_not_delay_album_notification() {
        let dir = tempfile::tempdir().unwrap();
        let store = OfflineStore::open(dir.path()).unwrap();
        let lyrics = FakeLyrics {
            delay: Duration::from_secs(20),
            ..Default::default()
        };
        let mut h = Harness::with_store(dir, store, lyrics).await;

        let handle = h.request("t1", "al").await;
        h.complete(handle.id()).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(h.manager.is_album_downloaded("al"));
        assert!(h.manager.lyrics("t1").is_none());
        assert!(h.drain().contains(&"al".to_string()));
    }

    #[tokio::test]
    async fn test_sibling_completions_notify_album_once() {
        let mut h = Harness::new().await;
        let mut handles = Vec::new();
        for n in 0..6 {
            handles.push(h.request(&format!("t{}", n), "al").await);
        }
        for handle in &handles {
            h.complete(handle.id()).await;
        }

        tokio::time::sleep(Duration::from_millis(500)).await;

        let album_events = h.drain().into_iter().filter(|id| id == "al").count();
        assert_eq!(album_events, 1);
        assert!(h.manager.is_album_downloaded("al"));
    }

    #[tokio::test]
    async fn test_orphans_from_earlier_process() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = OfflineStore::open(dir.path()).unwrap();
            store.ensure_album(OfflineAlbum::from(album("al"))).unwrap();
            store
                .put_track(OfflineTrack::pending(track("t1"), "al", TransferId(7)))
                .unwrap();
        }
        let store = OfflineStore::open(dir.path()).unwrap();
        let h = Harness::with_store(dir, store, FakeLyrics::default()).await;

        let live = h.request("t2", "al").await;
        let orphans = h.manager.orphaned().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, "t1");
        assert_eq!(h.manager.reader().track("t2").unwrap().download_id, Some(live.id()));

        h.manager.delete_offline("t1").await.unwrap();
        assert!(h.manager.orphaned().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_album_removes_children() {
        let h = Harness::new().await;
        let first = h.request("t1", "al").await;
        let second = h.request("t2", "al").await;
        h.complete(first.id()).await;

        h.manager.delete_album("al").await.unwrap();

        assert!(h.transfers.was_cancelled(second.id()));
        assert!(h.manager.reader().album("al").is_none());
        assert!(h.manager.reader().tracks().is_empty());
        assert!(!h.files.track_path("t1", "flac").exists());
    }

    #[tokio::test]
    async fn test_download_album_starts_every_track() {
        let h = Harness::new().await;
        let tracks = ["t1", "t2", "t3"]
            .iter()
            .map(|id| (track(id), Url::parse("http://music.test/stream").unwrap()))
            .collect();

        let started = h.manager.download_album(album("al"), tracks).await.unwrap();

        assert_eq!(started, 3);
        assert_eq!(h.transfers.resumed.lock().unwrap().len(), 3);
        assert_eq!(h.manager.album_status("al"), OfflineStatus::Working);
    }

    #[tokio::test]
    async fn test_backfill_lyrics_for_finalized_tracks() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = OfflineStore::open(dir.path()).unwrap();
            for (n, id) in ["t1", "t2", "t3"].iter().enumerate() {
                store
                    .put_track(OfflineTrack::pending(track(id), "al", TransferId(n as u64 + 1)))
                    .unwrap();
            }
            store.finalize_track("t1", "mp3").unwrap();
            store.finalize_track("t2", "mp3").unwrap();
        }
        let store = OfflineStore::open(dir.path()).unwrap();
        let h = Harness::with_store(dir, store, FakeLyrics::default()).await;

        let stored = h.manager.backfill_lyrics(&CancellationToken::new()).await.unwrap();

        assert_eq!(stored, 2);
        assert!(h.manager.lyrics("t1").is_some());
        assert!(h.manager.lyrics("t3").is_none());
        assert_eq!(h.manager.backfill_lyrics(&CancellationToken::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_calls_fail_after_shutdown() {
        let h = Harness::new().await;
        h.manager.shutdown().await.unwrap();

        let err = h.manager.delete_offline("t1").await.unwrap_err();
        assert!(matches!(err, OfflineError::ManagerClosed));
    }
}
