//! Persisted offline store
//!
//! The store keeps every offline track, album and lyrics record in memory
//! and mirrors it to `offline.json` in the storage directory after each
//! mutation. [`OfflineStore`] is the only writer and is owned by the
//! download manager; any number of [`OfflineReader`]s observe the state
//! left by the last completed mutation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tracing::debug;

use super::models::{Lyrics, OfflineAlbum, OfflineLyrics, OfflineStatus, OfflineTrack};
use crate::error::{OfflineError, Result};
use crate::transfer::TransferId;

const STORE_FILE: &str = "offline.json";
const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreState {
    version: u32,
    tracks: BTreeMap<String, OfflineTrack>,
    albums: BTreeMap<String, OfflineAlbum>,
    lyrics: BTreeMap<String, OfflineLyrics>,
    /// In-flight transfer id -> track id
    #[serde(skip)]
    by_download: HashMap<TransferId, String>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            tracks: BTreeMap::new(),
            albums: BTreeMap::new(),
            lyrics: BTreeMap::new(),
            by_download: HashMap::new(),
        }
    }
}

impl StoreState {
    fn reindex(&mut self) {
        self.by_download = self
            .tracks
            .values()
            .filter_map(|t| t.download_id.map(|d| (d, t.id.clone())))
            .collect();
    }

    fn remove_track(&mut self, id: &str) -> Option<OfflineTrack> {
        let track = self.tracks.remove(id)?;
        if let Some(download_id) = track.download_id {
            self.by_download.remove(&download_id);
        }
        self.lyrics.remove(id);
        Some(track)
    }
}

/// Single writer of the offline store
#[derive(Debug)]
pub struct OfflineStore {
    state: Arc<RwLock<StoreState>>,
    path: Option<PathBuf>,
}

impl OfflineStore {
    /// Open the store kept in `dir`, creating an empty one if none exists
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| OfflineError::filesystem(dir, e))?;
        let path = dir.join(STORE_FILE);

        let state = if path.exists() {
            let content = std::fs::read(&path).map_err(OfflineError::PersistenceFailure)?;
            let mut state: StoreState = serde_json::from_slice(&content)?;
            state.reindex();
            debug!(
                "Loaded offline store: {} tracks, {} albums, {} lyrics",
                state.tracks.len(),
                state.albums.len(),
                state.lyrics.len()
            );
            state
        } else {
            debug!("No offline store at {}, starting empty", path.display());
            StoreState::default()
        };

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            path: Some(path),
        })
    }

    /// A store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            path: None,
        }
    }

    pub fn reader(&self) -> OfflineReader {
        OfflineReader {
            state: self.state.clone(),
        }
    }

    /// Apply `change` and persist the result
    ///
    /// If the change or the write fails, the in-memory state is restored
    /// to what it was before.
    fn mutate<T>(&mut self, change: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let snapshot = state.clone();

        let value = match change(&mut *state) {
            Ok(value) => value,
            Err(e) => {
                *state = snapshot;
                return Err(e);
            }
        };

        if let Some(path) = &self.path {
            if let Err(e) = persist(&state, path) {
                *state = snapshot;
                return Err(e);
            }
        }

        Ok(value)
    }

    /// Insert or replace a track record
    ///
    /// Fails if the record's transfer id already belongs to another track.
    pub fn put_track(&mut self, track: OfflineTrack) -> Result<()> {
        self.mutate(|state| {
            if let Some(download_id) = track.download_id {
                if let Some(owner) = state.by_download.get(&download_id) {
                    if *owner != track.id {
                        return Err(OfflineError::PersistenceFailure(io::Error::new(
                            io::ErrorKind::AlreadyExists,
                            format!("transfer {} already belongs to {}", download_id, owner),
                        )));
                    }
                }
            }

            state.remove_track(&track.id);
            if let Some(download_id) = track.download_id {
                state.by_download.insert(download_id, track.id.clone());
            }
            state.tracks.insert(track.id.clone(), track);
            Ok(())
        })
    }

    /// Insert the album unless a record with its id exists; returns the stored album
    pub fn ensure_album(&mut self, album: OfflineAlbum) -> Result<OfflineAlbum> {
        self.mutate(|state| {
            Ok(state
                .albums
                .entry(album.id.clone())
                .or_insert(album)
                .clone())
        })
    }

    /// Clear the in-flight marker of a track and record its file type
    ///
    /// Returns false if the track does not exist.
    pub fn finalize_track(&mut self, id: &str, file_type: &str) -> Result<bool> {
        self.mutate(|state| {
            let Some(track) = state.tracks.get_mut(id) else {
                return Ok(false);
            };
            if let Some(download_id) = track.download_id.take() {
                state.by_download.remove(&download_id);
            }
            track.file_type = Some(file_type.to_string());
            Ok(true)
        })
    }

    /// Remove a track and its lyrics
    pub fn remove_track(&mut self, id: &str) -> Result<Option<OfflineTrack>> {
        if !self.reader().contains_track(id) {
            return Ok(None);
        }
        self.mutate(|state| Ok(state.remove_track(id)))
    }

    /// Remove an album record; child tracks are left untouched
    pub fn remove_album(&mut self, id: &str) -> Result<Option<OfflineAlbum>> {
        if self.reader().album(id).is_none() {
            return Ok(None);
        }
        self.mutate(|state| Ok(state.albums.remove(id)))
    }

    /// Store lyrics for an existing track; returns false if the track is gone
    pub fn put_lyrics(&mut self, track_id: &str, lyrics: Lyrics) -> Result<bool> {
        self.put_lyrics_batch(vec![(track_id.to_string(), lyrics)])
            .map(|stored| stored == 1)
    }

    /// Store several lyrics records in one write; returns how many were stored
    pub fn put_lyrics_batch(&mut self, batch: Vec<(String, Lyrics)>) -> Result<usize> {
        self.mutate(|state| {
            let mut stored = 0;
            for (track_id, lyrics) in batch {
                if !state.tracks.contains_key(&track_id) {
                    continue;
                }
                state.lyrics.insert(
                    track_id.clone(),
                    OfflineLyrics { track_id, lyrics },
                );
                stored += 1;
            }
            Ok(stored)
        })
    }
}

fn persist(state: &StoreState, path: &Path) -> Result<()> {
    let content = serde_json::to_vec_pretty(state)?;

    // The new document must be on disk before it replaces the old one
    let tmp = path.with_extension("json.tmp");
    let save = || -> io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(&content)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    };
    if let Err(e) = save() {
        let _ = std::fs::remove_file(&tmp);
        return Err(OfflineError::PersistenceFailure(e));
    }

    debug!("Saved offline store to {}", path.display());
    Ok(())
}

/// Read-only view of the offline store
#[derive(Debug, Clone)]
pub struct OfflineReader {
    state: Arc<RwLock<StoreState>>,
}

impl OfflineReader {
    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains_track(&self, id: &str) -> bool {
        self.read().tracks.contains_key(id)
    }

    pub fn track(&self, id: &str) -> Option<OfflineTrack> {
        self.read().tracks.get(id).cloned()
    }

    pub fn track_by_download_id(&self, download_id: TransferId) -> Option<OfflineTrack> {
        let state = self.read();
        state
            .by_download
            .get(&download_id)
            .and_then(|id| state.tracks.get(id))
            .cloned()
    }

    /// All tracks in id order
    pub fn tracks(&self) -> Vec<OfflineTrack> {
        self.read().tracks.values().cloned().collect()
    }

    /// Tracks whose transfer has not been finalized
    pub fn unfinished(&self) -> Vec<OfflineTrack> {
        self.read()
            .tracks
            .values()
            .filter(|t| t.download_id.is_some())
            .cloned()
            .collect()
    }

    pub fn album(&self, id: &str) -> Option<OfflineAlbum> {
        self.read().albums.get(id).cloned()
    }

    pub fn albums(&self) -> Vec<OfflineAlbum> {
        self.read().albums.values().cloned().collect()
    }

    /// Child tracks of an album ordered by disc and index
    pub fn album_tracks(&self, album_id: &str) -> Vec<OfflineTrack> {
        let mut tracks: Vec<_> = self
            .read()
            .tracks
            .values()
            .filter(|t| t.album_id == album_id)
            .cloned()
            .collect();
        tracks.sort_by_key(|t| t.index);
        tracks
    }

    /// Ids of the entities whose aggregate status depends on `child_id`
    pub fn parent_ids(&self, child_id: &str) -> Vec<String> {
        let state = self.read();
        state
            .tracks
            .get(child_id)
            .filter(|t| state.albums.contains_key(&t.album_id))
            .map(|t| vec![t.album_id.clone()])
            .unwrap_or_default()
    }

    pub fn status(&self, track_id: &str) -> OfflineStatus {
        self.read()
            .tracks
            .get(track_id)
            .map_or(OfflineStatus::None, OfflineTrack::status)
    }

    /// Derived album status: downloaded once every child is finalized
    pub fn album_status(&self, album_id: &str) -> OfflineStatus {
        let state = self.read();
        let mut children = state.tracks.values().filter(|t| t.album_id == album_id).peekable();

        if children.peek().is_none() {
            return OfflineStatus::None;
        }
        if children.all(OfflineTrack::is_downloaded) {
            OfflineStatus::Downloaded
        } else {
            OfflineStatus::Working
        }
    }

    pub fn lyrics(&self, track_id: &str) -> Option<Lyrics> {
        self.read().lyrics.get(track_id).map(|l| l.lyrics.clone())
    }

    /// Finalized tracks that have no lyrics stored
    pub fn tracks_without_lyrics(&self) -> Vec<String> {
        let state = self.read();
        state
            .tracks
            .values()
            .filter(|t| t.is_downloaded() && !state.lyrics.contains_key(&t.id))
            .map(|t| t.id.clone())
            .collect()
    }
}
