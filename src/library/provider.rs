//! Library providers and the offline implementation
//!
//! Callers talk to a [`LibraryProvider`] and never need to know whether the
//! answers come from the remote catalog or from offline copies. What a
//! provider cannot answer is advertised through [`Capabilities`] instead of
//! failing at call time.

use async_trait::async_trait;
use std::collections::HashMap;

use super::models::{Album, Artist, Track};
use super::sort::{SortOrder, compare_albums, compare_tracks, sort_items};
use crate::error::{OfflineError, Result};
use crate::offline::{OfflineAlbum, OfflineReader};

/// Default cap on search and recent-album results
pub const DEFAULT_RESULT_LIMIT: usize = 20;

/// Queries a provider can answer meaningfully
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub supports_artist_lookup: bool,
    pub supports_favorites_lookup: bool,
    pub supports_advanced_filters: bool,
}

#[async_trait]
pub trait LibraryProvider: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    async fn tracks(&self, order: SortOrder, ascending: bool) -> Result<Vec<Track>>;
    async fn favorite_tracks(&self, order: SortOrder, ascending: bool) -> Result<Vec<Track>>;
    async fn search_tracks(&self, query: &str) -> Result<Vec<Track>>;

    async fn albums(&self, limit: Option<usize>, order: SortOrder, ascending: bool) -> Result<Vec<Album>>;
    async fn recent_albums(&self) -> Result<Vec<Album>>;
    async fn album(&self, id: &str) -> Result<Album>;
    async fn album_tracks(&self, id: &str) -> Result<Vec<Track>>;
    async fn search_albums(&self, query: &str) -> Result<Vec<Album>>;

    async fn artists(&self) -> Result<Vec<Artist>>;
    async fn artist_albums(&self, id: &str, order: SortOrder, ascending: bool) -> Result<Vec<Album>>;
}

/// Answers library queries from the offline store alone
#[derive(Debug, Clone)]
pub struct OfflineLibrary {
    reader: OfflineReader,
    limit: usize,
}

impl OfflineLibrary {
    pub fn new(reader: OfflineReader) -> Self {
        Self::with_limit(reader, DEFAULT_RESULT_LIMIT)
    }

    pub fn with_limit(reader: OfflineReader, limit: usize) -> Self {
        Self { reader, limit }
    }

    fn all_tracks(&self) -> Vec<Track> {
        let albums: HashMap<String, OfflineAlbum> = self
            .reader
            .albums()
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();

        self.reader
            .tracks()
            .into_iter()
            .map(|t| {
                let album = albums.get(&t.album_id);
                Track::from_offline(t, album)
            })
            .collect()
    }

    fn to_album(&self, album: OfflineAlbum) -> Album {
        let status = self.reader.album_status(&album.id);
        Album::from_offline(album, status)
    }

    fn all_albums(&self) -> Vec<Album> {
        self.reader
            .albums()
            .into_iter()
            .map(|a| self.to_album(a))
            .collect()
    }
}

#[async_trait]
impl LibraryProvider for OfflineLibrary {
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn tracks(&self, order: SortOrder, ascending: bool) -> Result<Vec<Track>> {
        let mut tracks = self.all_tracks();
        sort_items(&mut tracks, ascending, |a, b| compare_tracks(a, b, order));
        Ok(tracks)
    }

    async fn favorite_tracks(&self, _order: SortOrder, _ascending: bool) -> Result<Vec<Track>> {
        Ok(Vec::new())
    }

    async fn search_tracks(&self, query: &str) -> Result<Vec<Track>> {
        let query = query.to_lowercase();
        Ok(self
            .all_tracks()
            .into_iter()
            .filter(|t| t.sort_name.contains(&query))
            .take(self.limit)
            .collect())
    }

    async fn albums(&self, limit: Option<usize>, order: SortOrder, ascending: bool) -> Result<Vec<Album>> {
        let mut albums = self.all_albums();
        sort_items(&mut albums, ascending, |a, b| compare_albums(a, b, order));
        if let Some(limit) = limit {
            albums.truncate(limit);
        }
        Ok(albums)
    }

    async fn recent_albums(&self) -> Result<Vec<Album>> {
        self.albums(Some(self.limit), SortOrder::Added, false).await
    }

    async fn album(&self, id: &str) -> Result<Album> {
        self.reader
            .album(id)
            .map(|a| self.to_album(a))
            .ok_or_else(|| OfflineError::not_found("album", id))
    }

    async fn album_tracks(&self, id: &str) -> Result<Vec<Track>> {
        let album = self
            .reader
            .album(id)
            .ok_or_else(|| OfflineError::not_found("album", id))?;

        Ok(self
            .reader
            .album_tracks(id)
            .into_iter()
            .map(|t| Track::from_offline(t, Some(&album)))
            .collect())
    }

    async fn search_albums(&self, query: &str) -> Result<Vec<Album>> {
        let query = query.to_lowercase();
        Ok(self
            .all_albums()
            .into_iter()
            .filter(|a| a.sort_name.contains(&query) || a.name.to_lowercase().contains(&query))
            .take(self.limit)
            .collect())
    }

    async fn artists(&self) -> Result<Vec<Artist>> {
        Ok(Vec::new())
    }

    async fn artist_albums(&self, _id: &str, _order: SortOrder, _ascending: bool) -> Result<Vec<Album>> {
        Ok(Vec::new())
    }
}
