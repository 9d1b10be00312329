//! Catalog-shaped items returned by library providers

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::offline::{ArtistRef, OfflineAlbum, OfflineStatus, OfflineTrack, TrackIndex};

/// Album a track belongs to, as far as the track knows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlbumRef {
    pub id: String,
    pub name: Option<String>,
    pub artists: Vec<ArtistRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub sort_name: String,
    pub index: TrackIndex,
    pub album: AlbumRef,
    pub artists: Vec<ArtistRef>,
    pub release_date: Option<NaiveDate>,
    pub added_at: Option<DateTime<Utc>>,
    pub favorite: bool,
    pub offline: OfflineStatus,
}

impl Track {
    /// Build from an offline record and its owning album, if still known
    pub fn from_offline(track: OfflineTrack, album: Option<&OfflineAlbum>) -> Self {
        let offline = track.status();
        Self {
            album: AlbumRef {
                id: track.album_id,
                name: album.map(|a| a.name.clone()),
                artists: album.map(|a| a.artists.clone()).unwrap_or_default(),
            },
            id: track.id,
            name: track.name,
            sort_name: track.sort_name,
            index: track.index,
            artists: track.artists,
            release_date: track.release_date,
            added_at: Some(track.added_at),
            favorite: track.favorite,
            offline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub sort_name: String,
    pub artists: Vec<ArtistRef>,
    pub release_date: Option<NaiveDate>,
    pub added_at: Option<DateTime<Utc>>,
    pub offline: OfflineStatus,
}

impl Album {
    pub fn from_offline(album: OfflineAlbum, offline: OfflineStatus) -> Self {
        Self {
            id: album.id,
            name: album.name,
            sort_name: album.sort_name,
            artists: album.artists,
            release_date: album.release_date,
            added_at: Some(album.added_at),
            offline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
}
