//! Persisted offline entities

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::transfer::TransferId;

/// Reference to an artist as carried by tracks and albums
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

impl ArtistRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Position of a track within its album
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackIndex {
    pub disc: u32,
    pub index: u32,
}

impl TrackIndex {
    pub fn new(disc: u32, index: u32) -> Self {
        Self { disc, index }
    }
}

/// Catalog description of a track, as handed to the download manager
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub id: String,
    pub name: String,
    pub sort_name: Option<String>,
    pub index: TrackIndex,
    pub release_date: Option<NaiveDate>,
    pub artists: Vec<ArtistRef>,
    pub favorite: bool,
}

/// Catalog description of the album owning a requested track
#[derive(Debug, Clone, PartialEq)]
pub struct AlbumInfo {
    pub id: String,
    pub name: String,
    pub sort_name: Option<String>,
    pub artists: Vec<ArtistRef>,
    pub release_date: Option<NaiveDate>,
}

/// Offline state of a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfflineStatus {
    /// No offline record
    None,
    /// A transfer is in flight
    Working,
    /// Content is at rest in permanent storage
    Downloaded,
}

impl fmt::Display for OfflineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "not downloaded",
            Self::Working => "downloading",
            Self::Downloaded => "downloaded",
        };
        f.write_str(label)
    }
}

/// A track tracked by the offline store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineTrack {
    pub id: String,
    pub name: String,
    /// Lowercased sort name, falls back to the name
    pub sort_name: String,
    pub index: TrackIndex,
    pub release_date: Option<NaiveDate>,
    pub artists: Vec<ArtistRef>,
    pub favorite: bool,
    /// Set while a transfer is in flight, cleared once finalized
    pub download_id: Option<TransferId>,
    /// Owning album
    pub album_id: String,
    pub added_at: DateTime<Utc>,
    /// File extension of the stored content, known once finalized
    pub file_type: Option<String>,
}

impl OfflineTrack {
    /// Build the pending record for a freshly requested download
    pub fn pending(info: TrackInfo, album_id: &str, download_id: TransferId) -> Self {
        let sort_name = info
            .sort_name
            .unwrap_or_else(|| info.name.clone())
            .to_lowercase();

        Self {
            id: info.id,
            name: info.name,
            sort_name,
            index: info.index,
            release_date: info.release_date,
            artists: info.artists,
            favorite: info.favorite,
            download_id: Some(download_id),
            album_id: album_id.to_string(),
            added_at: Utc::now(),
            file_type: None,
        }
    }

    pub fn status(&self) -> OfflineStatus {
        if self.download_id.is_some() {
            OfflineStatus::Working
        } else {
            OfflineStatus::Downloaded
        }
    }

    pub fn is_downloaded(&self) -> bool {
        self.download_id.is_none()
    }
}

/// An album owning one or more offline tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineAlbum {
    pub id: String,
    pub name: String,
    pub sort_name: String,
    pub artists: Vec<ArtistRef>,
    pub release_date: Option<NaiveDate>,
    pub added_at: DateTime<Utc>,
}

impl From<AlbumInfo> for OfflineAlbum {
    fn from(info: AlbumInfo) -> Self {
        let sort_name = info
            .sort_name
            .unwrap_or_else(|| info.name.clone())
            .to_lowercase();

        Self {
            id: info.id,
            name: info.name,
            sort_name,
            artists: info.artists,
            release_date: info.release_date,
            added_at: Utc::now(),
        }
    }
}

/// Time-synced lyrics: offset from the start of the track to a line of text
///
/// A `None` line is a deliberate gap; offset zero always has an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<LyricLine>", into = "Vec<LyricLine>")]
pub struct Lyrics(BTreeMap<Duration, Option<String>>);

#[derive(Serialize, Deserialize)]
struct LyricLine {
    /// Offset in seconds
    start: f64,
    text: Option<String>,
}

impl Lyrics {
    /// Empty lyrics containing only the leading gap at offset zero
    pub fn new() -> Self {
        let mut lines = BTreeMap::new();
        lines.insert(Duration::ZERO, None);
        Self(lines)
    }

    /// Insert a line; blank text is stored as a gap
    pub fn insert(&mut self, offset: Duration, text: Option<&str>) {
        let text = text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        self.0.insert(offset, text);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Duration, Option<&str>)> {
        self.0.iter().map(|(offset, text)| (offset, text.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no line carries text
    pub fn is_blank(&self) -> bool {
        self.0.values().all(Option::is_none)
    }
}

impl Default for Lyrics {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<LyricLine>> for Lyrics {
    fn from(lines: Vec<LyricLine>) -> Self {
        let mut lyrics = Self::new();
        for line in lines {
            let offset = Duration::try_from_secs_f64(line.start).unwrap_or_default();
            lyrics.0.insert(offset, line.text);
        }
        lyrics
    }
}

impl From<Lyrics> for Vec<LyricLine> {
    fn from(lyrics: Lyrics) -> Self {
        lyrics
            .0
            .into_iter()
            .map(|(offset, text)| LyricLine {
                start: offset.as_secs_f64(),
                text,
            })
            .collect()
    }
}

/// Lyrics stored for an offline track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineLyrics {
    pub track_id: String,
    pub lyrics: Lyrics,
}
