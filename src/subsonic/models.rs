//! Subsonic API response models

use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

use crate::offline::{AlbumInfo, ArtistRef, Lyrics, TrackIndex, TrackInfo};

/// Wrapper for all Subsonic API responses
#[derive(Debug, Clone, Deserialize)]
pub struct SubsonicResponse<T> {
    #[serde(rename = "subsonic-response")]
    pub subsonic_response: SubsonicResponseInner<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubsonicResponseInner<T> {
    pub status: String,
    pub version: String,
    #[serde(flatten)]
    pub data: Option<T>,
    pub error: Option<SubsonicError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubsonicError {
    pub code: i32,
    pub message: String,
}

/// Empty payload of endpoints that only report status
#[derive(Debug, Clone, Deserialize)]
pub struct Empty {}

// Song response (getSong)
#[derive(Debug, Clone, Deserialize)]
pub struct SongData {
    pub song: Song,
}

/// Song/track from the library
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: String,
    pub title: String,
    pub album: Option<String>,
    pub album_id: Option<String>,
    pub artist: Option<String>,
    pub artist_id: Option<String>,
    pub track: Option<u32>,
    pub disc_number: Option<u32>,
    pub year: Option<i32>,
    pub duration: Option<u32>,
    pub suffix: Option<String>,
    pub content_type: Option<String>,
    /// Set when the user starred the song
    pub starred: Option<String>,
}

impl Song {
    pub fn to_track_info(&self) -> TrackInfo {
        TrackInfo {
            id: self.id.clone(),
            name: self.title.clone(),
            sort_name: None,
            index: TrackIndex::new(self.disc_number.unwrap_or(1), self.track.unwrap_or(0)),
            release_date: self.year.and_then(year_start),
            artists: artist_refs(self.artist_id.as_deref(), self.artist.as_deref()),
            favorite: self.starred.is_some(),
        }
    }
}

// Album with songs response (getAlbum)
#[derive(Debug, Clone, Deserialize)]
pub struct AlbumData {
    pub album: AlbumWithSongs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumWithSongs {
    pub id: String,
    pub name: String,
    pub artist: Option<String>,
    pub artist_id: Option<String>,
    pub song_count: Option<u32>,
    pub year: Option<i32>,
    #[serde(default)]
    pub song: Vec<Song>,
}

impl AlbumWithSongs {
    pub fn to_album_info(&self) -> AlbumInfo {
        AlbumInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            sort_name: None,
            artists: artist_refs(self.artist_id.as_deref(), self.artist.as_deref()),
            release_date: self.year.and_then(year_start),
        }
    }
}

// Lyrics response (OpenSubsonic getLyricsBySongId)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricsListData {
    pub lyrics_list: LyricsList,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricsList {
    #[serde(default)]
    pub structured_lyrics: Vec<StructuredLyrics>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StructuredLyrics {
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub line: Vec<LyricsLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LyricsLine {
    /// Milliseconds from the start of the track
    pub start: Option<u64>,
    #[serde(default)]
    pub value: String,
}

impl LyricsList {
    /// First synced entry as time-indexed lyrics, if the server has one
    pub fn into_synced(self) -> Option<Lyrics> {
        let entry = self.structured_lyrics.into_iter().find(|l| l.synced)?;

        let mut lyrics = Lyrics::new();
        for line in entry.line {
            let offset = Duration::from_millis(line.start.unwrap_or(0));
            lyrics.insert(offset, Some(&line.value));
        }
        Some(lyrics)
    }
}

fn year_start(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 1, 1)
}

fn artist_refs(id: Option<&str>, name: Option<&str>) -> Vec<ArtistRef> {
    match (id, name) {
        (Some(id), Some(name)) => vec![ArtistRef::new(id, name)],
        (None, Some(name)) => vec![ArtistRef::new(name, name)],
        _ => Vec::new(),
    }
}
