//! Offline entities and their persisted store

pub mod models;
pub mod store;

pub use models::{
    AlbumInfo, ArtistRef, Lyrics, OfflineAlbum, OfflineLyrics, OfflineStatus, OfflineTrack,
    TrackIndex, TrackInfo,
};
pub use store::{OfflineReader, OfflineStore};
