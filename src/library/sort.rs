//! Sort orders shared by every library provider

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::models::{Album, Track};
use crate::offline::ArtistRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    #[default]
    Name,
    Album,
    #[value(name = "album-artist", alias = "albumArtist")]
    AlbumArtist,
    Artist,
    Added,
    Released,
    Plays,
    Runtime,
}

impl SortOrder {
    /// Orders the offline library has the data for
    ///
    /// Play counts and durations are not kept offline; the other orders
    /// leave the input untouched.
    pub fn is_supported_offline(self) -> bool {
        !matches!(self, Self::Plays | Self::Runtime)
    }
}

fn first_artist(artists: &[ArtistRef]) -> Option<String> {
    artists.first().map(|a| a.name.to_lowercase())
}

/// Missing values compare lowest, so items without metadata come first
/// in ascending order
pub fn compare_tracks(a: &Track, b: &Track, order: SortOrder) -> Ordering {
    let primary = match order {
        SortOrder::Name => Ordering::Equal,
        SortOrder::Album => a
            .album
            .name
            .as_ref()
            .map(|n| n.to_lowercase())
            .cmp(&b.album.name.as_ref().map(|n| n.to_lowercase()))
            .then_with(|| a.index.cmp(&b.index)),
        SortOrder::AlbumArtist => first_artist(&a.album.artists).cmp(&first_artist(&b.album.artists)),
        SortOrder::Artist => first_artist(&a.artists).cmp(&first_artist(&b.artists)),
        SortOrder::Added => a.added_at.cmp(&b.added_at),
        SortOrder::Released => a.release_date.cmp(&b.release_date),
        SortOrder::Plays | SortOrder::Runtime => return Ordering::Equal,
    };
    primary.then_with(|| a.sort_name.cmp(&b.sort_name))
}

pub fn compare_albums(a: &Album, b: &Album, order: SortOrder) -> Ordering {
    let primary = match order {
        SortOrder::Name | SortOrder::Album => Ordering::Equal,
        SortOrder::AlbumArtist | SortOrder::Artist => first_artist(&a.artists).cmp(&first_artist(&b.artists)),
        SortOrder::Added => a.added_at.cmp(&b.added_at),
        SortOrder::Released => a.release_date.cmp(&b.release_date),
        SortOrder::Plays | SortOrder::Runtime => return Ordering::Equal,
    };
    primary.then_with(|| a.sort_name.cmp(&b.sort_name))
}

/// Stable sort; equal items keep their relative order in both directions
pub fn sort_items<T>(items: &mut [T], ascending: bool, compare: impl Fn(&T, &T) -> Ordering) {
    if ascending {
        items.sort_by(|a, b| compare(a, b));
    } else {
        items.sort_by(|a, b| compare(b, a));
    }
}
