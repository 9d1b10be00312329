//! Command line interface

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::library::SortOrder;

mod auth;
pub mod commands;
mod session;

#[derive(Parser, Debug)]
#[command(name = "tunestash", about = "Keep an offline copy of Subsonic music")]
#[command(version, author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configure the Subsonic server and storage location
    Configure {
        /// Subsonic server URL (prompted if not provided)
        #[arg(long, env = "SUBSONIC_URL")]
        url: Option<String>,

        /// Username (prompted if not provided)
        #[arg(short, long, env = "SUBSONIC_USER")]
        username: Option<String>,

        /// Password (prompted if not provided)
        #[arg(short, long, env = "SUBSONIC_PASS", hide_env_values = true)]
        password: Option<String>,

        /// Where offline copies are kept
        #[arg(long)]
        storage_dir: Option<PathBuf>,
    },

    /// Make tracks available offline
    Download {
        /// Track ids
        #[arg(value_name = "TRACK_ID", required_unless_present = "album")]
        tracks: Vec<String>,

        /// Download every track of this album instead
        #[arg(long, value_name = "ALBUM_ID", conflicts_with = "tracks")]
        album: Option<String>,
    },

    /// Remove the offline copy of a track or album
    Remove {
        /// Track or album id
        id: String,
    },

    /// List offline tracks or albums
    List {
        /// List albums instead of tracks
        #[arg(long)]
        albums: bool,

        /// Sort order
        #[arg(short, long, value_enum, default_value_t = SortOrder::Name)]
        sort: SortOrder,

        /// Reverse the sort order
        #[arg(short, long)]
        descending: bool,
    },

    /// Search offline tracks or albums by name
    Search {
        query: String,

        /// Search albums instead of tracks
        #[arg(long)]
        albums: bool,
    },

    /// Show the offline status of a track or album
    Status {
        /// Track or album id
        id: String,
    },

    /// Print the stored lyrics of a track
    Lyrics {
        #[arg(value_name = "TRACK_ID")]
        track: String,
    },

    /// Show downloads interrupted by an earlier run
    Pending {
        /// Remove the interrupted downloads
        #[arg(long, conflicts_with = "retry")]
        discard: bool,

        /// Download the interrupted tracks again
        #[arg(long)]
        retry: bool,
    },

    /// Fetch lyrics for offline tracks that have none
    BackfillLyrics,

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}
