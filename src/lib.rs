//! tunestash - offline copies of a Subsonic library
//!
//! Tracks requested for offline use are fetched in the background, moved
//! into permanent storage and recorded in a persisted offline store. The
//! [`download::DownloadManager`] serialises every change to that store;
//! [`library::OfflineLibrary`] answers catalog-shaped queries from it.

pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod library;
pub mod offline;
pub mod subsonic;
pub mod transfer;

pub use error::{OfflineError, Result};
