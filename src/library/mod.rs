//! Catalog-shaped queries answered from offline copies

pub mod models;
pub mod provider;
pub mod sort;

pub use models::{Album, AlbumRef, Artist, Track};
pub use provider::{Capabilities, LibraryProvider, OfflineLibrary};
pub use sort::SortOrder;
