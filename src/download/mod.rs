//! Download orchestration and the machinery around it

pub mod files;
pub mod manager;
pub mod notifier;
pub mod parallel;

pub use files::OfflineFiles;
pub use manager::{DownloadManager, DownloadRequest, DownloadServices, LyricsSource};
pub use notifier::ParentNotifier;
pub use parallel::{ParallelError, parallel_map};
