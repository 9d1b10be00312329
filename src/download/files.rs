//! Permanent storage for offline content
//!
//! Layout under the storage root:
//! - `tracks/<encoded id>.<ext>`: finalized track content
//! - `staging/`: in-flight transfer data, emptied on startup
//!
//! The `tracks` directory carries a `CACHEDIR.TAG` so backup tools skip it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{OfflineError, Result};

const TRACKS_DIR: &str = "tracks";
const STAGING_DIR: &str = "staging";
const CACHEDIR_TAG: &str = "Signature: 8a477f597d28d172789f06886806bc55\n\
# This file is a cache directory tag created by tunestash.\n\
# Offline copies can be downloaded again and need no backup.\n";

/// Fallback extension when the response carried no usable MIME type
const DEFAULT_EXTENSION: &str = "mp3";

/// Owns the on-disk namespace of finalized offline content
#[derive(Debug, Clone)]
pub struct OfflineFiles {
    root: PathBuf,
}

impl OfflineFiles {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn tracks_dir(&self) -> PathBuf {
        self.root.join(TRACKS_DIR)
    }

    /// Directory transfers stage their data in
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Create the directory structure and mark it as excluded from backups
    ///
    /// Transfers never survive a restart, so anything left in staging is
    /// removed.
    pub async fn init(&self) -> Result<()> {
        let tracks = self.tracks_dir();
        fs::create_dir_all(&tracks)
            .await
            .map_err(|e| OfflineError::filesystem(&tracks, e))?;

        let staging = self.staging_dir();
        match fs::remove_dir_all(&staging).await {
            Ok(()) => debug!("Cleared staging directory {}", staging.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(OfflineError::filesystem(&staging, e)),
        }
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| OfflineError::filesystem(&staging, e))?;

        let tag = tracks.join("CACHEDIR.TAG");
        if !fs::try_exists(&tag).await.unwrap_or(false) {
            fs::write(&tag, CACHEDIR_TAG)
                .await
                .map_err(|e| OfflineError::filesystem(&tag, e))?;
        }

        debug!("Initialized offline storage at {}", self.root.display());
        Ok(())
    }

    /// Permanent location of a track's content
    pub fn track_path(&self, id: &str, extension: &str) -> PathBuf {
        self.tracks_dir()
            .join(format!("{}.{}", encode_id(id), extension))
    }

    /// Move fetched bytes from `temporary` to the track's permanent path
    ///
    /// The temporary file never outlives this call: it is either moved into
    /// place or removed.
    pub async fn store_track(&self, id: &str, extension: &str, temporary: &Path) -> Result<PathBuf> {
        let destination = self.track_path(id, extension);

        let result = move_file(temporary, &destination).await;
        if let Err(e) = result {
            discard(temporary).await;
            return Err(OfflineError::filesystem(&destination, e));
        }

        debug!("Stored {} at {}", id, destination.display());
        Ok(destination)
    }

    /// Remove a track's content; missing files are not an error
    pub async fn remove_track(&self, id: &str, extension: &str) -> Result<()> {
        let path = self.track_path(id, extension);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OfflineError::filesystem(path, e)),
        }
    }
}

async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::remove_file(to).await {
        Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    // Staging may live on another filesystem
    fs::copy(from, to).await?;
    fs::remove_file(from).await
}

/// Best-effort removal of a temporary file
pub async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// File extension for a response MIME type
pub fn extension_for_mime(mime_type: Option<&str>) -> &'static str {
    let Some(mime) = mime_type else {
        return DEFAULT_EXTENSION;
    };

    match mime.to_ascii_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" => "m4a",
        "audio/ogg" | "audio/vorbis" | "application/ogg" => "ogg",
        "audio/opus" => "opus",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/aiff" | "audio/x-aiff" => "aiff",
        _ => DEFAULT_EXTENSION,
    }
}

/// Encode a content id as a file name
///
/// Distinct ids always map to distinct names, even on case-insensitive
/// filesystems: only `[a-z0-9_-]` is kept, every other byte becomes `%XX`.
fn encode_id(id: &str) -> String {
    if id.is_empty() {
        return "%".to_string();
    }

    let mut encoded = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02x}", byte)),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime(Some("audio/flac")), "flac");
        assert_eq!(extension_for_mime(Some("Audio/X-M4A")), "m4a");
        assert_eq!(extension_for_mime(Some("audio/ogg")), "ogg");
        assert_eq!(extension_for_mime(Some("application/octet-stream")), "mp3");
        assert_eq!(extension_for_mime(None), "mp3");
    }

    #[test]
    fn test_encode_id() {
        assert_eq!(encode_id("a1b2-c3_d4"), "a1b2-c3_d4");
        assert_eq!(encode_id("../etc/passwd"), "%2e%2e%2fetc%2fpasswd");
        assert_eq!(encode_id("Ab"), "%41b");
        assert_eq!(encode_id(""), "%");
    }

    #[test]
    fn test_similar_ids_get_distinct_paths() {
        let files = OfflineFiles::new(PathBuf::from("/music"));
        let ids = ["a/b", "a_b", "a%2fb", "A_b", "a.b", ""];

        let paths: HashSet<_> = ids.iter().map(|id| files.track_path(id, "flac")).collect();
        assert_eq!(paths.len(), ids.len());
        for path in &paths {
            assert_eq!(path.parent(), Some(files.tracks_dir().as_path()));
        }
    }

    #[tokio::test]
    async fn test_colliding_ids_keep_their_own_content() {
        let dir = tempfile::tempdir().unwrap();
        let files = OfflineFiles::new(dir.path().to_path_buf());
        files.init().await.unwrap();

        let temp = files.staging_dir().join("1.part");
        std::fs::write(&temp, b"first").unwrap();
        let first = files.store_track("a/b", "flac", &temp).await.unwrap();
        std::fs::write(&temp, b"second").unwrap();
        files.store_track("a_b", "flac", &temp).await.unwrap();

        files.remove_track("a_b", "flac").await.unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_init_clears_leftover_staging() {
        let dir = tempfile::tempdir().unwrap();
        let files = OfflineFiles::new(dir.path().to_path_buf());
        files.init().await.unwrap();

        let leftover = files.staging_dir().join("00000000000000ff.part");
        std::fs::write(&leftover, b"partial").unwrap();
        let kept = files.track_path("t1", "mp3");
        std::fs::write(&kept, b"audio").unwrap();

        files.init().await.unwrap();

        assert!(!leftover.exists());
        assert!(files.staging_dir().is_dir());
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn test_init_writes_cachedir_tag() {
        let dir = tempfile::tempdir().unwrap();
        let files = OfflineFiles::new(dir.path().to_path_buf());
        files.init().await.unwrap();

        let tag = std::fs::read_to_string(files.tracks_dir().join("CACHEDIR.TAG")).unwrap();
        assert!(tag.starts_with("Signature: 8a477f597d28d172789f06886806bc55"));
        assert!(files.staging_dir().is_dir());
    }

    #[tokio::test]
    async fn test_store_track_moves_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let files = OfflineFiles::new(dir.path().to_path_buf());
        files.init().await.unwrap();

        let temp = files.staging_dir().join("1.part");
        std::fs::write(&temp, b"old").unwrap();
        files.store_track("t1", "flac", &temp).await.unwrap();

        std::fs::write(&temp, b"new").unwrap();
        let path = files.store_track("t1", "flac", &temp).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_store_missing_temporary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let files = OfflineFiles::new(dir.path().to_path_buf());
        files.init().await.unwrap();

        let err = files
            .store_track("t1", "mp3", &dir.path().join("missing.part"))
            .await
            .unwrap_err();
        assert!(matches!(err, OfflineError::FilesystemFailure { .. }));
        assert!(!files.track_path("t1", "mp3").exists());
    }

    #[tokio::test]
    async fn test_remove_missing_track_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let files = OfflineFiles::new(dir.path().to_path_buf());
        files.remove_track("nothing", "mp3").await.unwrap();
    }
}
