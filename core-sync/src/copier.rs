//! Durable local copies of imported songs
//!
//! Bytes are streamed into `<media_dir>/<song_id>.<ext>.<attempt>.partial`
//! and renamed into place once complete, so a copy interrupted at any point
//! never leaves a truncated file under the final name. Every attempt writes
//! its own partial file; concurrent attempts never share one.

use crate::error::{Result, SyncError};
use bridge_traits::storage::FileSystemAccess;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct LocalCopier {
    fs: Arc<dyn FileSystemAccess>,
    media_dir: PathBuf,
}

impl LocalCopier {
    pub fn new(fs: Arc<dyn FileSystemAccess>, media_dir: PathBuf) -> Self {
        Self { fs, media_dir }
    }

    /// Final location of a song's local copy
    pub fn destination(&self, song_id: i64, source: &Path) -> PathBuf {
        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "bin".to_string());
        self.media_dir.join(format!("{song_id}.{extension}"))
    }

    /// Copy `source` into the media directory, returning the final path
    pub async fn copy(&self, song_id: i64, source: &Path) -> Result<PathBuf> {
        let destination = self.destination(song_id, source);
        let mut partial = destination.clone().into_os_string();
        partial.push(format!(".{}.partial", Uuid::new_v4().simple()));
        let partial = PathBuf::from(partial);

        self.fs
            .create_dir_all(&self.media_dir)
            .await
            .map_err(|e| SyncError::from_bridge(&self.media_dir, e))?;

        if let Err(e) = self.stream(source, &partial).await {
            if let Err(cleanup) = self.fs.delete_file(&partial).await {
                if !cleanup.is_not_found() {
                    warn!(path = %partial.display(), error = %cleanup, "Failed to remove partial copy");
                }
            }
            return Err(e);
        }

        self.fs
            .rename(&partial, &destination)
            .await
            .map_err(|e| SyncError::from_bridge(&destination, e))?;

        debug!(song_id, destination = %destination.display(), "Local copy complete");
        Ok(destination)
    }

    /// Remove a song's earlier copy once `current` has replaced it
    ///
    /// Nothing happens when the two paths are the same. Failures are logged,
    /// the stale file is left behind.
    pub async fn discard_previous(&self, previous: Option<&str>, current: &Path) {
        let Some(previous) = previous.map(Path::new) else {
            return;
        };
        if previous == current {
            return;
        }
        match self.fs.delete_file(previous).await {
            Ok(()) => debug!(path = %previous.display(), "Stale local copy removed"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(path = %previous.display(), error = %e, "Stale local copy not removed"),
        }
    }

    async fn stream(&self, source: &Path, partial: &Path) -> Result<u64> {
        let mut reader = self
            .fs
            .open_read_stream(source)
            .await
            .map_err(|e| SyncError::from_bridge(source, e))?;
        let mut writer = self
            .fs
            .open_write_stream(partial)
            .await
            .map_err(|e| SyncError::from_bridge(partial, e))?;

        let io_error = |path: &Path, e: std::io::Error| SyncError::from_bridge(path, e.into());

        let copied = tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|e| io_error(source, e))?;
        writer.shutdown().await.map_err(|e| io_error(partial, e))?;
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::TokioFileSystem;

    #[tokio::test]
    async fn test_copy_lands_under_song_id() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Track.MP3");
        std::fs::write(&source, b"audio bytes").unwrap();

        let copier = LocalCopier::new(Arc::new(TokioFileSystem::new()), dir.path().join("media"));
        let copied = copier.copy(42, &source).await.unwrap();

        assert_eq!(copied, dir.path().join("media").join("42.mp3"));
        assert_eq!(std::fs::read(&copied).unwrap(), b"audio bytes");
        assert_eq!(std::fs::read_dir(dir.path().join("media")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_copies_do_not_share_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.mp3");
        let second = dir.path().join("b.mp3");
        std::fs::write(&first, vec![b'A'; 1 << 20]).unwrap();
        std::fs::write(&second, vec![b'B'; 1 << 20]).unwrap();
        let copier = LocalCopier::new(Arc::new(TokioFileSystem::new()), dir.path().join("media"));

        let (a, b) = tokio::join!(copier.copy(5, &first), copier.copy(5, &second));
        let copied = a.unwrap();
        assert_eq!(copied, b.unwrap());

        let bytes = std::fs::read(&copied).unwrap();
        assert!(bytes == vec![b'A'; 1 << 20] || bytes == vec![b'B'; 1 << 20]);
        assert_eq!(std::fs::read_dir(dir.path().join("media")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_discard_previous_copy() {
        let dir = tempfile::tempdir().unwrap();
        let copier = LocalCopier::new(Arc::new(TokioFileSystem::new()), dir.path().join("media"));
        let source = dir.path().join("a.flac");
        std::fs::write(&source, b"flac").unwrap();
        let current = copier.copy(3, &source).await.unwrap();
        let previous = dir.path().join("media").join("3.mp3");
        std::fs::write(&previous, b"mp3").unwrap();

        copier
            .discard_previous(Some(current.to_str().unwrap()), &current)
            .await;
        assert!(current.exists());

        copier
            .discard_previous(Some(previous.to_str().unwrap()), &current)
            .await;
        assert!(!previous.exists());
        assert!(current.exists());

        copier
            .discard_previous(Some(previous.to_str().unwrap()), &current)
            .await;
        copier.discard_previous(None, &current).await;
    }

    #[tokio::test]
    async fn test_missing_source_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let copier = LocalCopier::new(Arc::new(TokioFileSystem::new()), dir.path().join("media"));

        let err = copier.copy(7, &dir.path().join("gone.flac")).await.unwrap_err();
        assert!(err.is_entry_local());
        assert_eq!(std::fs::read_dir(dir.path().join("media")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_recopy_replaces_previous_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.flac");
        let copier = LocalCopier::new(Arc::new(TokioFileSystem::new()), dir.path().join("media"));

        std::fs::write(&source, b"old").unwrap();
        copier.copy(1, &source).await.unwrap();
        std::fs::write(&source, b"new").unwrap();
        let copied = copier.copy(1, &source).await.unwrap();

        assert_eq!(std::fs::read(copied).unwrap(), b"new");
    }
}
