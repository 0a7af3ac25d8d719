//! Storage and File System Abstractions
//!
//! Provides the platform-agnostic file system contract used by traversal,
//! materialization and the local copy step of the import pipeline.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
///
/// `metadata` must not follow symbolic links: a link reports `is_symlink`
/// and describes the link itself, never its target.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
    pub is_symlink: bool,
    /// `false` for cloud-backed placeholders whose bytes are not on this device.
    pub is_materialized: bool,
}

impl FileMetadata {
    /// Metadata for a regular, fully local file.
    pub fn file(size: u64, modified_at: Option<i64>) -> Self {
        Self {
            size,
            created_at: None,
            modified_at,
            is_directory: false,
            is_symlink: false,
            is_materialized: true,
        }
    }

    /// Metadata for a fully local directory.
    pub fn directory() -> Self {
        Self {
            size: 0,
            created_at: None,
            modified_at: None,
            is_directory: true,
            is_symlink: false,
            is_materialized: true,
        }
    }
}

/// File system access trait
///
/// Abstracts file I/O so the same traversal code runs against:
/// - Desktop: direct filesystem access
/// - iOS/macOS: security-scoped, possibly cloud-evicted document folders
/// - Android: SAF document trees
///
/// Cloud-backed hosts report evicted files through
/// [`FileMetadata::is_materialized`] and download them on
/// [`request_materialization`](FileSystemAccess::request_materialization).
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn is_local(fs: &dyn FileSystemAccess, path: &Path) -> Result<bool> {
///     Ok(fs.metadata(path).await?.is_materialized)
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Get the application's data directory
    ///
    /// This directory is suitable for persistent application data.
    async fn get_data_directory(&self) -> Result<PathBuf>;

    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory without following symlinks
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Ask the host to bring a cloud placeholder onto the device.
    ///
    /// Returns once the request is issued; callers poll `metadata` until
    /// `is_materialized` flips. Hosts without cloud storage keep the default.
    async fn request_materialization(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    ///
    /// For large files, consider using `open_read_stream` instead.
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, creating it if it doesn't exist
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Move a file, replacing the destination if present
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// List the immediate children of a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Open a file for streaming reads
    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>>;

    /// Open a file for streaming writes, truncating existing content
    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_metadata() {
        let metadata = FileMetadata::file(1024, Some(1234567900));

        assert_eq!(metadata.size, 1024);
        assert!(!metadata.is_directory);
        assert!(!metadata.is_symlink);
        assert!(metadata.is_materialized);
    }

    #[test]
    fn test_directory_metadata() {
        let metadata = FileMetadata::directory();
        assert!(metadata.is_directory);
        assert_eq!(metadata.size, 0);
    }
}
