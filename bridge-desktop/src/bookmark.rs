//! Path-based bookmarks for desktop hosts
//!
//! Desktop processes already have ambient file access, so a bookmark is the
//! absolute path plus the file identity observed when it was created. A
//! bookmark whose path now names a different file resolves as stale.

use async_trait::async_trait;
use bridge_traits::{
    bookmark::{BookmarkProvider, ResolvedBookmark},
    error::{BridgeError, Result},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PathBookmark {
    path: PathBuf,
    identity: Option<FileIdentity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct FileIdentity {
    device: u64,
    inode: u64,
}

#[cfg(unix)]
fn identity_of(metadata: &std::fs::Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some(FileIdentity {
        device: metadata.dev(),
        inode: metadata.ino(),
    })
}

#[cfg(not(unix))]
fn identity_of(_metadata: &std::fs::Metadata) -> Option<FileIdentity> {
    None
}

/// Desktop [`BookmarkProvider`] backed by plain paths.
///
/// Tracks open access windows per path so leaks show up in tests and logs.
#[derive(Default)]
pub struct PathBookmarkProvider {
    active: Mutex<HashMap<PathBuf, usize>>,
}

impl PathBookmarkProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of access windows currently open across all paths.
    pub fn active_grants(&self) -> usize {
        self.active
            .lock()
            .map(|active| active.values().sum())
            .unwrap_or(0)
    }

    fn map_access_error(path: &Path, e: std::io::Error) -> BridgeError {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => BridgeError::PermissionDenied {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
            _ => BridgeError::Io(e),
        }
    }
}

#[async_trait]
impl BookmarkProvider for PathBookmarkProvider {
    async fn create_bookmark(&self, location: &Path) -> Result<Vec<u8>> {
        let metadata = tokio::fs::metadata(location)
            .await
            .map_err(|e| Self::map_access_error(location, e))?;

        let bookmark = PathBookmark {
            path: location.to_path_buf(),
            identity: identity_of(&metadata),
        };

        serde_json::to_vec(&bookmark).map_err(|e| BridgeError::InvalidBookmark(e.to_string()))
    }

    async fn resolve_bookmark(&self, blob: &[u8]) -> Result<ResolvedBookmark> {
        let bookmark: PathBookmark = serde_json::from_slice(blob)
            .map_err(|e| BridgeError::InvalidBookmark(e.to_string()))?;

        let metadata = tokio::fs::metadata(&bookmark.path)
            .await
            .map_err(|e| Self::map_access_error(&bookmark.path, e))?;

        let is_stale = match (bookmark.identity, identity_of(&metadata)) {
            (Some(recorded), Some(current)) => recorded != current,
            _ => false,
        };

        if is_stale {
            debug!(path = ?bookmark.path, "Bookmark identity changed");
        }

        Ok(ResolvedBookmark {
            path: bookmark.path,
            is_stale,
        })
    }

    fn start_access(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        match self.active.lock() {
            Ok(mut active) => {
                *active.entry(path.to_path_buf()).or_insert(0) += 1;
                true
            }
            Err(_) => false,
        }
    }

    fn stop_access(&self, path: &Path) {
        let Ok(mut active) = self.active.lock() else {
            return;
        };
        match active.get_mut(path) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                active.remove(path);
            }
            None => warn!(path = ?path, "stop_access without matching start_access"),
        }
    }
}
