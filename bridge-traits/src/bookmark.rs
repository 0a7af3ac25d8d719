//! Persistent Access Bookmarks
//!
//! Sandboxed hosts only let the app touch a user-chosen folder while it holds
//! a grant derived from an opaque bookmark blob. The blob survives restarts;
//! the grant does not.
//!
//! | Platform | Blob | Grant |
//! |----------|------|-------|
//! | macOS/iOS | security-scoped bookmark data | `startAccessingSecurityScopedResource` |
//! | Android | persisted SAF tree URI | implicit once the URI permission is taken |
//! | Desktop | path plus file identity | always granted |

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Outcome of decoding a bookmark blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBookmark {
    /// Location the blob currently points at.
    pub path: PathBuf,
    /// The blob still resolves but should be re-created before the next use.
    pub is_stale: bool,
}

/// Bookmark provider trait
///
/// `create_bookmark` must fail with
/// [`BridgeError::PermissionDenied`](crate::BridgeError::PermissionDenied) when
/// the host refuses access, so the core can tell denial apart from I/O errors.
///
/// `start_access`/`stop_access` are synchronous so a grant can be released
/// from `Drop`.
///
/// # Example
///
/// ```ignore
/// let blob = provider.create_bookmark(&folder).await?;
/// let resolved = provider.resolve_bookmark(&blob).await?;
/// if provider.start_access(&resolved.path) {
///     // read files under resolved.path
///     provider.stop_access(&resolved.path);
/// }
/// ```
#[async_trait]
pub trait BookmarkProvider: Send + Sync {
    /// Derive a persistable blob for a location the user has granted.
    async fn create_bookmark(&self, location: &Path) -> Result<Vec<u8>>;

    /// Decode a blob previously returned by `create_bookmark`.
    async fn resolve_bookmark(&self, blob: &[u8]) -> Result<ResolvedBookmark>;

    /// Begin a scoped access window. Returns `false` if the host refused.
    fn start_access(&self, path: &Path) -> bool;

    /// End a scoped access window opened by `start_access`.
    fn stop_access(&self, path: &Path);
}
