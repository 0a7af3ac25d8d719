//! Handles and the scoped grants derived from them

use bridge_traits::BookmarkProvider;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Persisted, renewable reference to a location
#[derive(Clone, PartialEq, Eq)]
pub struct Handle {
    /// Key under which the handle is stored (hash of the normalized location)
    pub key: String,
    pub location: PathBuf,
    pub blob: Vec<u8>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("key", &self.key)
            .field("location", &self.location)
            .field("blob_len", &self.blob.len())
            .finish()
    }
}

/// Temporary access right to a location
///
/// Call [`Grant::release`] on every exit path. A grant that is dropped
/// without release (early return, panic, cancelled future) is released by
/// `Drop`.
#[must_use = "a grant must be released"]
pub struct Grant {
    path: PathBuf,
    provider: Arc<dyn BookmarkProvider>,
    live: Arc<AtomicUsize>,
    released: bool,
}

impl Grant {
    pub(crate) fn open(
        path: PathBuf,
        provider: Arc<dyn BookmarkProvider>,
        live: Arc<AtomicUsize>,
    ) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        trace!(path = %path.display(), "Grant opened");
        Self {
            path,
            provider,
            live,
            released: false,
        }
    }

    /// Location the grant gives access to
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.provider.stop_access(&self.path);
        self.live.fetch_sub(1, Ordering::SeqCst);
        trace!(path = %self.path.display(), "Grant released");
    }
}

impl Drop for Grant {
    fn drop(&mut self) {
        if !self.released {
            debug!(path = %self.path.display(), "Grant released on drop");
            self.close();
        }
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grant")
            .field("path", &self.path)
            .field("released", &self.released)
            .finish()
    }
}
