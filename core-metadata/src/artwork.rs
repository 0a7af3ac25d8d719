//! Cover-Art Store
//!
//! Embedded cover pictures are written once to `<artwork_dir>/<sha256>.<ext>`
//! and referenced from songs by their content hash. Identical covers shared
//! by every track of an album are stored a single time.
//!
//! ## Usage
//!
//! ```ignore
//! let store = CoverArtStore::new(config.artwork_dir.clone(), fs.clone());
//! if let Some(cover) = tags.cover.as_ref() {
//!     draft.cover_art_ref = store.store(cover).await?;
//! }
//! ```

use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use core_library::models::sha256_hex;
use image::ImageFormat;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

const RECENT_CAPACITY: usize = 256;

/// Content-addressed store for cover pictures
pub struct CoverArtStore {
    dir: PathBuf,
    fs: Arc<dyn FileSystemAccess>,
    /// Hashes known to be on disk
    recent: Mutex<LruCache<String, PathBuf>>,
}

impl CoverArtStore {
    pub fn new(dir: PathBuf, fs: Arc<dyn FileSystemAccess>) -> Self {
        let capacity = NonZeroUsize::new(RECENT_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            dir,
            fs,
            recent: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a cover picture, returning its content hash
    ///
    /// Returns `None` for empty data or bytes that are not a recognizable
    /// image; a bad cover never fails an import.
    pub async fn store(&self, data: &Bytes) -> Result<Option<String>> {
        if data.is_empty() {
            return Ok(None);
        }

        let format = match image::guess_format(data) {
            Ok(format) => format,
            Err(e) => {
                warn!(error = %e, "Ignoring unrecognized cover picture");
                return Ok(None);
            }
        };

        let hash = sha256_hex(data);
        if self.recent.lock().await.get(&hash).is_some() {
            return Ok(Some(hash));
        }

        let path = self.dir.join(format!("{hash}.{}", extension(format)));
        if !self.fs.exists(&path).await? {
            self.fs.create_dir_all(&self.dir).await?;
            let partial = path.with_extension(format!("{}.partial", Uuid::new_v4().simple()));
            self.fs.write_file(&partial, data.clone()).await?;
            self.fs.rename(&partial, &path).await?;
            debug!(hash = %hash, bytes = data.len(), "Stored cover art");
        }

        self.recent.lock().await.put(hash.clone(), path);
        Ok(Some(hash))
    }

    /// Path of a stored cover, if present
    pub async fn locate(&self, hash: &str) -> Result<Option<PathBuf>> {
        if let Some(path) = self.recent.lock().await.get(hash) {
            return Ok(Some(path.clone()));
        }

        for format in ImageFormat::all() {
            let candidate = self.dir.join(format!("{hash}.{}", extension(format)));
            if self.fs.exists(&candidate).await? {
                self.recent
                    .lock()
                    .await
                    .put(hash.to_string(), candidate.clone());
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

fn extension(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("img")
}
