//! Bounded waiting for cloud placeholders
//!
//! Hosts backed by cloud storage report evicted entries as not
//! materialized. The materializer asks the host to download such an entry
//! and polls its metadata at a fixed interval until the bytes are local or
//! the retry budget is spent.

use crate::error::{Result, SyncError};
use bridge_traits::storage::{FileMetadata, FileSystemAccess};
use core_runtime::config::SyncSettings;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Materializer {
    fs: Arc<dyn FileSystemAccess>,
    poll_interval: Duration,
    max_retries: u32,
}

impl Materializer {
    pub fn new(fs: Arc<dyn FileSystemAccess>, settings: &SyncSettings) -> Self {
        Self {
            fs,
            poll_interval: settings.materialization_poll_interval,
            max_retries: settings.materialization_max_retries,
        }
    }

    /// Metadata of `path` once its content is on this device
    ///
    /// # Errors
    /// [`SyncError::NotMaterialized`] once the retries run out,
    /// [`SyncError::Cancelled`] if `cancel` fires while waiting.
    pub async fn ensure_available(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileMetadata> {
        let metadata = self.stat(path).await?;
        if metadata.is_materialized {
            return Ok(metadata);
        }

        debug!(path = %path.display(), "Requesting materialization");
        self.fs
            .request_materialization(path)
            .await
            .map_err(|e| SyncError::from_bridge(path, e))?;

        for attempt in 1..=self.max_retries {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let metadata = self.stat(path).await?;
            if metadata.is_materialized {
                debug!(path = %path.display(), attempt, "Entry materialized");
                return Ok(metadata);
            }
        }

        warn!(
            path = %path.display(),
            attempts = self.max_retries,
            "Entry did not materialize"
        );
        Err(SyncError::NotMaterialized {
            path: path.to_path_buf(),
            attempts: self.max_retries,
        })
    }

    async fn stat(&self, path: &Path) -> Result<FileMetadata> {
        self.fs
            .metadata(path)
            .await
            .map_err(|e| SyncError::from_bridge(path, e))
    }
}
