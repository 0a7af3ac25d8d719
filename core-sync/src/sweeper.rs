//! Durability sweeper
//!
//! Finishes local copies an earlier process did not: songs left in
//! `copyPending` (interrupted between the metadata write and the copy) or
//! `failed` are copied again from their stored handle, up to
//! `max_copy_attempts` attempts per song. Each song is put back into
//! `copyPending` before its copy starts.

use crate::copier::LocalCopier;
use crate::error::{Result, SyncError};
use crate::materializer::Materializer;
use bridge_traits::Clock;
use core_access::ReferenceResolver;
use core_library::models::{LocalCopyState, Song};
use core_library::repositories::SongRepository;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub retried: u64,
    pub repaired: u64,
    pub failed: u64,
}

pub struct DurabilitySweeper {
    songs: Arc<dyn SongRepository>,
    resolver: Arc<ReferenceResolver>,
    materializer: Materializer,
    copier: LocalCopier,
    max_copy_attempts: u32,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl DurabilitySweeper {
    pub fn new(
        config: &CoreConfig,
        songs: Arc<dyn SongRepository>,
        resolver: Arc<ReferenceResolver>,
        events: EventBus,
    ) -> Self {
        Self {
            songs,
            resolver,
            materializer: Materializer::new(config.file_system.clone(), &config.sync),
            copier: LocalCopier::new(config.file_system.clone(), config.media_dir.clone()),
            max_copy_attempts: config.import.max_copy_attempts,
            clock: config.clock.clone(),
            events,
        }
    }

    /// Retry every unfinished copy once
    ///
    /// Per-song failures are recorded on the song and the pass continues;
    /// only catalog write failures abort it.
    #[instrument(skip_all)]
    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<SweepReport> {
        let pending = self
            .songs
            .list_by_copy_state(&[LocalCopyState::CopyPending, LocalCopyState::Failed])
            .await?;

        let mut report = SweepReport::default();
        for song in pending
            .into_iter()
            .filter(|song| song.copy_attempts < i64::from(self.max_copy_attempts))
        {
            if cancel.is_cancelled() {
                debug!("Sweep cancelled");
                break;
            }

            report.retried += 1;
            self.songs
                .mark_copy_pending(song.id, self.clock.unix_timestamp())
                .await?;
            match self.repair(&song, cancel).await {
                Ok(copied) => {
                    self.songs
                        .mark_copied(song.id, &copied.to_string_lossy(), self.clock.unix_timestamp())
                        .await?;
                    self.copier
                        .discard_previous(song.local_copy_path.as_deref(), &copied)
                        .await;
                    report.repaired += 1;
                }
                Err(SyncError::Library(e)) => return Err(e.into()),
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    warn!(song_id = song.id, error = %e, "Copy repair failed");
                    self.songs
                        .mark_copy_failed(song.id, self.clock.unix_timestamp())
                        .await?;
                    report.failed += 1;
                }
            }
        }

        if report.retried > 0 {
            info!(
                retried = report.retried,
                repaired = report.repaired,
                failed = report.failed,
                "Sweep finished"
            );
        }
        self.events
            .emit(CoreEvent::Library(LibraryEvent::CopiesRepaired {
                retried: report.retried,
                repaired: report.repaired,
                failed: report.failed,
            }))
            .ok();
        Ok(report)
    }

    async fn repair(&self, song: &Song, cancel: &CancellationToken) -> Result<PathBuf> {
        let handle = self.resolver.require_key(&song.handle_key).await?;
        let grant = self.resolver.resolve(&handle).await?;

        let copied = match self.materializer.ensure_available(grant.path(), cancel).await {
            Ok(_) => self.copier.copy(song.id, grant.path()).await,
            Err(e) => Err(e),
        };
        grant.release();
        copied
    }
}
