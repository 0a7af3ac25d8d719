//! # Import Pipeline
//!
//! Promotes cataloged audio files into songs.
//!
//! For each selected file, with at most `import_parallelism` in flight:
//! 1. Resolve a grant from the file's own stored handle (acquired on first use)
//! 2. Wait for the content if it is a cloud placeholder, then read the tags
//! 3. Store the cover picture and compute the dedupe key
//! 4. Upsert the song as `copyPending` together with its index row
//! 5. Copy the bytes into the media directory, then mark `copied`
//!    (or `failed`) and remove a previous copy stored under another name
//!
//! Steps 4 and 5 hold a lock on the dedupe key, so files that resolve to the
//! same song are written one after the other even when they run in parallel.
//!
//! Cancellation is checked before each entry is started; entries already
//! in flight finish normally and completed songs are kept.
//!
//! ## Error policy
//!
//! | Error | Effect |
//! |-------|--------|
//! | I/O, not materialized, metadata | entry skipped, import continues |
//! | access denied or revoked | import aborts, error recorded on the source |
//! | catalog write failure | import aborts |

use crate::copier::LocalCopier;
use crate::error::{Result, SyncError};
use crate::materializer::Materializer;
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::Clock;
use core_access::ReferenceResolver;
use core_library::models::{location_key, LocalCopyState, PathEntry, Song, SongDraft, Source};
use core_library::repositories::{SongRepository, SourceRepository};
use core_metadata::{dedupe_key, CoverArtStore, MetadataExtractor, TrackTags};
use core_runtime::config::{CoreConfig, ImportSettings, SyncSettings};
use core_runtime::events::{CoreEvent, EventBus, ImportEvent, LibraryEvent};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Progress after each finished entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub completed: u64,
    pub total: u64,
    pub percent: u8,
    /// Relative path of the entry that just finished
    pub current: String,
}

impl ImportProgress {
    fn new(completed: u64, total: u64, current: &str) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((completed * 100) / total).min(100) as u8
        };
        Self {
            completed,
            total,
            percent,
            current: current.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported: u64,
    /// Entries that failed and were skipped
    pub failed: u64,
    /// Directories and non-audio files in the selection
    pub skipped: u64,
}

/// Clears the active import however the call ends
struct ActiveImport<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
}

impl Drop for ActiveImport<'_> {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Per dedupe key locks; an entry lives while someone holds or awaits it
#[derive(Default)]
struct KeyLocks {
    held: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let lock = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone();
        KeyGuard {
            locks: self,
            key: key.to_string(),
            _held: lock.lock_owned().await,
        }
    }

    fn len(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    _held: OwnedMutexGuard<()>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this guard are the only owners: nobody is waiting.
        if held
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            held.remove(&self.key);
        }
    }
}

pub struct ImportPipeline {
    sources: Arc<dyn SourceRepository>,
    songs: Arc<dyn SongRepository>,
    resolver: Arc<ReferenceResolver>,
    fs: Arc<dyn FileSystemAccess>,
    materializer: Materializer,
    extractor: MetadataExtractor,
    covers: Arc<CoverArtStore>,
    copier: LocalCopier,
    settings: ImportSettings,
    audio: SyncSettings,
    clock: Arc<dyn Clock>,
    events: EventBus,
    active: Mutex<Option<CancellationToken>>,
    key_locks: KeyLocks,
}

impl ImportPipeline {
    pub fn new(
        config: &CoreConfig,
        sources: Arc<dyn SourceRepository>,
        songs: Arc<dyn SongRepository>,
        resolver: Arc<ReferenceResolver>,
        covers: Arc<CoverArtStore>,
        events: EventBus,
    ) -> Self {
        Self {
            sources,
            songs,
            resolver,
            fs: config.file_system.clone(),
            materializer: Materializer::new(config.file_system.clone(), &config.sync),
            extractor: MetadataExtractor::new(),
            covers,
            copier: LocalCopier::new(config.file_system.clone(), config.media_dir.clone()),
            settings: config.import,
            audio: config.sync.clone(),
            clock: config.clock.clone(),
            events,
            active: Mutex::new(None),
            key_locks: KeyLocks::default(),
        }
    }

    /// Import the audio files of `selection`, all cataloged under `source`
    ///
    /// `on_progress` runs after every finished entry, skipped ones included.
    ///
    /// # Errors
    /// - [`SyncError::Cancelled`] after [`cancel`](Self::cancel); finished
    ///   entries stay imported
    /// - [`SyncError::Access`] or [`SyncError::Library`] on the first
    ///   unrecoverable failure
    /// - [`SyncError::ImportInProgress`] if another import is running
    #[instrument(skip(self, source, selection, on_progress), fields(source_id = %source.id, selected = selection.len()))]
    pub async fn import_paths<F>(
        &self,
        source: &Source,
        selection: Vec<PathEntry>,
        on_progress: F,
    ) -> Result<ImportSummary>
    where
        F: Fn(ImportProgress) + Send + Sync,
    {
        let (_guard, cancel) = self.register()?;

        let mut summary = ImportSummary::default();
        let files: Vec<PathEntry> = selection
            .into_iter()
            .filter(|entry| {
                let eligible = !entry.is_directory
                    && entry.source_id == source.id
                    && self.audio.is_audio_file(Path::new(&entry.name));
                if !eligible {
                    summary.skipped += 1;
                }
                eligible
            })
            .collect();

        let total = files.len() as u64;
        self.emit(ImportEvent::Started { total });
        info!(total, skipped = summary.skipped, "Import started");

        let mut completed = 0u64;
        let mut fatal = None;
        {
            let token = cancel.clone();
            let cancel = &cancel;
            let mut results = stream::iter(files)
                .take_while(move |_| futures::future::ready(!token.is_cancelled()))
                .map(|entry| async move {
                    let outcome = self.import_entry(source, &entry, cancel).await;
                    (entry, outcome)
                })
                .buffer_unordered(self.settings.parallelism.max(1));

            while let Some((entry, outcome)) = results.next().await {
                match outcome {
                    Ok(song) => {
                        summary.imported += 1;
                        debug!(song_id = song.id, path = %entry.relative_path, "Entry imported");
                    }
                    Err(e) if e.is_entry_local() => {
                        summary.failed += 1;
                        warn!(path = %entry.relative_path, error = %e, "Entry skipped");
                        self.emit(ImportEvent::EntryFailed {
                            relative_path: entry.relative_path.clone(),
                            message: e.to_string(),
                        });
                    }
                    Err(e) => {
                        fatal = Some(e);
                        break;
                    }
                }

                completed += 1;
                let progress = ImportProgress::new(completed, total, &entry.relative_path);
                self.emit(ImportEvent::Progress {
                    completed: progress.completed,
                    total: progress.total,
                    percent: progress.percent,
                    current: progress.current.clone(),
                });
                on_progress(progress);
            }
        }

        if let Some(e) = fatal {
            if matches!(&e, SyncError::Access(access) if access.requires_regrant()) {
                if let Err(record) = self
                    .sources
                    .record_sync_error(&source.id, self.clock.unix_timestamp(), &e.to_string())
                    .await
                {
                    warn!(error = %record, "Failed to record import error");
                }
            }
            warn!(error = %e, completed, "Import aborted");
            self.emit(ImportEvent::Failed {
                message: e.to_string(),
            });
            return Err(e);
        }

        if completed < total {
            info!(completed, total, "Import cancelled");
            self.emit(ImportEvent::Cancelled { completed, total });
            return Err(SyncError::Cancelled);
        }

        info!(
            imported = summary.imported,
            failed = summary.failed,
            skipped = summary.skipped,
            "Import completed"
        );
        self.emit(ImportEvent::Completed {
            imported: summary.imported,
            failed: summary.failed,
            skipped: summary.skipped,
        });
        Ok(summary)
    }

    /// Cancel the running import; `false` if none is running
    pub fn cancel(&self) -> bool {
        match self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn register(&self) -> Result<(ActiveImport<'_>, CancellationToken)> {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(SyncError::ImportInProgress);
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Ok((ActiveImport { slot: &self.active }, token))
    }

    async fn import_entry(
        &self,
        source: &Source,
        entry: &PathEntry,
        cancel: &CancellationToken,
    ) -> Result<Song> {
        let location = entry.location(source.root());
        let grant = self.resolver.resolve_location(&location).await?;
        let outcome = self
            .import_granted(&location, grant.path(), entry, cancel)
            .await;
        grant.release();
        outcome
    }

    async fn import_granted(
        &self,
        location: &Path,
        path: &Path,
        entry: &PathEntry,
        cancel: &CancellationToken,
    ) -> Result<Song> {
        self.materializer.ensure_available(path, cancel).await?;
        let data = self
            .fs
            .read_file(path)
            .await
            .map_err(|e| SyncError::from_bridge(path, e))?;
        let tags = self.extractor.extract(data, path).await?;
        let draft = self.draft(location, entry, &tags).await;

        let _key = self.key_locks.lock(&draft.dedupe_key).await;
        let now = self.clock.unix_timestamp();
        let upsert = self
            .songs
            .upsert(&draft, LocalCopyState::CopyPending, now)
            .await?;
        let song = upsert.song;
        let previous_copy = song.local_copy_path.clone();
        self.events
            .emit(CoreEvent::Library(LibraryEvent::SongUpserted {
                song_id: song.id,
                title: song.title.clone(),
                artist: song.artist.clone(),
                created: upsert.created,
            }))
            .ok();

        match self.copier.copy(song.id, path).await {
            Ok(copied) => {
                self.songs
                    .mark_copied(
                        song.id,
                        &copied.to_string_lossy(),
                        self.clock.unix_timestamp(),
                    )
                    .await?;
                self.copier
                    .discard_previous(previous_copy.as_deref(), &copied)
                    .await;
                Ok(song)
            }
            Err(e) => {
                self.songs
                    .mark_copy_failed(song.id, self.clock.unix_timestamp())
                    .await?;
                Err(e)
            }
        }
    }

    async fn draft(&self, location: &Path, entry: &PathEntry, tags: &TrackTags) -> SongDraft {
        let cover_art_ref = match tags.cover.as_ref() {
            Some(cover) => self.covers.store(cover).await.unwrap_or_else(|e| {
                warn!(path = %entry.relative_path, error = %e, "Cover art not stored");
                None
            }),
            None => None,
        };

        SongDraft {
            dedupe_key: dedupe_key(&tags.artist, &tags.title, &tags.album),
            artist: tags.artist.clone(),
            title: tags.title.clone(),
            album: tags.album.clone(),
            album_artist: tags.album_artist.clone(),
            year: tags.year,
            disc_number: tags.disc_number,
            track_number: tags.track_number,
            cover_art_ref,
            handle_key: location_key(location),
            source_location: location.to_string_lossy().into_owned(),
            origin_path_hash: entry.path_id.clone(),
        }
    }

    fn emit(&self, event: ImportEvent) {
        self.events.emit(CoreEvent::Import(event)).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(ImportProgress::new(1, 4, "a").percent, 25);
        assert_eq!(ImportProgress::new(4, 4, "a").percent, 100);
        assert_eq!(ImportProgress::new(0, 0, "a").percent, 100);
    }

    #[tokio::test]
    async fn test_key_locks_serialize_same_key() {
        let locks = KeyLocks::default();
        let first = locks.lock("k").await;
        let other = locks.lock("other").await;
        assert_eq!(locks.len(), 2);

        let waiting = tokio::time::timeout(std::time::Duration::from_millis(20), locks.lock("k"));
        assert!(waiting.await.is_err());

        drop(first);
        let again = locks.lock("k").await;
        drop(again);
        drop(other);
        assert_eq!(locks.len(), 0);
    }
}
