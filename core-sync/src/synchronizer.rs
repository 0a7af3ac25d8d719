//! # Tree Synchronizer
//!
//! Mirrors the directory tree under a source root into the path catalog.
//!
//! ## Workflow
//!
//! 1. Resolve a grant for the source root; failure leaves the catalog
//!    untouched and records the error on the source
//! 2. Claim the next generation number for the source
//! 3. Walk the tree breadth-first, skipping symlinks and waiting (bounded)
//!    for cloud placeholders, writing entries in batches of
//!    `sync_batch_size` rows, one transaction per batch
//! 4. Delete every row of the source older than the run's generation
//! 5. Merge the path index segments and record the outcome on the source
//!
//! Entries that exist but could not be read this run (unreadable, never
//! materialized) are retained: their existing rows are re-tagged with the
//! new generation rather than tombstoned.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let report = synchronizer.run(&source.id).await?;
//! println!("{} entries, {} audio files", report.total_entries, report.audio_files);
//! ```

use crate::error::{Result, SyncError};
use crate::materializer::Materializer;
use crate::run::{SyncReport, SyncRunState};
use bridge_traits::storage::{FileMetadata, FileSystemAccess};
use bridge_traits::Clock;
use core_access::ReferenceResolver;
use core_library::models::{
    content_fingerprint, location_key, relative_location, PathEntry, Source,
};
use core_library::repositories::{CatalogBatch, PathCatalog, RetainedPath, SourceRepository};
use core_library::search::{SearchIndex, SearchScope};
use core_runtime::config::{CoreConfig, SyncSettings};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

type ActiveRuns = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Removes a run from the active set however the run ends
struct ActiveRun {
    source_id: String,
    active: ActiveRuns,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.source_id);
    }
}

pub struct Synchronizer {
    sources: Arc<dyn SourceRepository>,
    catalog: Arc<dyn PathCatalog>,
    search: Arc<SearchIndex>,
    resolver: Arc<ReferenceResolver>,
    fs: Arc<dyn FileSystemAccess>,
    materializer: Materializer,
    settings: SyncSettings,
    clock: Arc<dyn Clock>,
    events: EventBus,
    active: ActiveRuns,
}

impl Synchronizer {
    pub fn new(
        config: &CoreConfig,
        sources: Arc<dyn SourceRepository>,
        catalog: Arc<dyn PathCatalog>,
        search: Arc<SearchIndex>,
        resolver: Arc<ReferenceResolver>,
        events: EventBus,
    ) -> Self {
        Self {
            sources,
            catalog,
            search,
            resolver,
            fs: config.file_system.clone(),
            materializer: Materializer::new(config.file_system.clone(), &config.sync),
            settings: config.sync.clone(),
            clock: config.clock.clone(),
            events,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Synchronize one source
    ///
    /// # Errors
    /// - [`SyncError::SyncInProgress`] if the source is already syncing
    /// - [`SyncError::Cancelled`] if [`cancel`](Self::cancel) was called;
    ///   nothing is tombstoned and no error is recorded on the source
    /// - [`SyncError::Access`] or a root-level [`SyncError::Io`]; the error is
    ///   recorded on the source
    #[instrument(skip(self), fields(source_id = %source_id))]
    pub async fn run(&self, source_id: &str) -> Result<SyncReport> {
        let (_guard, cancel) = self.register(source_id)?;

        let source = self
            .sources
            .find_by_id(source_id)
            .await?
            .ok_or_else(|| SyncError::SourceNotFound(source_id.to_string()))?;

        let started = Instant::now();
        let state = SyncRunState::Idle;

        let grant = match self.resolver.resolve_location(source.root()).await {
            Ok(grant) => grant,
            Err(e) => {
                let err = SyncError::from(e);
                state.transition(SyncRunState::Failed)?;
                self.fail(&source, &err).await;
                return Err(err);
            }
        };

        let generation = match self.sources.begin_generation(&source.id).await {
            Ok(generation) => generation,
            Err(e) => {
                grant.release();
                let err = SyncError::from(e);
                self.fail(&source, &err).await;
                return Err(err);
            }
        };

        let state = state.transition(SyncRunState::Traversing)?;
        self.events
            .emit(CoreEvent::Sync(SyncEvent::Started {
                source_id: source.id.clone(),
                generation,
            }))
            .ok();
        info!(generation, root = %grant.path().display(), "Sync started");

        let mut report = SyncReport::new(&source.id, generation);
        let traversal = self
            .traverse(&source, grant.path(), generation, &mut report, &cancel)
            .await;
        grant.release();

        let outcome = match traversal {
            Ok(()) => self.reconcile(&source, state, &mut report, &cancel).await,
            Err(e) => Err((state, e)),
        };

        match outcome {
            Ok(()) => {
                self.sources
                    .record_sync_success(
                        &source.id,
                        self.clock.unix_timestamp(),
                        report.total_entries as i64,
                    )
                    .await?;

                let duration_ms = started.elapsed().as_millis() as u64;
                self.events
                    .emit(CoreEvent::Sync(SyncEvent::Completed {
                        source_id: source.id.clone(),
                        total_entries: report.total_entries,
                        audio_files: report.audio_files,
                        removed: report.removed,
                        duration_ms,
                    }))
                    .ok();
                info!(
                    total = report.total_entries,
                    audio = report.audio_files,
                    skipped = report.skipped,
                    removed = report.removed,
                    duration_ms,
                    "Sync completed"
                );
                Ok(report)
            }
            Err((state, e)) if e.is_cancelled() => {
                state.transition(SyncRunState::Cancelled)?;
                self.events
                    .emit(CoreEvent::Sync(SyncEvent::Cancelled {
                        source_id: source.id.clone(),
                        entries_seen: report.total_entries,
                    }))
                    .ok();
                info!(entries_seen = report.total_entries, "Sync cancelled");
                Err(e)
            }
            Err((state, e)) => {
                state.transition(SyncRunState::Failed)?;
                self.fail(&source, &e).await;
                Err(e)
            }
        }
    }

    /// Cancel every running sync
    pub fn cancel(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        for token in active.values() {
            token.cancel();
        }
    }

    /// Cancel the running sync of one source; `false` if none is running
    pub fn cancel_source(&self, source_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.get(source_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, source_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(source_id)
    }

    fn register(&self, source_id: &str) -> Result<(ActiveRun, CancellationToken)> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.contains_key(source_id) {
            return Err(SyncError::SyncInProgress {
                source_id: source_id.to_string(),
            });
        }

        let token = CancellationToken::new();
        active.insert(source_id.to_string(), token.clone());
        Ok((
            ActiveRun {
                source_id: source_id.to_string(),
                active: self.active.clone(),
            },
            token,
        ))
    }

    async fn fail(&self, source: &Source, err: &SyncError) {
        error!(error = %err, "Sync failed");
        let message = err.to_string();
        if let Err(e) = self
            .sources
            .record_sync_error(&source.id, self.clock.unix_timestamp(), &message)
            .await
        {
            warn!(error = %e, "Failed to record sync error");
        }
        self.events
            .emit(CoreEvent::Sync(SyncEvent::Failed {
                source_id: source.id.clone(),
                message,
            }))
            .ok();
    }

    async fn reconcile(
        &self,
        source: &Source,
        state: SyncRunState,
        report: &mut SyncReport,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), (SyncRunState, SyncError)> {
        if cancel.is_cancelled() {
            return Err((state, SyncError::Cancelled));
        }

        let state = state.transition(SyncRunState::Reconciling).map_err(|e| (state, e))?;
        self.emit_progress(source, report.total_entries, state);
        report.removed = self
            .catalog
            .remove_stale(&source.id, report.generation)
            .await
            .map_err(|e| (state, e.into()))?;

        let state = state.transition(SyncRunState::Indexing).map_err(|e| (state, e))?;
        if let Err(e) = self.search.merge(SearchScope::Paths).await {
            warn!(error = %e, "Path index merge failed");
        }
        state.transition(SyncRunState::Completed).map_err(|e| (state, e))?;
        Ok(())
    }

    /// Breadth-first walk from `root`
    async fn traverse(
        &self,
        source: &Source,
        root: &Path,
        generation: i64,
        report: &mut SyncReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let root_meta = self.materializer.ensure_available(root, cancel).await?;
        if !root_meta.is_directory || root_meta.is_symlink {
            return Err(SyncError::from_bridge(
                root,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "source root is not a directory")
                    .into(),
            ));
        }

        let mut visited = HashSet::from([location_key(root)]);
        let mut queue = VecDeque::from([root.to_path_buf()]);
        let mut batch = CatalogBatch::new(&source.id, generation);

        while let Some(dir) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let mut children = match self.fs.list_directory(&dir).await {
                Ok(children) => children,
                Err(e) if dir == root => return Err(SyncError::from_bridge(&dir, e)),
                Err(e) => {
                    let err = SyncError::from_bridge(&dir, e);
                    warn!(path = %dir.display(), error = %err, "Directory listing failed, keeping previous rows");
                    report.record_skip(|| err.to_string());
                    if let Some(retained) = Self::retained(root, &dir, true) {
                        batch.retained.push(retained);
                    }
                    continue;
                }
            };
            children.sort();

            for child in children {
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }

                let Some(metadata) = self.inspect(root, &child, report, &mut batch, cancel).await?
                else {
                    continue;
                };

                if !visited.insert(location_key(&child)) {
                    debug!(path = %child.display(), "Already visited");
                    continue;
                }

                let hash = (!metadata.is_directory)
                    .then(|| content_fingerprint(metadata.size, metadata.modified_at));
                let Some(entry) = PathEntry::observed(
                    &source.id,
                    root,
                    &child,
                    metadata.is_directory,
                    hash,
                    generation,
                ) else {
                    report.record_skip(|| format!("{} is outside the source root", child.display()));
                    continue;
                };

                report.total_entries += 1;
                if metadata.is_directory {
                    report.directories += 1;
                    queue.push_back(child);
                } else if self.settings.is_audio_file(Path::new(&entry.name)) {
                    report.audio_files += 1;
                }
                batch.entries.push(entry);

                if batch.len() >= self.settings.batch_size {
                    self.flush(source, &mut batch, report).await?;
                }
            }
        }

        self.flush(source, &mut batch, report).await
    }

    /// Metadata of a child worth cataloging, or `None` if it is skipped
    async fn inspect(
        &self,
        root: &Path,
        child: &Path,
        report: &mut SyncReport,
        batch: &mut CatalogBatch,
        cancel: &CancellationToken,
    ) -> Result<Option<FileMetadata>> {
        let metadata = match self.fs.metadata(child).await {
            Ok(metadata) => metadata,
            Err(e) => {
                let err = SyncError::from_bridge(child, e);
                debug!(path = %child.display(), error = %err, "Unreadable entry skipped");
                report.record_skip(|| err.to_string());
                batch.retained.extend(Self::retained(root, child, true));
                return Ok(None);
            }
        };

        if metadata.is_symlink {
            debug!(path = %child.display(), "Symlink skipped");
            report.skipped += 1;
            return Ok(None);
        }

        if metadata.is_materialized {
            return Ok(Some(metadata));
        }

        match self.materializer.ensure_available(child, cancel).await {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                report.record_skip(|| e.to_string());
                batch
                    .retained
                    .extend(Self::retained(root, child, metadata.is_directory));
                Ok(None)
            }
        }
    }

    fn retained(root: &Path, location: &Path, subtree: bool) -> Option<RetainedPath> {
        Some(RetainedPath {
            path_id: location_key(location),
            relative_path: relative_location(root, location)?,
            subtree,
        })
    }

    async fn flush(
        &self,
        source: &Source,
        batch: &mut CatalogBatch,
        report: &SyncReport,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let full = std::mem::replace(batch, CatalogBatch::new(&source.id, report.generation));
        self.catalog.apply_batch(&full).await?;
        self.emit_progress(source, report.total_entries, SyncRunState::Traversing);
        Ok(())
    }

    fn emit_progress(&self, source: &Source, entries_seen: u64, state: SyncRunState) {
        self.events
            .emit(CoreEvent::Sync(SyncEvent::Progress {
                source_id: source.id.clone(),
                entries_seen,
                phase: state.to_string(),
            }))
            .ok();
    }
}
