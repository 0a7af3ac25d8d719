//! Core service façade and bootstrap.
//!
//! [`LibraryCore`] wires the host-provided bridges from a [`CoreConfig`]
//! into the catalog, the resolver, the synchronizer, the import pipeline and
//! the durability sweeper. Desktop hosts enable the `desktop-shims` feature
//! so the configuration falls back to the tokio file system and path
//! bookmarks when no bridge is injected.
//!
//! ```rust,ignore
//! let core = LibraryCore::bootstrap(
//!     CoreConfig::builder()
//!         .database_path("library.db")
//!         .media_dir("media")
//!         .build()?,
//! )
//! .await?;
//!
//! let source = core.add_source(Path::new("/Users/me/Music"), "me").await?;
//! let report = core.sync(&source.id).await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use bridge_traits::Clock;
use core_access::ReferenceResolver;
use core_library::db::{create_pool, DatabaseConfig};
use core_library::models::{normalize_location, PathEntry, Song, Source};
use core_library::repositories::{
    PathCatalog, SongRepository, SourceRepository, SqliteHandleRepository, SqlitePathCatalog,
    SqliteSongRepository, SqliteSourceRepository,
};
use core_library::search::{SearchIndex, SearchPage, SearchScope};
use core_library::WriteGate;
use core_metadata::CoverArtStore;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use core_sync::{
    DurabilitySweeper, ImportPipeline, ImportProgress, ImportSummary, SweepReport, SyncReport,
    Synchronizer,
};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Primary façade exposed to host applications.
pub struct LibraryCore {
    gate: WriteGate,
    clock: Arc<dyn Clock>,
    events: EventBus,
    sources: Arc<SqliteSourceRepository>,
    catalog: Arc<SqlitePathCatalog>,
    songs: Arc<SqliteSongRepository>,
    search: Arc<SearchIndex>,
    resolver: Arc<ReferenceResolver>,
    synchronizer: Arc<Synchronizer>,
    importer: Arc<ImportPipeline>,
    sweeper: Arc<DurabilitySweeper>,
    shutdown: CancellationToken,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl LibraryCore {
    /// Open the catalog and wire every component
    ///
    /// With `sweep_on_start` the durability sweeper runs once in the
    /// background; see [`wait_for_sweep`](Self::wait_for_sweep).
    #[instrument(skip_all, fields(database = %config.database_path.display()))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        let pool = create_pool(DatabaseConfig::new(&config.database_path))
            .await
            .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
        let gate = WriteGate::new(pool);
        let events = EventBus::new(config.event_buffer_size);

        let sources = Arc::new(SqliteSourceRepository::new(gate.clone()));
        let catalog = Arc::new(SqlitePathCatalog::new(gate.clone()));
        let songs = Arc::new(SqliteSongRepository::new(gate.clone()));
        let search = Arc::new(SearchIndex::new(gate.clone()));
        let resolver = Arc::new(ReferenceResolver::new(
            config.bookmark_provider.clone(),
            Arc::new(SqliteHandleRepository::new(gate.clone())),
            config.clock.clone(),
        ));
        let covers = Arc::new(CoverArtStore::new(
            config.artwork_dir.clone(),
            config.file_system.clone(),
        ));

        let synchronizer = Arc::new(Synchronizer::new(
            &config,
            sources.clone(),
            catalog.clone(),
            search.clone(),
            resolver.clone(),
            events.clone(),
        ));
        let importer = Arc::new(ImportPipeline::new(
            &config,
            sources.clone(),
            songs.clone(),
            resolver.clone(),
            covers,
            events.clone(),
        ));
        let sweeper = Arc::new(DurabilitySweeper::new(
            &config,
            songs.clone(),
            resolver.clone(),
            events.clone(),
        ));

        let core = Self {
            gate,
            clock: config.clock.clone(),
            events,
            sources,
            catalog,
            songs,
            search,
            resolver,
            synchronizer,
            importer,
            sweeper,
            shutdown: CancellationToken::new(),
            sweep_task: Mutex::new(None),
        };

        if config.sweep_on_start {
            core.spawn_sweep();
        }

        info!("Library core ready");
        Ok(core)
    }

    fn spawn_sweep(&self) {
        let sweeper = self.sweeper.clone();
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(async move {
            if let Err(e) = sweeper.sweep(&cancel).await {
                error!(error = %e, "Startup sweep failed");
            }
        });
        *self
            .sweep_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Wait for the startup sweep, if one was started
    pub async fn wait_for_sweep(&self) {
        let task = self
            .sweep_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Startup sweep task ended abnormally");
            }
        }
    }

    /// Run one sweep pass now
    pub async fn sweep(&self) -> Result<SweepReport> {
        Ok(self.sweeper.sweep(&self.shutdown.child_token()).await?)
    }

    /// Subscribe to sync, import and library events
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Register a source root, acquiring and storing its access handle
    ///
    /// Adding the same root twice for an owner returns the existing source.
    #[instrument(skip(self), fields(root = %root_path.display()))]
    pub async fn add_source(&self, root_path: &Path, owner_id: &str) -> Result<Source> {
        let root = normalize_location(root_path);
        if let Some(existing) = self
            .sources
            .find_by_root(owner_id, &root.to_string_lossy())
            .await?
        {
            return Ok(existing);
        }

        self.resolver.acquire(&root).await?;
        let source = Source::new(&root, owner_id, self.clock.unix_timestamp());
        self.sources.insert(&source).await?;

        info!(source_id = %source.id, "Source added");
        self.events
            .emit(CoreEvent::Library(LibraryEvent::SourceAdded {
                source_id: source.id.clone(),
                root_path: source.root_path.clone(),
            }))
            .ok();
        Ok(source)
    }

    /// Delete a source with its catalog rows and root handle; songs stay
    #[instrument(skip(self))]
    pub async fn remove_source(&self, source_id: &str) -> Result<bool> {
        let Some(source) = self.sources.find_by_id(source_id).await? else {
            return Ok(false);
        };

        self.synchronizer.cancel_source(source_id);
        let removed = self.sources.delete(source_id).await?;
        if let Err(e) = self.resolver.forget(source.root()).await {
            warn!(error = %e, "Root handle not forgotten");
        }

        if removed {
            info!("Source removed");
            self.events
                .emit(CoreEvent::Library(LibraryEvent::SourceRemoved {
                    source_id: source_id.to_string(),
                }))
                .ok();
        }
        Ok(removed)
    }

    pub async fn sources(&self, owner_id: Option<&str>) -> Result<Vec<Source>> {
        Ok(self.sources.list(owner_id).await?)
    }

    /// Synchronize a source's catalog with its tree
    pub async fn sync(&self, source_id: &str) -> Result<SyncReport> {
        Ok(self.synchronizer.run(source_id).await?)
    }

    /// Cancel a running sync; `false` if the source is not syncing
    pub fn cancel_sync(&self, source_id: &str) -> bool {
        self.synchronizer.cancel_source(source_id)
    }

    /// Import selected catalog entries of a source into the song library
    pub async fn import_paths<F>(
        &self,
        source_id: &str,
        selection: Vec<PathEntry>,
        on_progress: F,
    ) -> Result<ImportSummary>
    where
        F: Fn(ImportProgress) + Send + Sync,
    {
        let source = self
            .sources
            .find_by_id(source_id)
            .await?
            .ok_or_else(|| CoreError::SourceNotFound(source_id.to_string()))?;
        Ok(self
            .importer
            .import_paths(&source, selection, on_progress)
            .await?)
    }

    /// Cancel the running import; `false` if none is running
    pub fn cancel_import(&self) -> bool {
        self.importer.cancel()
    }

    pub async fn search(
        &self,
        scope: SearchScope,
        text: &str,
        limit: u32,
        offset: u32,
    ) -> Result<SearchPage> {
        Ok(self.search.query(scope, text, limit, offset).await?)
    }

    /// Children of a directory, or the top level when `parent_path_id` is `None`
    pub async fn list_catalog(
        &self,
        source_id: &str,
        parent_path_id: Option<&str>,
    ) -> Result<Vec<PathEntry>> {
        Ok(self.catalog.list(source_id, parent_path_id).await?)
    }

    pub async fn song(&self, song_id: i64) -> Result<Option<Song>> {
        Ok(self.songs.find_by_id(song_id).await?)
    }

    /// Persist a handle playback renewed for a song's original file
    #[instrument(skip(self, blob))]
    pub async fn renew_song_handle(&self, song_id: i64, blob: Vec<u8>) -> Result<Song> {
        let song = self
            .songs
            .find_by_id(song_id)
            .await?
            .ok_or(CoreError::SongNotFound(song_id))?;

        let handle = self
            .resolver
            .renew(Path::new(&song.source_location), blob)
            .await?;
        self.songs
            .update_handle(
                song_id,
                &handle.key,
                &handle.location.to_string_lossy(),
                self.clock.unix_timestamp(),
            )
            .await?;

        self.songs
            .find_by_id(song_id)
            .await?
            .ok_or(CoreError::SongNotFound(song_id))
    }

    /// Cancel background work and close the catalog
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.synchronizer.cancel();
        self.importer.cancel();
        self.wait_for_sweep().await;
        self.gate.pool().close().await;
        info!("Library core shut down");
    }
}
