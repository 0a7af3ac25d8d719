//! Shared fixture: a real directory tree, an in-memory catalog and the
//! desktop bridges, optionally wrapped to simulate cloud placeholders.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::{PathBookmarkProvider, TokioFileSystem};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::storage::{FileMetadata, FileSystemAccess};
use bridge_traits::SystemClock;
use bytes::Bytes;
use core_access::ReferenceResolver;
use core_library::db::create_test_pool;
use core_library::models::Source;
use core_library::repositories::{
    SourceRepository, SqliteHandleRepository, SqlitePathCatalog, SqliteSongRepository,
    SqliteSourceRepository,
};
use core_library::search::SearchIndex;
use core_library::WriteGate;
use core_metadata::CoverArtStore;
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use core_sync::{DurabilitySweeper, ImportPipeline, Synchronizer};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Placeholder behaviour of a simulated cloud file
#[derive(Debug, Clone, Copy)]
pub enum Placeholder {
    /// Becomes local after this many metadata checks following a request
    MaterializesAfter(u32),
    Never,
}

/// Desktop file system that reports selected paths as cloud placeholders
pub struct CloudFileSystem {
    inner: TokioFileSystem,
    placeholders: Mutex<HashMap<PathBuf, Placeholder>>,
    requested: Mutex<HashSet<PathBuf>>,
}

impl CloudFileSystem {
    pub fn new() -> Self {
        Self {
            inner: TokioFileSystem::new(),
            placeholders: Mutex::new(HashMap::new()),
            requested: Mutex::new(HashSet::new()),
        }
    }

    pub fn evict(&self, path: &Path, behaviour: Placeholder) {
        self.placeholders
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), behaviour);
    }

    pub fn restore(&self, path: &Path) {
        self.placeholders.lock().unwrap().remove(path);
    }

    pub fn was_requested(&self, path: &Path) -> bool {
        self.requested.lock().unwrap().contains(path)
    }

    fn check(&self, path: &Path) -> bool {
        let mut placeholders = self.placeholders.lock().unwrap();
        match placeholders.get_mut(path) {
            None => true,
            Some(Placeholder::Never) => false,
            Some(Placeholder::MaterializesAfter(remaining)) => {
                if !self.requested.lock().unwrap().contains(path) {
                    return false;
                }
                if *remaining == 0 {
                    placeholders.remove(path);
                    true
                } else {
                    *remaining -= 1;
                    false
                }
            }
        }
    }
}

#[async_trait]
impl FileSystemAccess for CloudFileSystem {
    async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
        self.inner.get_data_directory().await
    }

    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        self.inner.exists(path).await
    }

    async fn metadata(&self, path: &Path) -> BridgeResult<FileMetadata> {
        let mut metadata = self.inner.metadata(path).await?;
        metadata.is_materialized = self.check(path);
        Ok(metadata)
    }

    async fn request_materialization(&self, path: &Path) -> BridgeResult<()> {
        self.requested.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.inner.create_dir_all(path).await
    }

    async fn read_file(&self, path: &Path) -> BridgeResult<Bytes> {
        self.inner.read_file(path).await
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
        self.inner.write_file(path, data).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> BridgeResult<()> {
        self.inner.rename(from, to).await
    }

    async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
        self.inner.delete_file(path).await
    }

    async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<PathBuf>> {
        self.inner.list_directory(path).await
    }

    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> BridgeResult<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
        self.inner.open_read_stream(path).await
    }

    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> BridgeResult<Box<dyn tokio::io::AsyncWrite + Send + Unpin>> {
        self.inner.open_write_stream(path).await
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub root: PathBuf,
    pub fs: Arc<CloudFileSystem>,
    pub gate: WriteGate,
    pub config: CoreConfig,
    pub events: EventBus,
    pub sources: Arc<SqliteSourceRepository>,
    pub catalog: Arc<SqlitePathCatalog>,
    pub songs: Arc<SqliteSongRepository>,
    pub search: Arc<SearchIndex>,
    pub resolver: Arc<ReferenceResolver>,
    pub synchronizer: Arc<Synchronizer>,
    pub importer: Arc<ImportPipeline>,
    pub sweeper: DurabilitySweeper,
    pub source: Source,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_poll(Duration::from_millis(1), 3).await
    }

    pub async fn with_poll(interval: Duration, retries: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        std::fs::create_dir(&root).unwrap();

        let fs = Arc::new(CloudFileSystem::new());
        let config = CoreConfig::builder()
            .database_path(dir.path().join("catalog.db"))
            .media_dir(dir.path().join("media"))
            .file_system(fs.clone())
            .bookmark_provider(Arc::new(PathBookmarkProvider::new()))
            .materialization_poll_interval(interval)
            .materialization_max_retries(retries)
            .sync_batch_size(2)
            .build()
            .unwrap();

        let gate = WriteGate::new(create_test_pool().await.unwrap());
        let events = EventBus::new(1024);
        let sources = Arc::new(SqliteSourceRepository::new(gate.clone()));
        let catalog = Arc::new(SqlitePathCatalog::new(gate.clone()));
        let songs = Arc::new(SqliteSongRepository::new(gate.clone()));
        let search = Arc::new(SearchIndex::new(gate.clone()));
        let resolver = Arc::new(ReferenceResolver::new(
            config.bookmark_provider.clone(),
            Arc::new(SqliteHandleRepository::new(gate.clone())),
            Arc::new(SystemClock),
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
        let sweeper = DurabilitySweeper::new(&config, songs.clone(), resolver.clone(), events.clone());

        resolver.acquire(&root).await.unwrap();
        let source = Source::new(&root, "owner", 0);
        sources.insert(&source).await.unwrap();

        Self {
            dir,
            root,
            fs,
            gate,
            config,
            events,
            sources,
            catalog,
            songs,
            search,
            resolver,
            synchronizer,
            importer,
            sweeper,
            source,
        }
    }

    /// Write a file under the root, creating parent directories
    pub fn write(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Pipeline over the same catalog with a different fan-out
    pub fn importer_with_parallelism(&self, parallelism: usize) -> ImportPipeline {
        let config = CoreConfig::builder()
            .database_path(self.config.database_path.clone())
            .media_dir(self.config.media_dir.clone())
            .file_system(self.fs.clone())
            .bookmark_provider(self.config.bookmark_provider.clone())
            .import_parallelism(parallelism)
            .build()
            .unwrap();
        let covers = Arc::new(CoverArtStore::new(
            config.artwork_dir.clone(),
            config.file_system.clone(),
        ));
        ImportPipeline::new(
            &config,
            self.sources.clone(),
            self.songs.clone(),
            self.resolver.clone(),
            covers,
            self.events.clone(),
        )
    }
}

/// Minimal mono 16-bit PCM WAV
pub fn silent_wav() -> Vec<u8> {
    let samples = vec![0u8; 800];
    let mut wav = Vec::new();
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + samples.len() as u32).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&8000u32.to_le_bytes());
    wav.extend_from_slice(&16000u32.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(samples.len() as u32).to_le_bytes());
    wav.extend_from_slice(&samples);
    wav
}

/// WAV file tagged with artist, title and album
pub fn write_tagged(path: &Path, artist: &str, title: &str, album: &str) {
    use lofty::config::WriteOptions;
    use lofty::tag::{Accessor, Tag, TagExt, TagType};

    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, silent_wav()).unwrap();
    let mut tag = Tag::new(TagType::Id3v2);
    tag.set_artist(artist.to_string());
    tag.set_title(title.to_string());
    tag.set_album(album.to_string());
    tag.save_to_path(path, WriteOptions::default()).unwrap();
}
