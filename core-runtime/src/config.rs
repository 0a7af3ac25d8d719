//! # Core Configuration Module
//!
//! Provides configuration management for the music library core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds the host bridges and tuning knobs for sync and import.
//! It enforces fail-fast validation so a misconfigured host learns about the
//! problem at start-up instead of halfway through a sync run.
//!
//! ## Required Settings
//!
//! - `database_path` - SQLite catalog file
//! - `media_dir` - destination for app-owned local copies
//!
//! ## Bridges (with platform defaults)
//!
//! - `FileSystemAccess` - traversal and copying (desktop default: tokio fs)
//! - `BookmarkProvider` - persistent folder access (desktop default: path bookmarks)
//! - `Clock` - defaults to the system clock on every platform
//!
//! When the `desktop-shims` feature is disabled, hosts must inject both
//! bridges or `build()` fails with [`Error::CapabilityMissing`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/library.db")
//!     .media_dir("/path/to/media")
//!     .import_parallelism(4)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{BookmarkProvider, Clock, FileSystemAccess, SystemClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for concurrent import workers.
pub const MAX_IMPORT_PARALLELISM: usize = 8;

/// Extensions treated as audio when the synchronizer counts eligible files
/// and when the import pipeline filters a selection.
pub const DEFAULT_AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "oga", "opus", "m4a", "aac", "wav", "wave", "aiff", "aif", "ape", "wv",
    "alac", "wma",
];

/// Tuning for the tree synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Delay between availability checks while a placeholder downloads.
    pub materialization_poll_interval: Duration,

    /// Availability checks before an entry is abandoned for this run.
    pub materialization_max_retries: u32,

    /// Catalog rows written per transaction.
    pub batch_size: usize,

    /// Lowercase extensions, without the leading dot.
    pub audio_extensions: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            materialization_poll_interval: Duration::from_millis(250),
            materialization_max_retries: 20,
            batch_size: 500,
            audio_extensions: DEFAULT_AUDIO_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl SyncSettings {
    /// Whether a path carries one of the configured audio extensions.
    pub fn is_audio_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.audio_extensions.iter().any(|known| *known == ext)
            })
            .unwrap_or(false)
    }
}

/// Tuning for the import pipeline and the durability sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSettings {
    /// Entries processed concurrently. `1` keeps the pipeline sequential.
    pub parallelism: usize,

    /// Copy attempts per song before the sweeper stops retrying it.
    pub max_copy_attempts: u32,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            parallelism: 1,
            max_copy_attempts: 3,
        }
    }
}

/// Core configuration for the music library core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Directory holding app-owned copies of imported audio
    pub media_dir: PathBuf,

    /// Directory holding extracted cover art, content-addressed
    pub artwork_dir: PathBuf,

    pub file_system: Arc<dyn FileSystemAccess>,

    pub bookmark_provider: Arc<dyn BookmarkProvider>,

    pub clock: Arc<dyn Clock>,

    pub sync: SyncSettings,

    pub import: ImportSettings,

    /// Run the durability sweeper in the background after bootstrap
    pub sweep_on_start: bool,

    /// Capacity of the broadcast event bus
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("media_dir", &self.media_dir)
            .field("artwork_dir", &self.artwork_dir)
            .field("file_system", &"FileSystemAccess { ... }")
            .field("bookmark_provider", &"BookmarkProvider { ... }")
            .field("sync", &self.sync)
            .field("import", &self.import)
            .field("sweep_on_start", &self.sweep_on_start)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.media_dir.as_os_str().is_empty() {
            return Err(Error::Config("Media directory cannot be empty".to_string()));
        }

        if self.import.parallelism == 0 || self.import.parallelism > MAX_IMPORT_PARALLELISM {
            return Err(Error::Config(format!(
                "Import parallelism must be between 1 and {}, got {}",
                MAX_IMPORT_PARALLELISM, self.import.parallelism
            )));
        }

        if self.sync.batch_size == 0 {
            return Err(Error::Config(
                "Sync batch size must be greater than 0".to_string(),
            ));
        }

        if self.sync.audio_extensions.is_empty() {
            return Err(Error::Config(
                "At least one audio extension must be configured".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn file_system_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required for traversal and copying. \
                 Desktop: enable the 'desktop-shims' feature to use TokioFileSystem. \
                 Mobile: inject a sandbox-aware adapter that reports cloud placeholders."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn bookmark_provider_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "BookmarkProvider".to_string(),
        message: "BookmarkProvider implementation is required to persist folder access. \
                 Desktop: enable the 'desktop-shims' feature to use PathBookmarkProvider. \
                 Apple platforms: inject a security-scoped bookmark adapter."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(media_dir: &Path) -> Result<Arc<dyn FileSystemAccess>> {
    use bridge_desktop::TokioFileSystem;

    let data_dir = media_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| media_dir.to_path_buf());
    let fs: Arc<dyn FileSystemAccess> = Arc::new(TokioFileSystem::with_data_directory(data_dir));
    Ok(fs)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(_media_dir: &Path) -> Result<Arc<dyn FileSystemAccess>> {
    Err(file_system_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_bookmark_provider() -> Result<Arc<dyn BookmarkProvider>> {
    use bridge_desktop::PathBookmarkProvider;

    let provider: Arc<dyn BookmarkProvider> = Arc::new(PathBookmarkProvider::new());
    Ok(provider)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_bookmark_provider() -> Result<Arc<dyn BookmarkProvider>> {
    Err(bookmark_provider_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    media_dir: Option<PathBuf>,
    artwork_dir: Option<PathBuf>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    bookmark_provider: Option<Arc<dyn BookmarkProvider>>,
    clock: Option<Arc<dyn Clock>>,
    sync: SyncSettings,
    import: ImportSettings,
    sweep_on_start: Option<bool>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .database_path("/path/to/library.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the directory receiving local copies of imported audio.
    pub fn media_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.media_dir = Some(path.into());
        self
    }

    /// Sets the cover art directory. Defaults to `<media_dir>/artwork`.
    pub fn artwork_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.artwork_dir = Some(path.into());
        self
    }

    /// Sets the file system access implementation.
    ///
    /// If not provided, the desktop default (tokio fs-based) is used when
    /// the `desktop-shims` feature is enabled.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Sets the bookmark provider implementation.
    pub fn bookmark_provider(mut self, provider: Arc<dyn BookmarkProvider>) -> Self {
        self.bookmark_provider = Some(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Default: 250 ms
    pub fn materialization_poll_interval(mut self, interval: Duration) -> Self {
        self.sync.materialization_poll_interval = interval;
        self
    }

    /// Default: 20
    pub fn materialization_max_retries(mut self, retries: u32) -> Self {
        self.sync.materialization_max_retries = retries;
        self
    }

    /// Default: 500
    pub fn sync_batch_size(mut self, size: usize) -> Self {
        self.sync.batch_size = size;
        self
    }

    /// Replaces the audio extension list. Leading dots are stripped.
    pub fn audio_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sync.audio_extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self
    }

    /// Default: 1, maximum [`MAX_IMPORT_PARALLELISM`]
    pub fn import_parallelism(mut self, parallelism: usize) -> Self {
        self.import.parallelism = parallelism;
        self
    }

    /// Default: 3
    pub fn max_copy_attempts(mut self, attempts: u32) -> Self {
        self.import.max_copy_attempts = attempts;
        self
    }

    /// Default: true
    pub fn sweep_on_start(mut self, enabled: bool) -> Self {
        self.sweep_on_start = Some(enabled);
        self
    }

    /// Default: 256
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Returns an error if a required path is missing, a bridge is missing
    /// without a platform default, or a tuning value is out of range.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let media_dir = self.media_dir.ok_or_else(|| {
            Error::Config("Media directory is required. Use .media_dir() to set it.".to_string())
        })?;

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&media_dir)?,
        };

        let bookmark_provider = match self.bookmark_provider {
            Some(provider) => provider,
            None => provide_default_bookmark_provider()?,
        };

        let config = CoreConfig {
            artwork_dir: self
                .artwork_dir
                .unwrap_or_else(|| media_dir.join("artwork")),
            database_path,
            media_dir,
            file_system,
            bookmark_provider,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            sync: self.sync,
            import: self.import,
            sweep_on_start: self.sweep_on_start.unwrap_or(true),
            event_buffer_size: self.event_buffer_size.unwrap_or(256),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, FileMetadata, ResolvedBookmark};

    struct MockFileSystem;

    #[async_trait]
    impl FileSystemAccess for MockFileSystem {
        async fn get_data_directory(&self) -> std::result::Result<PathBuf, BridgeError> {
            Ok(PathBuf::from("/data"))
        }

        async fn exists(&self, _path: &Path) -> std::result::Result<bool, BridgeError> {
            Ok(false)
        }

        async fn metadata(&self, _path: &Path) -> std::result::Result<FileMetadata, BridgeError> {
            Ok(FileMetadata::directory())
        }

        async fn create_dir_all(&self, _path: &Path) -> std::result::Result<(), BridgeError> {
            Ok(())
        }

        async fn read_file(&self, _path: &Path) -> std::result::Result<bytes::Bytes, BridgeError> {
            Ok(bytes::Bytes::new())
        }

        async fn write_file(
            &self,
            _path: &Path,
            _data: bytes::Bytes,
        ) -> std::result::Result<(), BridgeError> {
            Ok(())
        }

        async fn rename(&self, _from: &Path, _to: &Path) -> std::result::Result<(), BridgeError> {
            Ok(())
        }

        async fn delete_file(&self, _path: &Path) -> std::result::Result<(), BridgeError> {
            Ok(())
        }

        async fn list_directory(
            &self,
            _path: &Path,
        ) -> std::result::Result<Vec<PathBuf>, BridgeError> {
            Ok(Vec::new())
        }

        async fn open_read_stream(
            &self,
            _path: &Path,
        ) -> std::result::Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>, BridgeError>
        {
            Err(BridgeError::NotAvailable("read".to_string()))
        }

        async fn open_write_stream(
            &self,
            _path: &Path,
        ) -> std::result::Result<Box<dyn tokio::io::AsyncWrite + Send + Unpin>, BridgeError>
        {
            Err(BridgeError::NotAvailable("write".to_string()))
        }
    }

    struct MockBookmarks;

    #[async_trait]
    impl BookmarkProvider for MockBookmarks {
        async fn create_bookmark(&self, location: &Path) -> std::result::Result<Vec<u8>, BridgeError> {
            Ok(location.to_string_lossy().as_bytes().to_vec())
        }

        async fn resolve_bookmark(
            &self,
            blob: &[u8],
        ) -> std::result::Result<ResolvedBookmark, BridgeError> {
            Ok(ResolvedBookmark {
                path: PathBuf::from(String::from_utf8_lossy(blob).to_string()),
                is_stale: false,
            })
        }

        fn start_access(&self, _path: &Path) -> bool {
            true
        }

        fn stop_access(&self, _path: &Path) {}
    }

    fn builder_with_bridges() -> CoreConfigBuilder {
        CoreConfig::builder()
            .file_system(Arc::new(MockFileSystem))
            .bookmark_provider(Arc::new(MockBookmarks))
    }

    #[test]
    fn test_builder_requires_database_path() {
        let result = builder_with_bridges().media_dir("/media").build();

        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains("Database path is required"));
    }

    #[test]
    fn test_builder_requires_media_dir() {
        let result = builder_with_bridges().database_path("/library.db").build();

        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains("Media directory is required"));
    }

    #[test]
    fn test_builder_defaults() {
        let config = builder_with_bridges()
            .database_path("/library.db")
            .media_dir("/media")
            .build()
            .unwrap();

        assert_eq!(config.artwork_dir, PathBuf::from("/media/artwork"));
        assert_eq!(
            config.sync.materialization_poll_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.sync.materialization_max_retries, 20);
        assert_eq!(config.sync.batch_size, 500);
        assert_eq!(config.import.parallelism, 1);
        assert_eq!(config.import.max_copy_attempts, 3);
        assert!(config.sweep_on_start);
        assert_eq!(config.event_buffer_size, 256);
    }

    #[test]
    fn test_validate_rejects_parallelism_out_of_range() {
        for parallelism in [0, MAX_IMPORT_PARALLELISM + 1] {
            let result = builder_with_bridges()
                .database_path("/library.db")
                .media_dir("/media")
                .import_parallelism(parallelism)
                .build();

            assert!(matches!(result, Err(Error::Config(_))));
        }
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let result = builder_with_bridges()
            .database_path("/library.db")
            .media_dir("/media")
            .sync_batch_size(0)
            .build();

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_audio_extensions_are_normalized() {
        let config = builder_with_bridges()
            .database_path("/library.db")
            .media_dir("/media")
            .audio_extensions([".MP3", "flac", ""])
            .build()
            .unwrap();

        assert_eq!(config.sync.audio_extensions, vec!["mp3", "flac"]);
        assert!(config.sync.is_audio_file(Path::new("/music/Track.Mp3")));
        assert!(!config.sync.is_audio_file(Path::new("/music/cover.jpg")));
        assert!(!config.sync.is_audio_file(Path::new("/music/README")));
    }

    #[test]
    fn test_default_audio_extensions() {
        let settings = SyncSettings::default();
        for ext in ["mp3", "flac", "m4a", "opus", "wv"] {
            assert!(settings.is_audio_file(&PathBuf::from(format!("a.{ext}"))));
        }
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_defaults() {
        let config = CoreConfig::builder()
            .database_path("/tmp/library.db")
            .media_dir("/tmp/media")
            .build()
            .expect("desktop defaults should succeed");

        assert_eq!(config.media_dir, PathBuf::from("/tmp/media"));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_bridges_without_shims() {
        let result = CoreConfig::builder()
            .database_path("/library.db")
            .media_dir("/media")
            .build();

        assert!(matches!(result, Err(Error::CapabilityMissing { .. })));
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = builder_with_bridges()
            .database_path("/library.db")
            .media_dir("/media")
            .build()
            .unwrap();

        let cloned = config.clone();
        assert_eq!(cloned.database_path, config.database_path);
        assert!(format!("{:?}", cloned).contains("CoreConfig"));
    }
}
