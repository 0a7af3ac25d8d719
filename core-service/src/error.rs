use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Source {0} not found")]
    SourceNotFound(String),

    #[error("Song {0} not found")]
    SongNotFound(i64),

    #[error("Access error: {0}")]
    Access(#[from] core_access::AccessError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),
}

impl CoreError {
    /// User-initiated cancellation of a sync or import
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Sync(e) if e.is_cancelled())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
