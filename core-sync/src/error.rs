use crate::run::SyncRunState;
use bridge_traits::BridgeError;
use core_access::AccessError;
use core_library::LibraryError;
use core_metadata::MetadataError;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Permission denied or revoked; fatal to the operation.
    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    /// Remote content still unavailable after the bounded retries.
    #[error("{} is not available on this device after {attempts} checks", .path.display())]
    NotMaterialized { path: PathBuf, attempts: u32 },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: BridgeError,
    },

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// User-initiated; completed work is kept.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Sync already in progress for source {source_id}")]
    SyncInProgress { source_id: String },

    #[error("An import is already in progress")]
    ImportInProgress,

    #[error("Source {0} not found")]
    SourceNotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: SyncRunState, to: SyncRunState },
}

impl SyncError {
    /// Classify a bridge failure at `path`: host refusals become access
    /// errors, everything else is local I/O.
    pub fn from_bridge(path: &Path, error: BridgeError) -> Self {
        match error {
            BridgeError::PermissionDenied { path, reason } => {
                SyncError::Access(AccessError::Denied {
                    location: path,
                    reason,
                })
            }
            source => SyncError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// Failure confined to one entry: the entry is skipped and the
    /// operation continues. A bridge failure while acquiring a handle (the
    /// file vanished) is local; denial and revocation are not.
    pub fn is_entry_local(&self) -> bool {
        matches!(
            self,
            SyncError::Io { .. }
                | SyncError::NotMaterialized { .. }
                | SyncError::Metadata(_)
                | SyncError::Access(AccessError::Bridge(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
