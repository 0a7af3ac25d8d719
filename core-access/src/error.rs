use bridge_traits::BridgeError;
use core_library::LibraryError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccessError {
    /// The host refused to grant access to a location.
    #[error("Access denied for {}: {reason}", .location.display())]
    Denied { location: PathBuf, reason: String },

    /// A stored handle no longer resolves and could not be re-derived.
    #[error("Access revoked for {}: {reason}", .location.display())]
    Revoked { location: PathBuf, reason: String },

    #[error("No stored handle with key {0}")]
    UnknownHandle(String),

    #[error("Handle storage failed: {0}")]
    Storage(#[from] LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl AccessError {
    /// Denied or revoked: the user has to grant access again.
    pub fn requires_regrant(&self) -> bool {
        matches!(self, AccessError::Denied { .. } | AccessError::Revoked { .. })
    }
}

pub type Result<T> = std::result::Result<T, AccessError>;
