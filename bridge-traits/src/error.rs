use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The host refused access to a location (sandbox denial, missing grant).
    #[error("Permission denied for {}: {reason}", .path.display())]
    PermissionDenied { path: PathBuf, reason: String },

    /// A bookmark blob could not be decoded or no longer points anywhere.
    #[error("Invalid bookmark: {0}")]
    InvalidBookmark(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the underlying failure is a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BridgeError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
