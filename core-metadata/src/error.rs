use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    /// The blocking tag parser panicked or was cancelled
    #[error("Tag extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Reading or writing the artwork directory failed
    #[error("Artwork store error: {0}")]
    Store(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, MetadataError>;
