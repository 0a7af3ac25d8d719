use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete `CoreConfig`
    #[error("Configuration error: {0}")]
    Config(String),

    /// A host bridge was not injected and has no platform default
    #[error("{capability} not provided: {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
