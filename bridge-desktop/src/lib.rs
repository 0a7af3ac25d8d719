//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux):
//! - `FileSystemAccess` using `tokio::fs`; every entry is materialized
//! - `BookmarkProvider` using absolute paths plus file identity
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{PathBookmarkProvider, TokioFileSystem};
//! use std::sync::Arc;
//!
//! let fs = Arc::new(TokioFileSystem::new());
//! let bookmarks = Arc::new(PathBookmarkProvider::new());
//! // Hand both to CoreConfig::builder()
//! ```

mod bookmark;
mod filesystem;

pub use bookmark::PathBookmarkProvider;
pub use filesystem::TokioFileSystem;
