//! Workspace umbrella crate.
//!
//! Host applications depend on `music-library-core` and enable features
//! instead of wiring each workspace crate individually. With the default
//! `desktop-shims` feature the [`LibraryCore`] façade is re-exported with the
//! tokio-backed file system and path bookmark adapters wired in.

#[cfg(feature = "desktop-shims")]
pub use core_service::{CoreError, LibraryCore};

#[cfg(feature = "metadata")]
pub use core_metadata;
