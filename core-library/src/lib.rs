//! # Library Catalog
//!
//! Owns the persistent catalog of one installation:
//! - SQLite schema, migrations and the schema-version reset policy ([`db`])
//! - Sources, the path catalog, songs and stored access handles
//!   ([`repositories`])
//! - The single writer every mutation goes through ([`store`])
//! - Two FTS5 indexes kept consistent with their tables ([`search`])
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//! use core_library::repositories::SqlitePathCatalog;
//! use core_library::store::WriteGate;
//!
//! let gate = WriteGate::new(create_pool(DatabaseConfig::new("library.db")).await?);
//! let catalog = SqlitePathCatalog::new(gate.clone());
//! ```

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod search;
pub mod store;

pub use error::{LibraryError, Result};
pub use models::{LocalCopyState, PathEntry, Song, SongDraft, Source, StoredHandle};
pub use search::{SearchHit, SearchIndex, SearchPage, SearchQuery, SearchScope};
pub use store::WriteGate;
