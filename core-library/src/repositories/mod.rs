//! Repository traits and their SQLite implementations
//!
//! Every repository shares one [`WriteGate`](crate::store::WriteGate):
//! writes queue on it, reads go straight to the pool.

pub mod handle;
pub mod pagination;
pub mod path_entry;
pub mod song;
pub mod source;

pub use handle::{HandleRepository, SqliteHandleRepository};
pub use pagination::{Page, PageRequest};
pub use path_entry::{BatchOutcome, CatalogBatch, PathCatalog, RetainedPath, SqlitePathCatalog};
pub use song::{SongRepository, SongUpsert, SqliteSongRepository};
pub use source::{SourceRepository, SqliteSourceRepository};
