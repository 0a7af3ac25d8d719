//! # Host Bridge Traits
//!
//! Platform abstraction traits that each host must implement for the music
//! library core.
//!
//! ## Traits
//!
//! - [`FileSystemAccess`](storage::FileSystemAccess) - traversal, materialization, streaming copies
//! - [`BookmarkProvider`](bookmark::BookmarkProvider) - persistable access grants for user folders
//! - [`Clock`](time::Clock) - time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | iOS/macOS | host app (security-scoped bookmarks) | 📋 Planned |
//! | Android  | host app (SAF tree URIs) | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits return [`BridgeError`](error::BridgeError). Hosts must
//! report access refusal as `PermissionDenied` rather than a generic I/O
//! error; the reference resolver relies on that distinction.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! across async tasks behind an `Arc`.

pub mod bookmark;
pub mod error;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use bookmark::{BookmarkProvider, ResolvedBookmark};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, ConsoleLogger, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
