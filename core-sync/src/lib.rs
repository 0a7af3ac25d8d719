//! # Sync & Import Module
//!
//! Background work over a source tree.
//!
//! ## Components
//!
//! - **Tree Synchronizer** (`synchronizer`): mirrors a source directory tree
//!   into the path catalog, one generation per run
//! - **Sync Run** (`run`): run state machine and report
//! - **Materializer** (`materializer`): bounded waiting for cloud placeholders
//! - **Import Pipeline** (`import`): promotes cataloged audio files into songs
//!   with durable local copies
//! - **Local Copier** (`copier`): crash-safe copies into the media directory
//! - **Durability Sweeper** (`sweeper`): finishes copies an earlier process
//!   left pending or failed

pub mod copier;
pub mod error;
pub mod import;
pub mod materializer;
pub mod run;
pub mod sweeper;
pub mod synchronizer;

pub use copier::LocalCopier;
pub use error::{Result, SyncError};
pub use import::{ImportPipeline, ImportProgress, ImportSummary};
pub use materializer::Materializer;
pub use run::{SyncReport, SyncRunState};
pub use sweeper::{DurabilitySweeper, SweepReport};
pub use synchronizer::Synchronizer;
