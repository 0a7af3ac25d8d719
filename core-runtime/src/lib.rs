//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the music library core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! Every other workspace crate depends on this one for its configuration
//! types and event vocabulary.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
