//! # Metadata Module
//!
//! Turns the bytes of an audio file into song metadata:
//! - Tag extraction with filename fallbacks ([`extractor`])
//! - Dedupe keys identifying a logical track ([`dedupe`])
//! - Content-addressed cover-art storage ([`artwork`])

pub mod artwork;
pub mod dedupe;
pub mod error;
pub mod extractor;

pub use artwork::CoverArtStore;
pub use dedupe::dedupe_key;
pub use error::{MetadataError, Result};
pub use extractor::{MetadataExtractor, TrackTags, UNKNOWN_ARTIST};
