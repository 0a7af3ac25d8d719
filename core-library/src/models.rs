//! Domain models for the library catalog
//!
//! Rows of the `sources`, `path_entries`, `songs` and `access_handles`
//! tables, plus the deterministic identifiers derived from locations.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Hex encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha256::digest(bytes.as_ref()))
}

/// Lexically normalize an absolute location.
///
/// Resolves `.` and `..` without touching the filesystem, so symlinks are
/// never followed and a missing path still normalizes.
pub fn normalize_location(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Stable key for a location: SHA-256 of its normalized form.
///
/// Used both as `PathEntry::path_id` and as the key of a stored handle, so
/// re-scanning the same tree reproduces the same identifiers.
pub fn location_key(path: &Path) -> String {
    sha256_hex(normalize_location(path).to_string_lossy().as_bytes())
}

/// Path of `location` relative to `root`, components joined with `/`.
///
/// `None` when `location` is not strictly beneath `root`.
pub fn relative_location(root: &Path, location: &Path) -> Option<String> {
    let root = normalize_location(root);
    let location = normalize_location(location);
    let rest = location.strip_prefix(&root).ok()?;

    let parts: Vec<String> = rest
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Change fingerprint for a file: size plus modification time.
pub fn content_fingerprint(size: u64, modified_at: Option<i64>) -> String {
    sha256_hex(format!("{}:{}", size, modified_at.unwrap_or_default()))
}

// =============================================================================
// Sources
// =============================================================================

/// A root folder the user granted access to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Source {
    pub id: String,
    /// Normalized absolute root location
    pub root_path: String,
    pub owner_id: String,
    /// Key of the stored access handle for the root
    pub handle_key: String,
    pub last_synced_at: Option<i64>,
    pub last_entry_count: i64,
    pub last_error: Option<String>,
    /// Generation of the most recently started sync run
    pub last_generation: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Source {
    pub fn new(root_path: &Path, owner_id: impl Into<String>, now: i64) -> Self {
        let root = normalize_location(root_path);
        Self {
            id: Uuid::new_v4().to_string(),
            root_path: root.to_string_lossy().into_owned(),
            owner_id: owner_id.into(),
            handle_key: location_key(&root),
            last_synced_at: None,
            last_entry_count: 0,
            last_error: None,
            last_generation: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn root(&self) -> &Path {
        Path::new(&self.root_path)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Source id cannot be empty".to_string());
        }
        if !self.root().is_absolute() {
            return Err(format!("Source root must be absolute: {}", self.root_path));
        }
        if self.owner_id.trim().is_empty() {
            return Err("Source owner cannot be empty".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Path catalog
// =============================================================================

/// One file or directory beneath a source root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PathEntry {
    /// Row id; also the rowid of the entry's search index row
    pub id: i64,
    pub source_id: String,
    pub path_id: String,
    /// `None` for entries directly beneath the root
    pub parent_path_id: Option<String>,
    pub name: String,
    pub relative_path: String,
    pub is_directory: bool,
    pub content_hash: Option<String>,
    pub generation: i64,
}

impl PathEntry {
    /// Describe an entry observed at `location` during a run.
    ///
    /// Returns `None` for the root itself or anything outside it.
    pub fn observed(
        source_id: &str,
        root: &Path,
        location: &Path,
        is_directory: bool,
        content_hash: Option<String>,
        generation: i64,
    ) -> Option<Self> {
        let relative_path = relative_location(root, location)?;
        let location = normalize_location(location);
        let name = location.file_name()?.to_string_lossy().into_owned();

        let parent_path_id = location
            .parent()
            .filter(|parent| normalize_location(parent) != normalize_location(root))
            .map(location_key);

        Some(Self {
            id: 0,
            source_id: source_id.to_string(),
            path_id: location_key(&location),
            parent_path_id,
            name,
            relative_path,
            is_directory,
            content_hash: if is_directory { None } else { content_hash },
            generation,
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.path_id.is_empty() {
            return Err("Path id cannot be empty".to_string());
        }
        if self.name.is_empty() || self.relative_path.is_empty() {
            return Err(format!("Entry {} has no name", self.path_id));
        }
        if self.parent_path_id.as_deref() == Some(self.path_id.as_str()) {
            return Err(format!("Entry {} is its own parent", self.relative_path));
        }
        if self.is_directory && self.content_hash.is_some() {
            return Err(format!(
                "Directory {} cannot carry a content hash",
                self.relative_path
            ));
        }
        Ok(())
    }

    /// Absolute location of this entry under `root`.
    pub fn location(&self, root: &Path) -> PathBuf {
        self.relative_path
            .split('/')
            .fold(root.to_path_buf(), |acc, part| acc.join(part))
    }
}

// =============================================================================
// Songs
// =============================================================================

/// Durability of a song's local byte copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub enum LocalCopyState {
    ReferenceOnly,
    CopyPending,
    Copied,
    Failed,
}

impl LocalCopyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalCopyState::ReferenceOnly => "referenceOnly",
            LocalCopyState::CopyPending => "copyPending",
            LocalCopyState::Copied => "copied",
            LocalCopyState::Failed => "failed",
        }
    }

    /// Whether the durability sweeper should retry this song.
    pub fn needs_repair(&self) -> bool {
        matches!(self, LocalCopyState::CopyPending | LocalCopyState::Failed)
    }
}

impl fmt::Display for LocalCopyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deduplicated audio track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Song {
    /// Row id; also the rowid of the song's search index row
    pub id: i64,
    pub dedupe_key: String,
    pub artist: String,
    pub title: String,
    pub album: String,
    pub album_artist: Option<String>,
    pub normalized_artist: String,
    pub normalized_title: String,
    pub normalized_album: String,
    pub year: Option<i32>,
    pub disc_number: Option<i32>,
    pub track_number: Option<i32>,
    /// Hash naming the cover image in the artwork store
    pub cover_art_ref: Option<String>,
    /// Key of the stored access handle for the source file
    pub handle_key: String,
    /// Absolute location the song was imported from
    pub source_location: String,
    pub origin_path_hash: String,
    pub local_copy_state: LocalCopyState,
    pub local_copy_path: Option<String>,
    pub copy_attempts: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Song {
    /// Normalize a string for dedupe and matching (trimmed, lowercase,
    /// inner whitespace collapsed)
    pub fn normalize(s: &str) -> String {
        s.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    pub fn source_location(&self) -> &Path {
        Path::new(&self.source_location)
    }

    /// Whether the stored identity fields describe the same logical track.
    pub fn same_identity(&self, draft: &SongDraft) -> bool {
        self.normalized_artist == Song::normalize(&draft.artist)
            && self.normalized_title == Song::normalize(&draft.title)
            && self.normalized_album == Song::normalize(&draft.album)
    }
}

/// Metadata for one import, written into a `Song` row by upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongDraft {
    pub dedupe_key: String,
    pub artist: String,
    pub title: String,
    pub album: String,
    pub album_artist: Option<String>,
    pub year: Option<i32>,
    pub disc_number: Option<i32>,
    pub track_number: Option<i32>,
    pub cover_art_ref: Option<String>,
    pub handle_key: String,
    pub source_location: String,
    pub origin_path_hash: String,
}

impl SongDraft {
    pub fn validate(&self) -> Result<(), String> {
        if self.dedupe_key.trim().is_empty() {
            return Err("Dedupe key cannot be empty".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("Song title cannot be empty".to_string());
        }
        if self.artist.trim().is_empty() {
            return Err("Song artist cannot be empty".to_string());
        }
        if let Some(track) = self.track_number {
            if track <= 0 {
                return Err("Track number must be positive".to_string());
            }
        }
        if let Some(disc) = self.disc_number {
            if disc <= 0 {
                return Err("Disc number must be positive".to_string());
            }
        }
        if self.handle_key.is_empty() || self.source_location.is_empty() {
            return Err(format!("Song {} has no source reference", self.title));
        }
        Ok(())
    }
}

// =============================================================================
// Stored access handles
// =============================================================================

/// Opaque access handle persisted under the key of its location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StoredHandle {
    pub key: String,
    pub location: String,
    pub blob: Vec<u8>,
    pub updated_at: i64,
}

impl StoredHandle {
    pub fn new(location: &Path, blob: Vec<u8>, now: i64) -> Self {
        let location = normalize_location(location);
        Self {
            key: location_key(&location),
            location: location.to_string_lossy().into_owned(),
            blob,
            updated_at: now,
        }
    }
}
