//! Song repository trait and implementation
//!
//! Songs are keyed by their dedupe key: re-importing the same logical track
//! refreshes the existing row. The song row and its `songs_fts` row are
//! always written in the same transaction.

use crate::error::{LibraryError, Result};
use crate::models::{sha256_hex, LocalCopyState, Song, SongDraft};
use crate::repositories::{Page, PageRequest};
use crate::store::{WriteGate, WriteTransaction};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

/// Result of [`SongRepository::upsert`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongUpsert {
    pub song: Song,
    /// `false` when an existing song was refreshed
    pub created: bool,
}

/// Song repository interface for data access operations
#[async_trait]
pub trait SongRepository: Send + Sync {
    /// Insert or refresh the song identified by the draft's dedupe key
    ///
    /// A stored song whose normalized artist, title and album differ from
    /// the draft is a key collision; the draft is then stored under a key
    /// disambiguated by its origin path.
    async fn upsert(&self, draft: &SongDraft, state: LocalCopyState, at: i64)
        -> Result<SongUpsert>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Song>>;

    async fn find_by_dedupe_key(&self, dedupe_key: &str) -> Result<Option<Song>>;

    /// Songs in any of `states`, oldest first
    async fn list_by_copy_state(&self, states: &[LocalCopyState]) -> Result<Vec<Song>>;

    /// Query songs with pagination, ordered by artist, album and position
    async fn query(&self, page_request: PageRequest) -> Result<Page<Song>>;

    async fn count(&self) -> Result<i64>;

    /// Mark that a byte copy is about to start
    async fn mark_copy_pending(&self, id: i64, at: i64) -> Result<()>;

    /// Record a completed copy; resets the attempt counter
    async fn mark_copied(&self, id: i64, local_copy_path: &str, at: i64) -> Result<()>;

    /// Record a failed copy attempt
    async fn mark_copy_failed(&self, id: i64, at: i64) -> Result<()>;

    /// Point a song at a new handle and location
    async fn update_handle(
        &self,
        id: i64,
        handle_key: &str,
        source_location: &str,
        at: i64,
    ) -> Result<()>;
}

/// SQLite implementation of SongRepository
pub struct SqliteSongRepository {
    gate: WriteGate,
}

impl SqliteSongRepository {
    pub fn new(gate: WriteGate) -> Self {
        Self { gate }
    }

    fn not_found(id: i64) -> LibraryError {
        LibraryError::NotFound {
            entity_type: "Song".to_string(),
            id: id.to_string(),
        }
    }

    /// Key used when `dedupe_key` is already taken by a different track
    fn disambiguated_key(draft: &SongDraft) -> String {
        sha256_hex(format!("{}\u{1f}{}", draft.dedupe_key, draft.origin_path_hash))
    }

    async fn fetch_by_key(tx: &mut WriteTransaction, key: &str) -> Result<Option<Song>> {
        let song = sqlx::query_as::<_, Song>("SELECT * FROM songs WHERE dedupe_key = ?")
            .bind(key)
            .fetch_optional(tx.conn())
            .await?;
        Ok(song)
    }

    async fn write_row(
        tx: &mut WriteTransaction,
        key: &str,
        draft: &SongDraft,
        state: LocalCopyState,
        now: i64,
    ) -> Result<Song> {
        let song = sqlx::query_as::<_, Song>(
            r#"
            INSERT INTO songs (
                dedupe_key, artist, title, album, album_artist,
                normalized_artist, normalized_title, normalized_album,
                year, disc_number, track_number, cover_art_ref,
                handle_key, source_location, origin_path_hash,
                local_copy_state, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(dedupe_key) DO UPDATE SET
                artist = excluded.artist,
                title = excluded.title,
                album = excluded.album,
                album_artist = excluded.album_artist,
                year = excluded.year,
                disc_number = excluded.disc_number,
                track_number = excluded.track_number,
                cover_art_ref = COALESCE(excluded.cover_art_ref, songs.cover_art_ref),
                handle_key = excluded.handle_key,
                source_location = excluded.source_location,
                origin_path_hash = excluded.origin_path_hash,
                local_copy_state = excluded.local_copy_state,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(key)
        .bind(&draft.artist)
        .bind(&draft.title)
        .bind(&draft.album)
        .bind(&draft.album_artist)
        .bind(Song::normalize(&draft.artist))
        .bind(Song::normalize(&draft.title))
        .bind(Song::normalize(&draft.album))
        .bind(draft.year)
        .bind(draft.disc_number)
        .bind(draft.track_number)
        .bind(&draft.cover_art_ref)
        .bind(&draft.handle_key)
        .bind(&draft.source_location)
        .bind(&draft.origin_path_hash)
        .bind(state)
        .bind(now)
        .bind(now)
        .fetch_one(tx.conn())
        .await?;

        sqlx::query("DELETE FROM songs_fts WHERE rowid = ?")
            .bind(song.id)
            .execute(tx.conn())
            .await?;
        sqlx::query(
            "INSERT INTO songs_fts (rowid, artist, title, album, album_artist)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(song.id)
        .bind(&song.artist)
        .bind(&song.title)
        .bind(&song.album)
        .bind(song.album_artist.as_deref().unwrap_or_default())
        .execute(tx.conn())
        .await?;

        Ok(song)
    }

    async fn update_copy_state(&self, id: i64, sql: &str, at: i64) -> Result<()> {
        let mut tx = self.gate.begin().await?;
        let result = sqlx::query(sql)
            .bind(at)
            .bind(id)
            .execute(tx.conn())
            .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }
}

#[async_trait]
impl SongRepository for SqliteSongRepository {
    #[instrument(skip(self, draft), fields(title = %draft.title, state = %state))]
    async fn upsert(
        &self,
        draft: &SongDraft,
        state: LocalCopyState,
        at: i64,
    ) -> Result<SongUpsert> {
        draft
            .validate()
            .map_err(|msg| LibraryError::invalid("Song", msg))?;

        let mut tx = self.gate.begin().await?;

        let mut key = draft.dedupe_key.clone();
        let mut existing = Self::fetch_by_key(&mut tx, &key).await?;

        if existing.as_ref().is_some_and(|song| !song.same_identity(draft)) {
            warn!(dedupe_key = %key, "Dedupe key collision, disambiguating by origin");
            key = Self::disambiguated_key(draft);
            existing = Self::fetch_by_key(&mut tx, &key).await?;
        }

        let song = Self::write_row(&mut tx, &key, draft, state, at).await?;
        tx.commit().await?;

        let created = existing.is_none();
        debug!(song_id = song.id, created, "Song upserted");
        Ok(SongUpsert { song, created })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Song>> {
        let song = sqlx::query_as::<_, Song>("SELECT * FROM songs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.gate.pool())
            .await?;
        Ok(song)
    }

    async fn find_by_dedupe_key(&self, dedupe_key: &str) -> Result<Option<Song>> {
        let song = sqlx::query_as::<_, Song>("SELECT * FROM songs WHERE dedupe_key = ?")
            .bind(dedupe_key)
            .fetch_optional(self.gate.pool())
            .await?;
        Ok(song)
    }

    async fn list_by_copy_state(&self, states: &[LocalCopyState]) -> Result<Vec<Song>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; states.len()].join(", ");
        let sql = format!(
            "SELECT * FROM songs WHERE local_copy_state IN ({}) ORDER BY id ASC",
            placeholders
        );

        let mut query = sqlx::query_as::<_, Song>(&sql);
        for state in states {
            query = query.bind(*state);
        }
        Ok(query.fetch_all(self.gate.pool()).await?)
    }

    async fn query(&self, page_request: PageRequest) -> Result<Page<Song>> {
        let songs = sqlx::query_as::<_, Song>(
            r#"
            SELECT * FROM songs
            ORDER BY normalized_artist, normalized_album, disc_number, track_number,
                     normalized_title, id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(page_request.limit())
        .bind(page_request.offset())
        .fetch_all(self.gate.pool())
        .await?;

        let total = self.count().await?;
        Ok(Page::new(songs, total as u64, page_request))
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM songs")
            .fetch_one(self.gate.pool())
            .await?;
        Ok(count)
    }

    async fn mark_copy_pending(&self, id: i64, at: i64) -> Result<()> {
        self.update_copy_state(
            id,
            "UPDATE songs SET local_copy_state = 'copyPending', updated_at = ? WHERE id = ?",
            at,
        )
        .await
    }

    async fn mark_copied(&self, id: i64, local_copy_path: &str, at: i64) -> Result<()> {
        let mut tx = self.gate.begin().await?;
        let result = sqlx::query(
            "UPDATE songs
             SET local_copy_state = 'copied', local_copy_path = ?, copy_attempts = 0,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(local_copy_path)
        .bind(at)
        .bind(id)
        .execute(tx.conn())
        .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    async fn mark_copy_failed(&self, id: i64, at: i64) -> Result<()> {
        self.update_copy_state(
            id,
            "UPDATE songs
             SET local_copy_state = 'failed', copy_attempts = copy_attempts + 1, updated_at = ?
             WHERE id = ?",
            at,
        )
        .await
    }

    async fn update_handle(
        &self,
        id: i64,
        handle_key: &str,
        source_location: &str,
        at: i64,
    ) -> Result<()> {
        let mut tx = self.gate.begin().await?;
        let result = sqlx::query(
            "UPDATE songs SET handle_key = ?, source_location = ?, updated_at = ? WHERE id = ?",
        )
        .bind(handle_key)
        .bind(source_location)
        .bind(at)
        .bind(id)
        .execute(tx.conn())
        .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }
}
