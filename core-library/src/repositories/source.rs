//! Source repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::Source;
use crate::store::WriteGate;
use async_trait::async_trait;
use tracing::debug;

/// Source repository interface for data access operations
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Insert a new source
    ///
    /// # Errors
    /// Returns error if:
    /// - A source for the same owner and root already exists
    /// - Source validation fails
    async fn insert(&self, source: &Source) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Source>>;

    /// Find the source an owner registered for `root_path`
    async fn find_by_root(&self, owner_id: &str, root_path: &str) -> Result<Option<Source>>;

    /// List sources, optionally restricted to one owner, oldest first
    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<Source>>;

    /// Atomically bump and return the source's generation counter
    async fn begin_generation(&self, id: &str) -> Result<i64>;

    /// Record a successful run; clears any previous error
    async fn record_sync_success(&self, id: &str, at: i64, total_entries: i64) -> Result<()>;

    /// Record the terminal error of a failed run
    async fn record_sync_error(&self, id: &str, at: i64, message: &str) -> Result<()>;

    /// Delete a source and, by cascade, its catalog entries and their index rows
    ///
    /// # Returns
    /// - `Ok(true)` if the source was deleted
    /// - `Ok(false)` if it was not found
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// SQLite implementation of SourceRepository
pub struct SqliteSourceRepository {
    gate: WriteGate,
}

impl SqliteSourceRepository {
    pub fn new(gate: WriteGate) -> Self {
        Self { gate }
    }

    fn not_found(id: &str) -> LibraryError {
        LibraryError::NotFound {
            entity_type: "Source".to_string(),
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl SourceRepository for SqliteSourceRepository {
    async fn insert(&self, source: &Source) -> Result<()> {
        source
            .validate()
            .map_err(|msg| LibraryError::invalid("Source", msg))?;

        let mut tx = self.gate.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO sources (
                id, root_path, owner_id, handle_key, last_synced_at, last_entry_count,
                last_error, last_generation, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.id)
        .bind(&source.root_path)
        .bind(&source.owner_id)
        .bind(&source.handle_key)
        .bind(source.last_synced_at)
        .bind(source.last_entry_count)
        .bind(&source.last_error)
        .bind(source.last_generation)
        .bind(source.created_at)
        .bind(source.updated_at)
        .execute(tx.conn())
        .await?;
        tx.commit().await?;

        debug!(source_id = %source.id, "Source inserted");
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(self.gate.pool())
            .await?;
        Ok(source)
    }

    async fn find_by_root(&self, owner_id: &str, root_path: &str) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>(
            "SELECT * FROM sources WHERE owner_id = ? AND root_path = ?",
        )
        .bind(owner_id)
        .bind(root_path)
        .fetch_optional(self.gate.pool())
        .await?;
        Ok(source)
    }

    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<Source>> {
        let sources = match owner_id {
            Some(owner) => {
                sqlx::query_as::<_, Source>(
                    "SELECT * FROM sources WHERE owner_id = ? ORDER BY created_at ASC, id ASC",
                )
                .bind(owner)
                .fetch_all(self.gate.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, Source>("SELECT * FROM sources ORDER BY created_at ASC, id ASC")
                    .fetch_all(self.gate.pool())
                    .await?
            }
        };
        Ok(sources)
    }

    async fn begin_generation(&self, id: &str) -> Result<i64> {
        let mut tx = self.gate.begin().await?;
        let generation: Option<(i64,)> = sqlx::query_as(
            "UPDATE sources SET last_generation = last_generation + 1 WHERE id = ?
             RETURNING last_generation",
        )
        .bind(id)
        .fetch_optional(tx.conn())
        .await?;
        tx.commit().await?;

        generation
            .map(|(g,)| g)
            .ok_or_else(|| Self::not_found(id))
    }

    async fn record_sync_success(&self, id: &str, at: i64, total_entries: i64) -> Result<()> {
        let mut tx = self.gate.begin().await?;
        let result = sqlx::query(
            "UPDATE sources
             SET last_synced_at = ?, last_entry_count = ?, last_error = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(at)
        .bind(total_entries)
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

    async fn record_sync_error(&self, id: &str, at: i64, message: &str) -> Result<()> {
        let mut tx = self.gate.begin().await?;
        let result =
            sqlx::query("UPDATE sources SET last_error = ?, updated_at = ? WHERE id = ?")
                .bind(message)
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

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.gate.begin().await?;
        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(tx.conn())
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }
}
