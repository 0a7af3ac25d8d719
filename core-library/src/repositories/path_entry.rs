//! Path catalog trait and implementation
//!
//! The catalog holds one row per file or directory beneath a source root.
//! Rows are written in batches, each batch in one transaction together with
//! the matching `path_entries_fts` rows, so readers never see a half-applied
//! batch or an index row that disagrees with its catalog row.

use crate::error::{LibraryError, Result};
use crate::models::PathEntry;
use crate::store::{WriteGate, WriteTransaction};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Entry seen by a run but not re-read (not materialized, unreadable, or
/// skipped); its catalog rows keep the run's generation instead of being
/// tombstoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedPath {
    pub path_id: String,
    pub relative_path: String,
    /// Also retain every descendant (used when a directory listing failed)
    pub subtree: bool,
}

/// One transactional unit of a sync run
#[derive(Debug, Clone, Default)]
pub struct CatalogBatch {
    pub source_id: String,
    pub generation: i64,
    /// Entries to upsert; parents must precede their children
    pub entries: Vec<PathEntry>,
    pub retained: Vec<RetainedPath>,
}

impl CatalogBatch {
    pub fn new(source_id: impl Into<String>, generation: i64) -> Self {
        Self {
            source_id: source_id.into(),
            generation,
            entries: Vec::new(),
            retained: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len() + self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.retained.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub upserted: u64,
    /// Existing rows re-tagged through `retained`
    pub retained: u64,
}

/// Path catalog interface
#[async_trait]
pub trait PathCatalog: Send + Sync {
    /// Upsert entries and re-tag retained rows in one transaction
    ///
    /// # Errors
    /// Returns error if an entry fails validation, belongs to another
    /// source or generation, or references a parent that is not cataloged.
    async fn apply_batch(&self, batch: &CatalogBatch) -> Result<BatchOutcome>;

    /// Delete every row of the source older than `generation`
    ///
    /// Index rows follow through the delete trigger.
    async fn remove_stale(&self, source_id: &str, generation: i64) -> Result<u64>;

    async fn find(&self, source_id: &str, path_id: &str) -> Result<Option<PathEntry>>;

    async fn find_by_relative_path(
        &self,
        source_id: &str,
        relative_path: &str,
    ) -> Result<Option<PathEntry>>;

    /// Children of `parent_path_id` (top level when `None`), directories
    /// first, then by name
    async fn list(&self, source_id: &str, parent_path_id: Option<&str>)
        -> Result<Vec<PathEntry>>;

    /// Every cataloged file of the source ordered by relative path
    async fn list_files(&self, source_id: &str) -> Result<Vec<PathEntry>>;

    async fn count(&self, source_id: &str) -> Result<i64>;
}

/// SQLite implementation of PathCatalog
pub struct SqlitePathCatalog {
    gate: WriteGate,
}

impl SqlitePathCatalog {
    pub fn new(gate: WriteGate) -> Self {
        Self { gate }
    }

    fn check_batch(batch: &CatalogBatch) -> Result<()> {
        for entry in &batch.entries {
            entry
                .validate()
                .map_err(|msg| LibraryError::invalid("PathEntry", msg))?;

            if entry.source_id != batch.source_id || entry.generation != batch.generation {
                return Err(LibraryError::Integrity(format!(
                    "entry {} does not belong to source {} generation {}",
                    entry.relative_path, batch.source_id, batch.generation
                )));
            }
        }
        Ok(())
    }

    async fn upsert_entry(tx: &mut WriteTransaction, entry: &PathEntry) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO path_entries (
                source_id, path_id, parent_path_id, name, relative_path,
                is_directory, content_hash, generation
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id, path_id) DO UPDATE SET
                parent_path_id = excluded.parent_path_id,
                name = excluded.name,
                relative_path = excluded.relative_path,
                is_directory = excluded.is_directory,
                content_hash = excluded.content_hash,
                generation = excluded.generation
            RETURNING id
            "#,
        )
        .bind(&entry.source_id)
        .bind(&entry.path_id)
        .bind(&entry.parent_path_id)
        .bind(&entry.name)
        .bind(&entry.relative_path)
        .bind(entry.is_directory)
        .bind(&entry.content_hash)
        .bind(entry.generation)
        .fetch_one(tx.conn())
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                LibraryError::Integrity(format!(
                    "parent of {} is not cataloged",
                    entry.relative_path
                ))
            }
            _ => LibraryError::Database(e),
        })?;

        sqlx::query("DELETE FROM path_entries_fts WHERE rowid = ?")
            .bind(id)
            .execute(tx.conn())
            .await?;
        sqlx::query("INSERT INTO path_entries_fts (rowid, name, relative_path) VALUES (?, ?, ?)")
            .bind(id)
            .bind(&entry.name)
            .bind(&entry.relative_path)
            .execute(tx.conn())
            .await?;

        Ok(id)
    }

    async fn retain(
        tx: &mut WriteTransaction,
        source_id: &str,
        generation: i64,
        retained: &RetainedPath,
    ) -> Result<u64> {
        let mut affected = sqlx::query(
            "UPDATE path_entries SET generation = ? WHERE source_id = ? AND path_id = ?",
        )
        .bind(generation)
        .bind(source_id)
        .bind(&retained.path_id)
        .execute(tx.conn())
        .await?
        .rows_affected();

        if retained.subtree {
            // Exact prefix match; LIKE would fold ASCII case.
            let prefix = format!("{}/", retained.relative_path);
            affected += sqlx::query(
                "UPDATE path_entries SET generation = ?
                 WHERE source_id = ? AND substr(relative_path, 1, length(?)) = ?",
            )
            .bind(generation)
            .bind(source_id)
            .bind(&prefix)
            .bind(&prefix)
            .execute(tx.conn())
            .await?
            .rows_affected();
        }

        Ok(affected)
    }
}

#[async_trait]
impl PathCatalog for SqlitePathCatalog {
    #[instrument(skip(self, batch), fields(source_id = %batch.source_id, generation = batch.generation, size = batch.len()))]
    async fn apply_batch(&self, batch: &CatalogBatch) -> Result<BatchOutcome> {
        Self::check_batch(batch)?;
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut tx = self.gate.begin().await?;
        let mut outcome = BatchOutcome::default();

        for entry in &batch.entries {
            Self::upsert_entry(&mut tx, entry).await?;
            outcome.upserted += 1;
        }
        for retained in &batch.retained {
            outcome.retained +=
                Self::retain(&mut tx, &batch.source_id, batch.generation, retained).await?;
        }

        tx.commit().await?;
        debug!(
            upserted = outcome.upserted,
            retained = outcome.retained,
            "Catalog batch committed"
        );
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn remove_stale(&self, source_id: &str, generation: i64) -> Result<u64> {
        let mut tx = self.gate.begin().await?;
        // Counted up front: rows removed by the parent cascade are not
        // reported in the statement's change count.
        let (removed,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM path_entries WHERE source_id = ? AND generation < ?",
        )
        .bind(source_id)
        .bind(generation)
        .fetch_one(tx.conn())
        .await?;
        sqlx::query("DELETE FROM path_entries WHERE source_id = ? AND generation < ?")
            .bind(source_id)
            .bind(generation)
            .execute(tx.conn())
            .await?;
        tx.commit().await?;
        let removed = removed as u64;

        debug!(removed, "Stale catalog rows removed");
        Ok(removed)
    }

    async fn find(&self, source_id: &str, path_id: &str) -> Result<Option<PathEntry>> {
        let entry = sqlx::query_as::<_, PathEntry>(
            "SELECT * FROM path_entries WHERE source_id = ? AND path_id = ?",
        )
        .bind(source_id)
        .bind(path_id)
        .fetch_optional(self.gate.pool())
        .await?;
        Ok(entry)
    }

    async fn find_by_relative_path(
        &self,
        source_id: &str,
        relative_path: &str,
    ) -> Result<Option<PathEntry>> {
        let entry = sqlx::query_as::<_, PathEntry>(
            "SELECT * FROM path_entries WHERE source_id = ? AND relative_path = ?",
        )
        .bind(source_id)
        .bind(relative_path)
        .fetch_optional(self.gate.pool())
        .await?;
        Ok(entry)
    }

    async fn list(
        &self,
        source_id: &str,
        parent_path_id: Option<&str>,
    ) -> Result<Vec<PathEntry>> {
        let entries = sqlx::query_as::<_, PathEntry>(
            r#"
            SELECT * FROM path_entries
            WHERE source_id = ? AND parent_path_id IS ?
            ORDER BY is_directory DESC, name COLLATE NOCASE ASC, id ASC
            "#,
        )
        .bind(source_id)
        .bind(parent_path_id)
        .fetch_all(self.gate.pool())
        .await?;
        Ok(entries)
    }

    async fn list_files(&self, source_id: &str) -> Result<Vec<PathEntry>> {
        let entries = sqlx::query_as::<_, PathEntry>(
            "SELECT * FROM path_entries WHERE source_id = ? AND is_directory = 0
             ORDER BY relative_path ASC",
        )
        .bind(source_id)
        .fetch_all(self.gate.pool())
        .await?;
        Ok(entries)
    }

    async fn count(&self, source_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM path_entries WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(self.gate.pool())
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::Source;
    use crate::repositories::{SourceRepository, SqliteSourceRepository};
    use std::path::Path;

    struct Fixture {
        catalog: SqlitePathCatalog,
        sources: SqliteSourceRepository,
        gate: WriteGate,
        source: Source,
    }

    async fn setup() -> Fixture {
        let gate = WriteGate::new(create_test_pool().await.unwrap());
        let sources = SqliteSourceRepository::new(gate.clone());
        let source = Source::new(Path::new("/music"), "owner", 1);
        sources.insert(&source).await.unwrap();
        Fixture {
            catalog: SqlitePathCatalog::new(gate.clone()),
            sources,
            gate,
            source,
        }
    }

    fn entry(source: &Source, rel: &str, dir: bool, generation: i64) -> PathEntry {
        PathEntry::observed(
            &source.id,
            source.root(),
            &source.root().join(rel),
            dir,
            (!dir).then(|| "hash".to_string()),
            generation,
        )
        .unwrap()
    }

    fn tree(source: &Source, generation: i64) -> CatalogBatch {
        let mut batch = CatalogBatch::new(&source.id, generation);
        batch.entries = vec![
            entry(source, "A", true, generation),
            entry(source, "B", true, generation),
            entry(source, "A/song1.mp3", false, generation),
            entry(source, "B/song2.mp3", false, generation),
        ];
        batch
    }

    async fn fts_rows(gate: &WriteGate) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM path_entries_fts")
            .fetch_one(gate.pool())
            .await
            .unwrap();
        count
    }

    #[tokio::test]
    async fn test_apply_batch_is_idempotent() {
        let f = setup().await;

        let first = f.catalog.apply_batch(&tree(&f.source, 1)).await.unwrap();
        assert_eq!(first.upserted, 4);
        let ids: Vec<i64> = f
            .catalog
            .list_files(&f.source.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();

        f.catalog.apply_batch(&tree(&f.source, 2)).await.unwrap();
        assert_eq!(f.catalog.count(&f.source.id).await.unwrap(), 4);
        assert_eq!(f.catalog.remove_stale(&f.source.id, 2).await.unwrap(), 0);

        let again: Vec<i64> = f
            .catalog
            .list_files(&f.source.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, again, "row ids survive an upsert");
        assert_eq!(fts_rows(&f.gate).await, 4);
    }

    #[tokio::test]
    async fn test_remove_stale_cascades_index_rows() {
        let f = setup().await;
        f.catalog.apply_batch(&tree(&f.source, 1)).await.unwrap();

        let mut second = CatalogBatch::new(&f.source.id, 2);
        second.entries = vec![
            entry(&f.source, "A", true, 2),
            entry(&f.source, "A/song1.mp3", false, 2),
        ];
        f.catalog.apply_batch(&second).await.unwrap();

        assert_eq!(f.catalog.remove_stale(&f.source.id, 2).await.unwrap(), 2);
        assert!(f
            .catalog
            .find_by_relative_path(&f.source.id, "B/song2.mp3")
            .await
            .unwrap()
            .is_none());
        assert!(f
            .catalog
            .find_by_relative_path(&f.source.id, "A/song1.mp3")
            .await
            .unwrap()
            .is_some());
        assert_eq!(fts_rows(&f.gate).await, 2);
    }

    #[tokio::test]
    async fn test_retained_subtree_survives_tombstoning() {
        let f = setup().await;
        f.catalog.apply_batch(&tree(&f.source, 1)).await.unwrap();

        let b = entry(&f.source, "B", true, 2);
        let mut second = CatalogBatch::new(&f.source.id, 2);
        second.entries = vec![entry(&f.source, "A", true, 2)];
        second.retained = vec![RetainedPath {
            path_id: b.path_id.clone(),
            relative_path: "B".to_string(),
            subtree: true,
        }];

        let outcome = f.catalog.apply_batch(&second).await.unwrap();
        assert_eq!(outcome.retained, 2);

        f.catalog.remove_stale(&f.source.id, 2).await.unwrap();
        let remaining: Vec<String> = f
            .catalog
            .list_files(&f.source.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.relative_path)
            .collect();
        assert_eq!(remaining, vec!["B/song2.mp3".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_parent_is_rejected() {
        let f = setup().await;
        let mut batch = CatalogBatch::new(&f.source.id, 1);
        batch.entries = vec![entry(&f.source, "A/song1.mp3", false, 1)];

        let result = f.catalog.apply_batch(&batch).await;
        assert!(matches!(result, Err(LibraryError::Integrity(_))));
        assert_eq!(f.catalog.count(&f.source.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_foreign_generation_is_rejected() {
        let f = setup().await;
        let mut batch = CatalogBatch::new(&f.source.id, 2);
        batch.entries = vec![entry(&f.source, "A", true, 1)];

        assert!(matches!(
            f.catalog.apply_batch(&batch).await,
            Err(LibraryError::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn test_list_orders_directories_first() {
        let f = setup().await;
        let mut batch = CatalogBatch::new(&f.source.id, 1);
        batch.entries = vec![
            entry(&f.source, "b.mp3", false, 1),
            entry(&f.source, "Zed", true, 1),
            entry(&f.source, "alpha", true, 1),
            entry(&f.source, "alpha/inner.mp3", false, 1),
        ];
        f.catalog.apply_batch(&batch).await.unwrap();

        let top: Vec<String> = f
            .catalog
            .list(&f.source.id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(top, vec!["alpha", "Zed", "b.mp3"]);

        let alpha = f
            .catalog
            .find_by_relative_path(&f.source.id, "alpha")
            .await
            .unwrap()
            .unwrap();
        let children = f
            .catalog
            .list(&f.source.id, Some(&alpha.path_id))
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "inner.mp3");
    }

    #[tokio::test]
    async fn test_source_delete_cascades() {
        let f = setup().await;
        f.catalog.apply_batch(&tree(&f.source, 1)).await.unwrap();

        assert!(f.sources.delete(&f.source.id).await.unwrap());
        assert_eq!(f.catalog.count(&f.source.id).await.unwrap(), 0);
        assert_eq!(fts_rows(&f.gate).await, 0);
    }
}
