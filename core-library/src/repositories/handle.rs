//! Stored access handle repository

use crate::error::Result;
use crate::models::StoredHandle;
use crate::store::WriteGate;
use async_trait::async_trait;

/// Persistence for opaque access handles, keyed by location hash
#[async_trait]
pub trait HandleRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredHandle>>;

    /// Insert or replace the handle stored under `handle.key`
    async fn put(&self, handle: &StoredHandle) -> Result<()>;

    /// # Returns
    /// - `Ok(true)` if a handle was removed
    async fn delete(&self, key: &str) -> Result<bool>;
}

pub struct SqliteHandleRepository {
    gate: WriteGate,
}

impl SqliteHandleRepository {
    pub fn new(gate: WriteGate) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl HandleRepository for SqliteHandleRepository {
    async fn get(&self, key: &str) -> Result<Option<StoredHandle>> {
        let handle =
            sqlx::query_as::<_, StoredHandle>("SELECT * FROM access_handles WHERE key = ?")
                .bind(key)
                .fetch_optional(self.gate.pool())
                .await?;
        Ok(handle)
    }

    async fn put(&self, handle: &StoredHandle) -> Result<()> {
        let mut tx = self.gate.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO access_handles (key, location, blob, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                location = excluded.location,
                blob = excluded.blob,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&handle.key)
        .bind(&handle.location)
        .bind(&handle.blob)
        .bind(handle.updated_at)
        .execute(tx.conn())
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut tx = self.gate.begin().await?;
        let result = sqlx::query("DELETE FROM access_handles WHERE key = ?")
            .bind(key)
            .execute(tx.conn())
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::location_key;
    use std::path::Path;

    #[tokio::test]
    async fn test_put_replaces_blob() {
        let repo = SqliteHandleRepository::new(WriteGate::new(create_test_pool().await.unwrap()));

        let handle = StoredHandle::new(Path::new("/music/a.mp3"), vec![1, 2, 3], 1);
        assert_eq!(handle.key, location_key(Path::new("/music/a.mp3")));
        repo.put(&handle).await.unwrap();

        let renewed = StoredHandle::new(Path::new("/music/./a.mp3"), vec![9], 2);
        repo.put(&renewed).await.unwrap();

        let stored = repo.get(&handle.key).await.unwrap().unwrap();
        assert_eq!(stored.blob, vec![9]);
        assert_eq!(stored.location, "/music/a.mp3");
        assert_eq!(stored.updated_at, 2);

        assert!(repo.delete(&handle.key).await.unwrap());
        assert!(repo.get(&handle.key).await.unwrap().is_none());
        assert!(!repo.delete(&handle.key).await.unwrap());
    }
}
