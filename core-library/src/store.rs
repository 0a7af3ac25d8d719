//! Single-writer gate for catalog mutations
//!
//! Every multi-row write (a sync batch, an import upsert, a tombstone sweep)
//! runs inside a [`WriteTransaction`] obtained from [`WriteGate::begin`].
//! Writers queue on the gate instead of interleaving; readers use the pool
//! directly and, with WAL, only ever observe committed transactions.

use crate::Result;
use sqlx::{Pool, Sqlite, SqliteConnection, Transaction};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Serializes writers of one catalog store
#[derive(Clone)]
pub struct WriteGate {
    pool: Pool<Sqlite>,
    lock: Arc<Mutex<()>>,
}

impl WriteGate {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Pool for read-only queries
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Wait for the writer role, then open a transaction.
    ///
    /// The role is held until the transaction is committed or dropped;
    /// dropping without commit rolls back.
    pub async fn begin(&self) -> Result<WriteTransaction> {
        let guard = self.lock.clone().lock_owned().await;
        trace!("Write gate acquired");
        let tx = self.pool.begin().await?;
        Ok(WriteTransaction { tx, _guard: guard })
    }
}

/// Open write transaction holding the writer role
pub struct WriteTransaction {
    // Declared before the guard: the transaction finishes before the next
    // writer is admitted.
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl WriteTransaction {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        trace!("Write gate released");
        Ok(())
    }
}
