//! Serialized write access to the store
//!
//! Every write in this process goes through one [`Writer`]. Holding its lock
//! keeps concurrent loads from racing each other for the SQLite write lock,
//! and `BEGIN IMMEDIATE` makes a writer in another process wait out
//! `busy_timeout` instead of failing on a lock upgrade.

use crate::error::Result;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::{Sqlite, Transaction};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone)]
pub(crate) struct Writer {
    pool: SqlitePool,
    lock: Arc<Mutex<()>>,
}

/// An open write transaction holding this process's write lock
pub(crate) struct WriteTx {
    // Declared first so the transaction is released before the lock
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl Writer {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub(crate) async fn begin(&self) -> Result<WriteTx> {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(WriteTx { tx, _guard: guard })
    }
}

impl WriteTx {
    pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub(crate) async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
