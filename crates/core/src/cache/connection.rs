//! Store connection management with pragma configuration.
//!
//! Opens the SQLite database that backs every cache generation, applies the
//! pragmas the store relies on (WAL for concurrent readers, foreign keys for
//! cascading generation deletes), and runs migrations.

use super::migrations;
use crate::Error;
use std::path::Path;
use tokio_rusqlite::Connection;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Handle to the cache generation store.
///
/// Wraps a tokio-rusqlite Connection that runs database operations on a
/// background thread. Clones share that connection, so a store can be handed
/// to every in-flight request task.
#[derive(Clone, Debug)]
pub struct CacheStore {
    pub(crate) conn: Connection,
}

impl CacheStore {
    /// Open a store at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies pragmas, and runs any
    /// pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn).await
    }

    /// Open an in-memory store for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn).await
    }

    async fn prepare(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrations::run(&conn).await?;

        Ok(Self { conn })
    }
}
