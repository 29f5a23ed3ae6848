//! Generation lifecycle and entry operations.
//!
//! A generation is a named set of stored responses. The store keeps any
//! number of them; which one is current is decided by the caller, never by
//! the store itself.

use super::connection::CacheStore;
use super::response::StoredResponse;
use crate::{Error, RequestIdentity};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};

/// Opaque name of a cache generation, unique per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(String);

impl GenerationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an id from a name prefix and a build timestamp, e.g. `site-1768123469`.
    pub fn from_build(prefix: &str, timestamp: i64) -> Self {
        Self(format!("{prefix}-{timestamp}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GenerationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for GenerationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Name, size and creation time of a stored generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub name: String,
    pub entries: u64,
    pub created_at: String,
}

/// Handle to one named generation in a [`CacheStore`].
///
/// Holding a handle does not keep the generation alive: if it is deleted,
/// lookups miss and writes fail.
#[derive(Clone, Debug)]
pub struct Generation {
    store: CacheStore,
    id: GenerationId,
}

impl CacheStore {
    /// Handle to a generation without creating it.
    pub fn generation(&self, id: &GenerationId) -> Generation {
        Generation { store: self.clone(), id: id.clone() }
    }

    /// Open a generation, creating it if absent.
    pub async fn open_generation(&self, id: &GenerationId) -> Result<Generation, Error> {
        let name = id.as_str().to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
                    params![name, chrono::Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        Ok(self.generation(id))
    }

    /// Whether a generation with this name exists.
    pub async fn has(&self, id: &GenerationId) -> Result<bool, Error> {
        let name = id.as_str().to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists =
                    conn.query_row("SELECT EXISTS(SELECT 1 FROM generations WHERE name = ?1)", params![name], |row| {
                        row.get(0)
                    })?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Names of every stored generation, oldest first.
    pub async fn keys(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM generations ORDER BY created_at ASC, name ASC")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, rusqlite::Error>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a generation and all of its entries.
    ///
    /// Returns false if no generation had that name.
    pub async fn delete(&self, id: &GenerationId) -> Result<bool, Error> {
        let name = id.as_str().to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM generations WHERE name = ?1", params![name])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Every generation with its entry count, oldest first.
    pub async fn summaries(&self) -> Result<Vec<GenerationSummary>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<GenerationSummary>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT g.name, g.created_at, COUNT(e.key)
                     FROM generations g LEFT JOIN entries e ON e.generation = g.name
                     GROUP BY g.name
                     ORDER BY g.created_at ASC, g.name ASC",
                )?;
                let summaries = stmt
                    .query_map([], |row| {
                        Ok(GenerationSummary {
                            name: row.get(0)?,
                            created_at: row.get(1)?,
                            entries: row.get::<_, i64>(2)? as u64,
                        })
                    })?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(summaries)
            })
            .await
            .map_err(Error::from)
    }
}

/// Columns of an entry row before the headers are decoded.
type EntryRow = (String, u16, Option<String>, String, Vec<u8>, String);

impl Generation {
    pub fn id(&self) -> &GenerationId {
        &self.id
    }

    /// Look up the stored response for a request.
    pub async fn match_request(&self, request: &RequestIdentity) -> Result<Option<StoredResponse>, Error> {
        let name = self.id.as_str().to_string();
        let key = request.key();
        let row = self
            .store
            .conn
            .call(move |conn| -> Result<Option<EntryRow>, Error> {
                let row = conn
                    .query_row(
                        "SELECT url, status, content_type, headers_json, body, fetched_at
                         FROM entries WHERE generation = ?1 AND key = ?2",
                        params![name, key],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(Error::from)?;

        let Some((url, status, content_type, headers_json, body, fetched_at)) = row else {
            return Ok(None);
        };

        Ok(Some(StoredResponse {
            url,
            status,
            content_type,
            headers: serde_json::from_str(&headers_json)?,
            body,
            fetched_at,
        }))
    }

    /// Store a response under a request, replacing any earlier entry.
    ///
    /// Fails if the generation no longer exists.
    pub async fn put(&self, request: &RequestIdentity, response: &StoredResponse) -> Result<(), Error> {
        let name = self.id.as_str().to_string();
        let row = EntryInsert::new(request, response)?;
        self.store
            .conn
            .call(move |conn| -> Result<(), Error> {
                row.execute(conn, &name)?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Create the generation if needed and store every entry in one transaction.
    ///
    /// Either all entries are written or none are. Returns the number written.
    pub async fn put_all(&self, entries: Vec<(RequestIdentity, StoredResponse)>) -> Result<usize, Error> {
        let name = self.id.as_str().to_string();
        let rows = entries
            .iter()
            .map(|(request, response)| EntryInsert::new(request, response))
            .collect::<Result<Vec<_>, Error>>()?;

        self.store
            .conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
                    params![name, chrono::Utc::now().to_rfc3339()],
                )?;
                for row in &rows {
                    row.execute(&tx, &name)?;
                }
                tx.commit()?;
                Ok(rows.len())
            })
            .await
            .map_err(Error::from)
    }

    /// Number of entries in this generation.
    pub async fn len(&self) -> Result<u64, Error> {
        let name = self.id.as_str().to_string();
        self.store
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM entries WHERE generation = ?1", params![name], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len().await? == 0)
    }
}

/// Owned column values for one entry upsert.
struct EntryInsert {
    key: String,
    method: String,
    request_url: String,
    url: String,
    status: u16,
    content_type: Option<String>,
    headers_json: String,
    body: Vec<u8>,
    fetched_at: String,
}

impl EntryInsert {
    fn new(request: &RequestIdentity, response: &StoredResponse) -> Result<Self, Error> {
        Ok(Self {
            key: request.key(),
            method: request.method().to_string(),
            request_url: request.url().to_string(),
            url: response.url.clone(),
            status: response.status,
            content_type: response.content_type.clone(),
            headers_json: serde_json::to_string(&response.headers)?,
            body: response.body.clone(),
            fetched_at: response.fetched_at.clone(),
        })
    }

    fn execute(&self, conn: &rusqlite::Connection, generation: &str) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO entries (
                generation, key, method, url, status, content_type,
                headers_json, body, fetched_at, stored_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(generation, key) DO UPDATE SET
                url = excluded.url,
                status = excluded.status,
                content_type = excluded.content_type,
                headers_json = excluded.headers_json,
                body = excluded.body,
                fetched_at = excluded.fetched_at,
                stored_at = excluded.stored_at",
            params![
                generation,
                &self.key,
                &self.method,
                &self.url,
                self.status,
                &self.content_type,
                &self.headers_json,
                &self.body,
                &self.fetched_at,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        tracing::trace!(generation, method = %self.method, url = %self.request_url, "stored entry");
        Ok(())
    }
}
