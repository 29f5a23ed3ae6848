//! Store schema migrations.
//!
//! Applied versions are recorded in a `_migrations` table; each pending
//! migration runs in its own transaction together with its version row.

use super::Error;
use tokio_rusqlite::{Connection, params};

/// Migration list: (version, SQL), in ascending version order.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_generations.sql"))];

/// Run any pending migrations.
///
/// # Errors
///
/// Returns `Error::MigrationFailed` if a migration's SQL fails; earlier
/// migrations stay applied.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    let applied = conn
        .call(|conn| -> Result<usize, Error> {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS _migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                )",
                [],
            )?;

            let current: i64 =
                conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

            let mut applied = 0;
            for (version, sql) in MIGRATIONS.iter().filter(|(version, _)| *version > current) {
                let tx = conn.transaction()?;
                tx.execute_batch(sql)
                    .map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
                tx.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version, chrono::Utc::now().to_rfc3339()],
                )?;
                tx.commit()?;
                applied += 1;
            }

            Ok(applied)
        })
        .await
        .map_err(Error::from)?;

    if applied > 0 {
        tracing::info!(applied, "applied store migrations");
    }

    Ok(())
}
