//! Database schema migrations.
//!
//! Each entry runs once, in order, tracked through `PRAGMA user_version`.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

const MIGRATIONS: &[&str] = &[
    // 1: samples and their embeddings
    r#"
    CREATE TABLE IF NOT EXISTS prescriptions (
        id TEXT PRIMARY KEY,
        file_id TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    -- Embeddings stored as little-endian f32 BLOBs, searched brute force
    CREATE TABLE IF NOT EXISTS embeddings (
        prescription_id TEXT PRIMARY KEY,
        embedding BLOB NOT NULL,
        FOREIGN KEY (prescription_id) REFERENCES prescriptions(id) ON DELETE CASCADE
    );
    "#,
    // 2: lookups by uploaded file
    r#"
    CREATE INDEX IF NOT EXISTS idx_prescriptions_file ON prescriptions(file_id);
    "#,
];

/// Bring the schema up to the latest version.
pub(super) fn run_migrations(conn: &mut Connection) -> ServiceResult<()> {
    let current: usize = conn
        .query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
        .map_err(DatabaseError::Query)?
        .try_into()
        .map_err(|_| DatabaseError::Migration {
            message: "negative schema version".to_string(),
        })?;

    if current > MIGRATIONS.len() {
        return Err(DatabaseError::Migration {
            message: format!(
                "database schema version {current} is newer than this build supports ({})",
                MIGRATIONS.len()
            ),
        }
        .into());
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current) {
        let version = index + 1;
        let tx = conn.transaction().map_err(DatabaseError::Query)?;
        tx.execute_batch(sql).map_err(|e| DatabaseError::Migration {
            message: format!("migration {version} failed: {e}"),
        })?;
        tx.pragma_update(None, "user_version", version as i64)
            .map_err(DatabaseError::Query)?;
        tx.commit().map_err(DatabaseError::Query)?;
        tracing::info!(version, "Applied database migration");
    }

    Ok(())
}
