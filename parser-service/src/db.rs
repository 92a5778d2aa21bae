//! Database module for SQLite operations.
//!
//! Validated sample prescriptions and their embeddings are kept in a single
//! SQLite file. Similarity search is brute force over every stored vector,
//! which is fine for the few hundred exemplars a deployment accumulates.

mod migrations;
mod samples;

use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{DatabaseError, ServiceError, ServiceResult};
use crate::models::{Prescription, SamplePrescription};

/// Persistence for validated exemplars
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// The `k` stored samples most similar to `embedding`, best first
    async fn nearest(&self, embedding: &[f32], k: usize) -> ServiceResult<Vec<SamplePrescription>>;

    /// Store a validated document with its embedding
    async fn save(
        &self,
        content_type: &str,
        locator: &str,
        document: &Prescription,
        embedding: &[f32],
    ) -> ServiceResult<SamplePrescription>;
}

/// Database manager for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> ServiceResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ServiceError::Database(DatabaseError::Connection(
                    rusqlite::Error::ToSqlConversionFailure(Box::new(e)),
                ))
            })?;
        }

        let conn = Connection::open(path).map_err(DatabaseError::Connection)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;

        Self::with_connection(conn)
    }

    /// In-memory database, used by tests
    #[cfg(test)]
    pub fn open_in_memory() -> ServiceResult<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Connection)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> ServiceResult<Self> {
        migrations::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> ServiceResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ServiceError::Database(DatabaseError::LockPoisoned))
    }
}
