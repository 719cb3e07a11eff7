//! Database layer for vmhost.
//!
//! SQLite persistence with a JSON blob per entity, keyed by `(kind, uid)`.
//! Creation and update timestamps sit next to the blob; listing is by `kind`.

mod schema;
mod store;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension};

use crate::errors::{VmhostError, VmhostResult};

pub use store::SqliteRepository;

/// Helper macro to convert rusqlite errors to VmhostError.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| VmhostError::Database(e.to_string()))
    };
}

pub(crate) use db_err;

/// SQLite database handle.
///
/// Thread-safe via `parking_lot::Mutex`. Entity repositories wrap this
/// to provide the [`crate::repo::Repository`] API.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database.
    pub fn open(db_path: &Path) -> VmhostResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = db_err!(Connection::open(db_path))?;
        Self::configure(&conn)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> VmhostResult<Self> {
        let conn = db_err!(Connection::open_in_memory())?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn configure(conn: &Connection) -> VmhostResult<()> {
        // WAL for concurrent readers; FULL sync for durability.
        db_err!(conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA busy_timeout=30000;
            "
        ))
    }

    fn init_schema(conn: &Connection) -> VmhostResult<()> {
        for sql in schema::all_schemas() {
            db_err!(conn.execute_batch(sql))?;
        }

        let current_version: Option<i32> = db_err!(
            conn.query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
        )?;

        match current_version {
            None => {
                let now = Utc::now().to_rfc3339();
                db_err!(conn.execute(
                    "INSERT INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)",
                    rusqlite::params![schema::SCHEMA_VERSION, now],
                ))?;
                tracing::info!(
                    "Initialized database schema version {}",
                    schema::SCHEMA_VERSION
                );
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(VmhostError::Database(format!(
                    "Database schema version {} is newer than supported {}. Please upgrade vmhost.",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }
}
