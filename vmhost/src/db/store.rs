//! SQLite-backed repository with an identity-map cache.

use std::collections::HashMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rusqlite::OptionalExtension;

use super::{Database, db_err};
use crate::errors::{VmhostError, VmhostResult};
use crate::repo::{Entity, Repository};

/// Repository storing one entity type as JSON blobs.
///
/// # Design
///
/// - **Database-first**: every write hits SQLite before the cache
/// - **Identity map**: reads are served from the cache once loaded;
///   `modify` replaces the cached value and `remove` evicts it
/// - **Shared connection**: all repositories opened from one `Database`
///   serialize on its connection mutex
pub struct SqliteRepository<T> {
    db: Database,
    cache: RwLock<HashMap<String, T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> SqliteRepository<T> {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cache: RwLock::new(HashMap::new()),
            _marker: PhantomData,
        }
    }

    fn load(&self, uid: &str) -> VmhostResult<Option<T>> {
        let conn = self.db.conn();
        let data: Option<String> = db_err!(
            conn.query_row(
                "SELECT data FROM entities WHERE kind = ?1 AND uid = ?2",
                rusqlite::params![T::KIND, uid],
                |row| row.get(0),
            )
            .optional()
        )?;

        data.map(|json| serde_json::from_str(&json).map_err(VmhostError::from))
            .transpose()
    }

    fn exists(&self, uid: &str) -> VmhostResult<bool> {
        if self.cache.read().contains_key(uid) {
            return Ok(true);
        }
        Ok(self.load(uid)?.is_some())
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for SqliteRepository<T> {
    async fn get_by_uid(&self, uid: &str) -> VmhostResult<T> {
        if let Some(entity) = self.cache.read().get(uid) {
            return Ok(entity.clone());
        }

        let entity = self
            .load(uid)?
            .ok_or_else(|| VmhostError::NotFound(format!("{} {}", T::KIND, uid)))?;

        self.cache.write().insert(uid.to_string(), entity.clone());
        Ok(entity)
    }

    async fn list(&self) -> VmhostResult<Vec<T>> {
        let rows: Vec<String> = {
            let conn = self.db.conn();
            let mut stmt = db_err!(conn.prepare(
                "SELECT data FROM entities WHERE kind = ?1 ORDER BY created_at"
            ))?;
            let rows = db_err!(stmt.query_map([T::KIND], |row| row.get::<_, String>(0)))?;
            db_err!(rows.collect::<Result<Vec<_>, _>>())?
        };

        let mut entities = Vec::with_capacity(rows.len());
        let mut cache = self.cache.write();
        for json in rows {
            let entity: T = serde_json::from_str(&json)?;
            cache.insert(entity.uid().to_string(), entity.clone());
            entities.push(entity);
        }
        Ok(entities)
    }

    async fn create(&self, entity: T) -> VmhostResult<T> {
        if self.exists(entity.uid())? {
            return Err(VmhostError::Conflict(format!(
                "{} {} already exists",
                T::KIND,
                entity.uid()
            )));
        }

        let json = serde_json::to_string(&entity)?;
        let now = Utc::now().to_rfc3339();
        {
            let conn = self.db.conn();
            db_err!(conn.execute(
                "INSERT INTO entities (kind, uid, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![T::KIND, entity.uid(), json, now],
            ))?;
        }

        tracing::trace!(kind = T::KIND, uid = %entity.uid(), "Entity created");
        self.cache
            .write()
            .insert(entity.uid().to_string(), entity.clone());
        Ok(entity)
    }

    async fn modify(&self, entity: T) -> VmhostResult<T> {
        let json = serde_json::to_string(&entity)?;
        let now = Utc::now().to_rfc3339();
        let updated = {
            let conn = self.db.conn();
            db_err!(conn.execute(
                "UPDATE entities SET data = ?3, updated_at = ?4 WHERE kind = ?1 AND uid = ?2",
                rusqlite::params![T::KIND, entity.uid(), json, now],
            ))?
        };

        if updated == 0 {
            self.cache.write().remove(entity.uid());
            return Err(VmhostError::NotFound(format!(
                "{} {}",
                T::KIND,
                entity.uid()
            )));
        }

        self.cache
            .write()
            .insert(entity.uid().to_string(), entity.clone());
        Ok(entity)
    }

    async fn remove(&self, uid: &str) -> VmhostResult<()> {
        {
            let conn = self.db.conn();
            db_err!(conn.execute(
                "DELETE FROM entities WHERE kind = ?1 AND uid = ?2",
                rusqlite::params![T::KIND, uid],
            ))?;
        }

        tracing::trace!(kind = T::KIND, uid = %uid, "Entity removed");
        self.cache.write().remove(uid);
        Ok(())
    }
}
