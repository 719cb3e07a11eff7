//! Repository contract for persisted entities.
//!
//! The orchestration code only ever talks to `Arc<dyn Repository<T>>`.
//! Two implementations ship with the crate:
//! - [`MemoryRepository`]: process-local map, used by tests and embedders
//! - [`crate::db::SqliteRepository`]: SQLite-backed with an identity-map cache

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::{VmhostError, VmhostResult};

/// A persistable entity with a unique string id.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Storage discriminator (one per entity type).
    const KIND: &'static str;

    fn uid(&self) -> &str;
}

/// Storage contract shared by every entity type.
///
/// `remove` is a no-op for an absent id, for all entity types.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Fails `NotFound` if absent.
    async fn get_by_uid(&self, uid: &str) -> VmhostResult<T>;

    async fn list(&self) -> VmhostResult<Vec<T>>;

    /// Fails `Conflict` if an entity with the same id exists.
    async fn create(&self, entity: T) -> VmhostResult<T>;

    /// Fails `NotFound` if absent.
    async fn modify(&self, entity: T) -> VmhostResult<T>;

    async fn remove(&self, uid: &str) -> VmhostResult<()>;
}

pub type SharedRepository<T> = Arc<dyn Repository<T>>;

/// In-memory repository.
#[derive(Clone)]
pub struct MemoryRepository<T> {
    entities: Arc<RwLock<HashMap<String, T>>>,
}

impl<T> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self {
            entities: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<T: Entity> MemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRepository<T> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for MemoryRepository<T> {
    async fn get_by_uid(&self, uid: &str) -> VmhostResult<T> {
        self.entities
            .read()
            .get(uid)
            .cloned()
            .ok_or_else(|| VmhostError::NotFound(format!("{} {}", T::KIND, uid)))
    }

    async fn list(&self) -> VmhostResult<Vec<T>> {
        Ok(self.entities.read().values().cloned().collect())
    }

    async fn create(&self, entity: T) -> VmhostResult<T> {
        let mut entities = self.entities.write();
        if entities.contains_key(entity.uid()) {
            return Err(VmhostError::Conflict(format!(
                "{} {} already exists",
                T::KIND,
                entity.uid()
            )));
        }
        entities.insert(entity.uid().to_string(), entity.clone());
        Ok(entity)
    }

    async fn modify(&self, entity: T) -> VmhostResult<T> {
        let mut entities = self.entities.write();
        match entities.get_mut(entity.uid()) {
            Some(slot) => {
                *slot = entity.clone();
                Ok(entity)
            }
            None => Err(VmhostError::NotFound(format!(
                "{} {}",
                T::KIND,
                entity.uid()
            ))),
        }
    }

    async fn remove(&self, uid: &str) -> VmhostResult<()> {
        self.entities.write().remove(uid);
        Ok(())
    }
}
