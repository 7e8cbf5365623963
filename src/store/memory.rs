//! `memory` store: process-local entity store.
//!
//! Entities, the creation-key index and results live behind one `Mutex`, so
//! the key check plus insert and every append are single critical sections.
//! Nothing survives the process.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::model::{
    AppendOutcome, CanonicalEntity, ContactDetails, EntityResolutionResult, EntityType, Occurrence,
};

use super::EntityStore;

#[derive(Default)]
struct Inner {
    /// entity_id -> entity
    entities: HashMap<String, CanonicalEntity>,
    /// (canonical_name, entity_type) -> entity_id
    keys: HashMap<(String, EntityType), String>,
    /// call_id -> latest result
    results: HashMap<String, EntityResolutionResult>,
}

pub struct MemoryEntityStore {
    inner: Mutex<Inner>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::StoreUnavailable("memory store lock poisoned".into()))
    }
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(mut entities: Vec<CanonicalEntity>) -> Vec<CanonicalEntity> {
    entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    entities
}

impl EntityStore for MemoryEntityStore {
    fn store_type(&self) -> &str {
        "memory"
    }

    fn find_by_key(
        &self,
        canonical_name: &str,
        entity_type: EntityType,
    ) -> Result<Option<CanonicalEntity>, AppError> {
        let inner = self.lock()?;
        Ok(inner
            .keys
            .get(&(canonical_name.to_string(), entity_type))
            .and_then(|id| inner.entities.get(id))
            .cloned())
    }

    fn get(&self, entity_id: &str) -> Result<Option<CanonicalEntity>, AppError> {
        Ok(self.lock()?.entities.get(entity_id).cloned())
    }

    fn list_by_type(&self, entity_type: EntityType) -> Result<Vec<CanonicalEntity>, AppError> {
        let inner = self.lock()?;
        Ok(sorted(
            inner
                .entities
                .values()
                .filter(|e| e.entity_type == entity_type)
                .cloned()
                .collect(),
        ))
    }

    fn list_all(&self) -> Result<Vec<CanonicalEntity>, AppError> {
        Ok(sorted(self.lock()?.entities.values().cloned().collect()))
    }

    fn insert_new(&self, entity: &CanonicalEntity) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        let key = (entity.canonical_name.clone(), entity.entity_type);
        if inner.keys.contains_key(&key) {
            return Err(AppError::UniquenessConflict {
                canonical_name: entity.canonical_name.clone(),
                entity_type: entity.entity_type.to_string(),
            });
        }
        if inner.entities.contains_key(&entity.entity_id) {
            return Err(AppError::Store(format!(
                "entity id {} already exists",
                entity.entity_id
            )));
        }
        inner.keys.insert(key, entity.entity_id.clone());
        inner
            .entities
            .insert(entity.entity_id.clone(), entity.clone());
        Ok(())
    }

    fn append_occurrence(
        &self,
        entity_id: &str,
        occurrence: &Occurrence,
        alias: Option<&str>,
    ) -> Result<AppendOutcome, AppError> {
        let mut inner = self.lock()?;
        let entity = inner
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| AppError::NotFound(format!("entity {entity_id}")))?;
        Ok(entity.record(occurrence.clone(), alias))
    }

    fn enrich(
        &self,
        entity_id: &str,
        details: &ContactDetails,
        now: DateTime<Utc>,
    ) -> Result<CanonicalEntity, AppError> {
        let mut inner = self.lock()?;
        let entity = inner
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| AppError::NotFound(format!("entity {entity_id}")))?;
        entity.enrich(details, now);
        Ok(entity.clone())
    }

    fn save_result(&self, result: &EntityResolutionResult) -> Result<(), AppError> {
        self.lock()?
            .results
            .insert(result.call_id.clone(), result.clone());
        Ok(())
    }

    fn result_for_call(&self, call_id: &str) -> Result<Option<EntityResolutionResult>, AppError> {
        Ok(self.lock()?.results.get(call_id).cloned())
    }
}
