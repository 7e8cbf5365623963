//! Entity store: the durable home of canonical entities and call results.
//!
//! Backends implement [`EntityStore`] with blocking calls; the engine talks
//! to them through [`StoreHandle`], which moves every call onto the blocking
//! pool and applies the timeout/retry policy.
//!
//! Two writes carry the concurrency guarantees:
//! - [`EntityStore::insert_new`] is conditional on `(canonical_name,
//!   entity_type)` being unused and reports [`AppError::UniquenessConflict`]
//!   otherwise.
//! - [`EntityStore::append_occurrence`] applies one occurrence atomically,
//!   counters and alias included.
//!
//! Default methods return a "does not support" error so a read-only or
//! partial backend only implements what it needs.

pub mod handle;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::AppError;
use crate::model::{
    AppendOutcome, CanonicalEntity, ContactDetails, EntityResolutionResult, EntityType, Occurrence,
};

pub use handle::StoreHandle;
pub use memory::MemoryEntityStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEntityStore;

pub trait EntityStore: Send + Sync {
    /// Backend name used in logs and errors (e.g. `"sqlite"`).
    fn store_type(&self) -> &str;

    // ── Reads ─────────────────────────────────────────────────────────

    /// Exact-match lookup on the creation key.
    fn find_by_key(
        &self,
        canonical_name: &str,
        entity_type: EntityType,
    ) -> Result<Option<CanonicalEntity>, AppError>;

    fn get(&self, entity_id: &str) -> Result<Option<CanonicalEntity>, AppError>;

    /// Every entity of one type, ordered by `entity_id`.
    fn list_by_type(&self, entity_type: EntityType) -> Result<Vec<CanonicalEntity>, AppError>;

    /// Every entity, ordered by `entity_id`.
    fn list_all(&self) -> Result<Vec<CanonicalEntity>, AppError>;

    // ── Writes ────────────────────────────────────────────────────────

    fn insert_new(&self, entity: &CanonicalEntity) -> Result<(), AppError>;

    /// [`AppError::NotFound`] when `entity_id` does not exist.
    fn append_occurrence(
        &self,
        entity_id: &str,
        occurrence: &Occurrence,
        alias: Option<&str>,
    ) -> Result<AppendOutcome, AppError>;

    fn enrich(
        &self,
        _entity_id: &str,
        _details: &ContactDetails,
        _now: DateTime<Utc>,
    ) -> Result<CanonicalEntity, AppError> {
        Err(AppError::Store(format!(
            "store '{}' does not support enrich",
            self.store_type()
        )))
    }

    // ── Results ───────────────────────────────────────────────────────

    /// Persist a call result; a rerun of the same call replaces the earlier one.
    fn save_result(&self, _result: &EntityResolutionResult) -> Result<(), AppError> {
        Err(AppError::Store(format!(
            "store '{}' does not support save_result",
            self.store_type()
        )))
    }

    fn result_for_call(&self, _call_id: &str) -> Result<Option<EntityResolutionResult>, AppError> {
        Err(AppError::Store(format!(
            "store '{}' does not support result_for_call",
            self.store_type()
        )))
    }
}

/// Open the backend named in `config`.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn EntityStore>, AppError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryEntityStore::new())),
        #[cfg(feature = "sqlite")]
        StoreBackend::Sqlite => Ok(Arc::new(SqliteEntityStore::open(&config.path)?)),
        #[cfg(not(feature = "sqlite"))]
        StoreBackend::Sqlite => Err(AppError::Config(
            "store backend 'sqlite' requires the `sqlite` feature".into(),
        )),
    }
}
