//! [`StoreHandle`]: async access to an [`EntityStore`].
//!
//! Every call runs on `tokio::task::spawn_blocking` under a per-operation
//! timeout.  Transient failures ([`AppError::StoreUnavailable`], timeouts)
//! are retried with exponential backoff until `max_attempts` is reached;
//! every other error is returned on the first attempt.
//!
//! A timed-out write may still commit on the blocking pool.  Retrying it is
//! safe: a repeated insert reports a uniqueness conflict, which the engine
//! resolves by finding the entity it created, and a repeated append reports
//! [`AppendOutcome::AlreadyRecorded`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::StoreConfig;
use crate::error::AppError;
use crate::model::{
    AppendOutcome, CanonicalEntity, ContactDetails, EntityResolutionResult, EntityType, Occurrence,
};

use super::EntityStore;

/// Cheaply cloneable (`Arc`-backed) handle shared by every resolution task.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn EntityStore>,
    op_timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn EntityStore>, config: &StoreConfig) -> Self {
        Self {
            store,
            op_timeout: config.op_timeout,
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
        }
    }

    pub fn store_type(&self) -> &str {
        self.store.store_type()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: Fn(&dyn EntityStore) -> Result<T, AppError> + Clone + Send + 'static,
    {
        let mut attempt = 1;
        loop {
            let store = Arc::clone(&self.store);
            let f = f.clone();
            let task = tokio::task::spawn_blocking(move || f(store.as_ref()));

            let outcome = match tokio::time::timeout(self.op_timeout, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(AppError::Store(format!("{op} join: {e}"))),
                Err(_) => Err(AppError::StoreUnavailable(format!(
                    "{op} timed out after {} ms",
                    self.op_timeout.as_millis()
                ))),
            };

            match outcome {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        op,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "store operation failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub async fn find_by_key(
        &self,
        canonical_name: &str,
        entity_type: EntityType,
    ) -> Result<Option<CanonicalEntity>, AppError> {
        let name = canonical_name.to_string();
        self.run("find_by_key", move |s| s.find_by_key(&name, entity_type))
            .await
    }

    pub async fn get(&self, entity_id: &str) -> Result<Option<CanonicalEntity>, AppError> {
        let id = entity_id.to_string();
        self.run("get", move |s| s.get(&id)).await
    }

    pub async fn list_by_type(&self, entity_type: EntityType) -> Result<Vec<CanonicalEntity>, AppError> {
        self.run("list_by_type", move |s| s.list_by_type(entity_type))
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<CanonicalEntity>, AppError> {
        self.run("list_all", |s| s.list_all()).await
    }

    pub async fn result_for_call(&self, call_id: &str) -> Result<Option<EntityResolutionResult>, AppError> {
        let call_id = call_id.to_string();
        self.run("result_for_call", move |s| s.result_for_call(&call_id))
            .await
    }

    // ── Writes ────────────────────────────────────────────────────────

    pub async fn insert_new(&self, entity: CanonicalEntity) -> Result<(), AppError> {
        let entity = Arc::new(entity);
        self.run("insert_new", move |s| s.insert_new(&entity)).await
    }

    pub async fn append_occurrence(
        &self,
        entity_id: &str,
        occurrence: Occurrence,
        alias: Option<String>,
    ) -> Result<AppendOutcome, AppError> {
        let id = entity_id.to_string();
        let occurrence = Arc::new(occurrence);
        self.run("append_occurrence", move |s| {
            s.append_occurrence(&id, &occurrence, alias.as_deref())
        })
        .await
    }

    pub async fn enrich(
        &self,
        entity_id: &str,
        details: ContactDetails,
        now: DateTime<Utc>,
    ) -> Result<CanonicalEntity, AppError> {
        let id = entity_id.to_string();
        let details = Arc::new(details);
        self.run("enrich", move |s| s.enrich(&id, &details, now)).await
    }

    pub async fn save_result(&self, result: EntityResolutionResult) -> Result<(), AppError> {
        let result = Arc::new(result);
        self.run("save_result", move |s| s.save_result(&result)).await
    }
}
