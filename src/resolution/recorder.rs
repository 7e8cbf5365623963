//! Occurrence recording: the two writes resolution performs.
//!
//! Both go through the store as one atomic operation each.  Timestamps are
//! truncated to microseconds so every backend stores the same instant.

use chrono::{DateTime, SubsecRound, Utc};
use tracing::info;

use crate::error::AppError;
use crate::model::{AppendOutcome, CanonicalEntity, Occurrence, RawMention};
use crate::store::StoreHandle;

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn occurrence_for(call_id: &str, mention: &RawMention) -> Occurrence {
    Occurrence {
        call_id: call_id.to_string(),
        raw_name: mention.name.trim().to_string(),
        entity_type: mention.entity_type,
        mentions: mention.mentions,
        context: mention.context.clone(),
        extracted_at: now(),
    }
}

/// Append one occurrence to an existing entity, adding `alias` in the same
/// write when it is not already known.
pub(crate) async fn append(
    store: &StoreHandle,
    entity_id: &str,
    call_id: &str,
    mention: &RawMention,
    alias: Option<String>,
) -> Result<AppendOutcome, AppError> {
    store
        .append_occurrence(entity_id, occurrence_for(call_id, mention), alias)
        .await
}

/// A fresh canonical entity named `key`, built from its first mention.
pub(crate) fn first_seen(key: &str, call_id: &str, mention: &RawMention) -> CanonicalEntity {
    CanonicalEntity::from_first_occurrence(key.to_string(), occurrence_for(call_id, mention))
}

/// Insert `entity`.  Fails with [`AppError::UniquenessConflict`] when another
/// writer got its key first.
pub(crate) async fn create(
    store: &StoreHandle,
    entity: CanonicalEntity,
    call_id: &str,
) -> Result<CanonicalEntity, AppError> {
    store.insert_new(entity.clone()).await?;
    log_created(&entity, call_id);
    Ok(entity)
}

pub(crate) fn log_created(entity: &CanonicalEntity, call_id: &str) {
    info!(
        call_id,
        entity_id = %entity.entity_id,
        canonical_name = %entity.canonical_name,
        entity_type = %entity.entity_type,
        "created canonical entity"
    );
}
