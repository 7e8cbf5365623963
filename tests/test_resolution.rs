//! Resolution behaviour against the in-memory store.
//!
//! Run with:
//!   cargo test --test test_resolution

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use entity_resolver::error::AppError;
use entity_resolver::model::{AppendOutcome, CanonicalEntity, EntityType, Occurrence, RawMention};
use entity_resolver::store::{EntityStore, MemoryEntityStore};

use common::*;

fn memory() -> Arc<dyn EntityStore> {
    Arc::new(MemoryEntityStore::new())
}

// ── scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn end_to_end() {
    end_to_end_single_call(memory()).await;
}

#[tokio::test]
async fn exact_match_stability() {
    exact_match_is_stable(memory()).await;
}

#[tokio::test]
async fn fuzzy_boundary() {
    fuzzy_threshold_boundary(memory()).await;
}

#[tokio::test]
async fn counters() {
    counters_across_calls(memory()).await;
}

#[tokio::test]
async fn cross_type_isolation() {
    no_cross_type_leakage(memory()).await;
}

#[tokio::test]
async fn rerun_idempotency() {
    rerun_does_not_double_count(memory()).await;
}

#[tokio::test]
async fn tie_break() {
    tie_break_prefers_more_mentions(memory()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creation() {
    concurrent_creation_converges(memory(), 16).await;
}

#[tokio::test]
async fn lost_race_rematches() {
    lost_creation_race_rematches(memory()).await;
}

#[tokio::test]
async fn repeated_name_folds() {
    repeated_name_in_one_call(memory()).await;
}

#[tokio::test]
async fn committed_insert_counts_as_new() {
    committed_insert_reported_as_new(memory()).await;
}

// ── failure handling ─────────────────────────────────────────────────────────

/// Every lookup fails as if the database were locked.
struct Locked {
    calls: AtomicU32,
}

impl EntityStore for Locked {
    fn store_type(&self) -> &str {
        "locked"
    }
    fn find_by_key(&self, _: &str, _: EntityType) -> Result<Option<CanonicalEntity>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AppError::StoreUnavailable("database is locked".into()))
    }
    fn get(&self, _: &str) -> Result<Option<CanonicalEntity>, AppError> {
        Ok(None)
    }
    fn list_by_type(&self, _: EntityType) -> Result<Vec<CanonicalEntity>, AppError> {
        Ok(Vec::new())
    }
    fn list_all(&self) -> Result<Vec<CanonicalEntity>, AppError> {
        Ok(Vec::new())
    }
    fn insert_new(&self, _: &CanonicalEntity) -> Result<(), AppError> {
        Ok(())
    }
    fn append_occurrence(&self, _: &str, _: &Occurrence, _: Option<&str>) -> Result<AppendOutcome, AppError> {
        Ok(AppendOutcome::Appended)
    }
}

#[tokio::test]
async fn store_retry_gives_up_after_max_attempts() {
    let store = Arc::new(Locked { calls: AtomicU32::new(0) });
    let engine = engine(store.clone(), 85.0);

    let err = engine.resolve("c1", &[company("Acme Corp", 1)]).await.unwrap_err();
    assert!(matches!(err, AppError::StoreUnavailable(_)), "got {err}");
    // test_default allows three attempts per operation.
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
}

/// Never finds anything and always loses the creation race.
struct AlwaysConflicts {
    inserts: AtomicU32,
}

impl EntityStore for AlwaysConflicts {
    fn store_type(&self) -> &str {
        "always_conflicts"
    }
    fn find_by_key(&self, _: &str, _: EntityType) -> Result<Option<CanonicalEntity>, AppError> {
        Ok(None)
    }
    fn get(&self, _: &str) -> Result<Option<CanonicalEntity>, AppError> {
        Ok(None)
    }
    fn list_by_type(&self, _: EntityType) -> Result<Vec<CanonicalEntity>, AppError> {
        Ok(Vec::new())
    }
    fn list_all(&self) -> Result<Vec<CanonicalEntity>, AppError> {
        Ok(Vec::new())
    }
    fn insert_new(&self, e: &CanonicalEntity) -> Result<(), AppError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Err(AppError::UniquenessConflict {
            canonical_name: e.canonical_name.clone(),
            entity_type: e.entity_type.to_string(),
        })
    }
    fn append_occurrence(&self, id: &str, _: &Occurrence, _: Option<&str>) -> Result<AppendOutcome, AppError> {
        Err(AppError::NotFound(format!("entity {id}")))
    }
}

#[tokio::test]
async fn conflict_retries_are_bounded() {
    let store = Arc::new(AlwaysConflicts { inserts: AtomicU32::new(0) });
    let engine = engine(store.clone(), 85.0);

    let err = engine.resolve("c1", &[person("John Smith", 1)]).await.unwrap_err();
    assert!(matches!(err, AppError::UniquenessConflict { .. }), "got {err}");
    // One attempt plus the default five retries.
    assert_eq!(store.inserts.load(Ordering::SeqCst), 6);
}

// ── input handling ───────────────────────────────────────────────────────────

#[tokio::test]
async fn upstream_json_is_accepted_leniently() {
    let raw = r#"[
        {"name": "Sarah Connor", "type": "Person", "mentions": 2, "context": "asked about renewal"},
        {"name": "Cyberdyne", "type": "ORGANIZATION"},
        {"name": "", "type": "person", "mentions": 1}
    ]"#;
    let mentions: Vec<RawMention> = serde_json::from_str(raw).unwrap();
    assert_eq!(mentions[1].entity_type, EntityType::Other);
    assert_eq!(mentions[1].mentions, 1);

    let engine = engine(memory(), 85.0);
    let result = engine.resolve("c1", &mentions).await.unwrap();
    assert_eq!(result.raw_entities_count, 3);
    assert_eq!(result.new_entities_created, 2);
    assert_eq!(result.entity_mappings.len(), 2);

    let sarah = engine
        .get_entity(&result.entity_mappings[0].canonical_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sarah.occurrences[0].context.as_deref(), Some("asked about renewal"));
}

#[tokio::test]
async fn top_entities_orders_by_mentions() {
    let engine = engine(memory(), 85.0);
    engine
        .resolve(
            "c1",
            &[company("Acme Corp", 1), company("Globex", 5), person("Hank Scorpio", 3)],
        )
        .await
        .unwrap();
    let top: Vec<String> = engine
        .top_entities(2)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.canonical_name)
        .collect();
    assert_eq!(top, vec!["Globex".to_string(), "Hank Scorpio".to_string()]);
}
