//! Behavioural scenarios shared by every store backend's integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use entity_resolver::config::{Config, ResolverConfig};
use entity_resolver::error::AppError;
use entity_resolver::model::{
    AppendOutcome, CanonicalEntity, EntityType, MatchMethod, Occurrence, RawMention,
};
use entity_resolver::store::{EntityStore, StoreHandle};
use entity_resolver::ResolutionEngine;

// ── helpers ──────────────────────────────────────────────────────────────────

pub fn engine(store: Arc<dyn EntityStore>, threshold: f64) -> ResolutionEngine {
    let config = Config::test_default();
    let resolver = ResolverConfig {
        similarity_threshold: threshold,
        ..config.resolver
    };
    ResolutionEngine::new(StoreHandle::new(store, &config.store), resolver).expect("engine")
}

pub fn person(name: &str, mentions: u64) -> RawMention {
    RawMention::new(name, EntityType::Person, mentions)
}

pub fn company(name: &str, mentions: u64) -> RawMention {
    RawMention::new(name, EntityType::Company, mentions)
}

async fn only_entity(engine: &ResolutionEngine, entity_type: EntityType) -> CanonicalEntity {
    let mut all = engine.entities_by_type(entity_type).await.unwrap();
    assert_eq!(all.len(), 1, "expected one {entity_type} entity, got {all:?}");
    all.remove(0)
}

// ── scenarios ────────────────────────────────────────────────────────────────

pub async fn end_to_end_single_call(store: Arc<dyn EntityStore>) {
    let engine = engine(store, 85.0);
    let mentions = vec![
        person("John Smith", 3),
        person("john smith", 1),
        company("Acme Corp", 2),
    ];
    let result = engine.resolve("c1", &mentions).await.unwrap();

    assert_eq!(result.call_id, "c1");
    assert_eq!(result.raw_entities_count, 3);
    assert_eq!(result.new_entities_created, 2);
    assert_eq!(result.resolved_entities_count, 1);
    let methods: Vec<MatchMethod> = result.entity_mappings.iter().map(|m| m.match_method).collect();
    assert_eq!(methods, vec![MatchMethod::New, MatchMethod::Exact, MatchMethod::New]);

    let john = only_entity(&engine, EntityType::Person).await;
    assert_eq!(john.canonical_name, "John Smith");
    assert_eq!(john.total_mentions, 4);
    assert_eq!(john.call_count, 1);
    assert_eq!(john.occurrences.len(), 2);
    assert!(john.first_seen <= john.last_seen);

    let acme = only_entity(&engine, EntityType::Company).await;
    assert_eq!(acme.total_mentions, 2);

    let stats = engine.stats(10).await.unwrap();
    assert_eq!(stats.total_entities, 2);
    assert_eq!(stats.total_mentions, 6);
    assert_eq!(stats.most_mentioned_entities[0].name, "John Smith");
}

pub async fn exact_match_is_stable(store: Arc<dyn EntityStore>) {
    let engine = engine(store, 85.0);
    let first = engine.resolve("c1", &[company("Acme Corp", 1)]).await.unwrap();
    let second = engine.resolve("c2", &[company("ACME CORP", 1)]).await.unwrap();

    let (a, b) = (&first.entity_mappings[0], &second.entity_mappings[0]);
    assert_eq!(a.match_method, MatchMethod::New);
    assert_eq!(b.match_method, MatchMethod::Exact);
    assert_eq!(b.similarity_score, 100.0);
    assert_eq!(a.canonical_id, b.canonical_id);
}

pub async fn fuzzy_threshold_boundary(store: Arc<dyn EntityStore>) {
    let engine = engine(store, 85.0);
    let john = engine.resolve("c1", &[person("John Smith", 1)]).await.unwrap();
    let john_id = john.entity_mappings[0].canonical_id.clone();

    let jon = engine.resolve("c2", &[person("Jon Smith", 1)]).await.unwrap();
    assert_eq!(jon.entity_mappings[0].match_method, MatchMethod::Fuzzy);
    assert_eq!(jon.entity_mappings[0].canonical_id, john_id);
    assert!(jon.entity_mappings[0].similarity_score >= 85.0);

    let robert = engine.resolve("c3", &[person("Robert Jones", 1)]).await.unwrap();
    assert_eq!(robert.entity_mappings[0].match_method, MatchMethod::New);
    assert_ne!(robert.entity_mappings[0].canonical_id, john_id);

    let john = engine.get_entity(&john_id).await.unwrap().unwrap();
    assert_eq!(john.aliases, vec!["Jon Smith".to_string()]);
}

pub async fn counters_across_calls(store: Arc<dyn EntityStore>) {
    let engine = engine(store, 85.0);
    engine.resolve("c1", &[person("Jane Doe", 2)]).await.unwrap();
    engine
        .resolve("c2", &[person("Jane Doe", 3), person("jane doe", 1)])
        .await
        .unwrap();
    engine.resolve("c3", &[person("JANE DOE", 4)]).await.unwrap();

    let jane = only_entity(&engine, EntityType::Person).await;
    assert_eq!(jane.total_mentions, 10);
    assert_eq!(jane.call_count, 3);
    assert_eq!(jane.occurrences.len(), 4);
    assert_eq!(
        jane.total_mentions,
        jane.occurrences.iter().map(|o| o.mentions).sum::<u64>()
    );
}

pub async fn no_cross_type_leakage(store: Arc<dyn EntityStore>) {
    let strict = engine(Arc::clone(&store), 85.0);
    strict.resolve("c1", &[person("Acme", 1)]).await.unwrap();
    let result = strict.resolve("c2", &[company("Acme", 1)]).await.unwrap();
    assert_eq!(result.entity_mappings[0].match_method, MatchMethod::New);

    let lax = engine(store, 0.0);
    let result = lax.resolve("c3", &[company("Acme Inc", 1)]).await.unwrap();
    let m = &result.entity_mappings[0];
    assert_eq!(m.match_method, MatchMethod::Fuzzy);
    assert_eq!(m.entity_type, EntityType::Company);

    let person = only_entity(&lax, EntityType::Person).await;
    assert_eq!(person.total_mentions, 1);
    assert!(person.aliases.is_empty());
}

pub async fn rerun_does_not_double_count(store: Arc<dyn EntityStore>) {
    let engine = engine(store, 85.0);
    let mentions = vec![person("John Smith", 3), person("Jon Smith", 1), company("Acme Corp", 2)];
    engine.resolve("c1", &mentions).await.unwrap();
    let before = engine.stats(10).await.unwrap();

    let rerun = engine.resolve("c1", &mentions).await.unwrap();
    assert_eq!(rerun.new_entities_created, 0);
    assert_eq!(rerun.resolved_entities_count, 3);

    let after = engine.stats(10).await.unwrap();
    assert_eq!(after.total_entities, before.total_entities);
    assert_eq!(after.total_mentions, before.total_mentions);

    let john = only_entity(&engine, EntityType::Person).await;
    assert_eq!(john.call_count, 1);
    assert_eq!(john.occurrences.len(), 2);
    let stored = engine.result_for_call("c1").await.unwrap().unwrap();
    assert_eq!(stored.new_entities_created, 0);
    assert_eq!(stored.entity_mappings.len(), rerun.entity_mappings.len());
}

pub async fn tie_break_prefers_more_mentions(store: Arc<dyn EntityStore>) {
    // Seed two near-identical names with a strict threshold so they stay apart.
    let seed = engine(Arc::clone(&store), 99.0);
    seed.resolve("c1", &[person("John Smith", 1)]).await.unwrap();
    let smiths = seed.resolve("c2", &[person("Jon Smiths", 3)]).await.unwrap();
    assert_eq!(smiths.entity_mappings[0].match_method, MatchMethod::New);

    // "Jon Smith" is one edit from both.
    let engine = engine(store, 85.0);
    let result = engine.resolve("c3", &[person("Jon Smith", 1)]).await.unwrap();
    let m = &result.entity_mappings[0];
    assert_eq!(m.match_method, MatchMethod::Fuzzy);
    assert_eq!(m.canonical_id, smiths.entity_mappings[0].canonical_id);
}

pub async fn concurrent_creation_converges(store: Arc<dyn EntityStore>, workers: usize) {
    let engine = Arc::new(engine(store, 85.0));
    let mut tasks = Vec::new();
    for i in 0..workers {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            engine
                .resolve(&format!("call-{i}"), &[company("Globex Corporation", 1)])
                .await
        }));
    }
    let mut ids = Vec::new();
    for t in tasks {
        let result = t.await.expect("join").expect("resolve");
        ids.push(result.entity_mappings[0].canonical_id.clone());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 1, "all workers must land on one entity");

    let globex = only_entity(&engine, EntityType::Company).await;
    assert_eq!(globex.call_count, workers as u64);
    assert_eq!(globex.total_mentions, workers as u64);
    assert_eq!(globex.occurrences.len(), workers);
}

pub async fn lost_creation_race_rematches(store: Arc<dyn EntityStore>) {
    let winner = engine(Arc::clone(&store), 85.0);
    let first = winner.resolve("c1", &[company("Initech", 1)]).await.unwrap();

    // The loser's first reads predate the winner's insert.
    let racing = Arc::new(StaleOnce::new(store));
    let loser = engine(racing.clone(), 85.0);
    let result = loser.resolve("c2", &[company("Initech", 2)]).await.unwrap();

    let m = &result.entity_mappings[0];
    assert_eq!(m.match_method, MatchMethod::Exact);
    assert_eq!(m.canonical_id, first.entity_mappings[0].canonical_id);
    assert_eq!(racing.conflicts.load(Ordering::SeqCst), 1);

    let initech = only_entity(&winner, EntityType::Company).await;
    assert_eq!(initech.call_count, 2);
    assert_eq!(initech.total_mentions, 3);
}

pub async fn repeated_name_in_one_call(store: Arc<dyn EntityStore>) {
    let engine = engine(store, 85.0);
    let mentions = vec![company("Acme", 2), company(" Acme ", 3), person("Acme", 1)];
    let result = engine.resolve("c1", &mentions).await.unwrap();

    assert_eq!(result.raw_entities_count, 3);
    assert_eq!(result.entity_mappings.len(), 3);
    assert_eq!(result.new_entities_created, 2);
    assert_eq!(result.resolved_entities_count, 1);
    let methods: Vec<MatchMethod> = result.entity_mappings.iter().map(|m| m.match_method).collect();
    assert_eq!(methods, vec![MatchMethod::New, MatchMethod::Exact, MatchMethod::New]);
    assert_eq!(result.entity_mappings[1].raw_name, " Acme ");
    assert_eq!(result.entity_mappings[0].canonical_id, result.entity_mappings[1].canonical_id);

    let acme = only_entity(&engine, EntityType::Company).await;
    assert_eq!(acme.total_mentions, 5);
    assert_eq!(acme.call_count, 1);
    assert_eq!(acme.occurrences.len(), 1);
    assert_eq!(
        acme.total_mentions,
        acme.occurrences.iter().map(|o| o.mentions).sum::<u64>()
    );

    engine.resolve("c1", &mentions).await.unwrap();
    let acme = only_entity(&engine, EntityType::Company).await;
    assert_eq!(acme.total_mentions, 5);
}

pub async fn committed_insert_reported_as_new(store: Arc<dyn EntityStore>) {
    let flaky = Arc::new(CommitsThenFails::new(store));
    let engine = engine(flaky.clone(), 85.0);
    let result = engine.resolve("c1", &[company("Initech", 2)]).await.unwrap();

    assert_eq!(flaky.inserts.load(Ordering::SeqCst), 2, "insert must have been retried");
    let m = &result.entity_mappings[0];
    assert_eq!(m.match_method, MatchMethod::New);
    assert_eq!(result.new_entities_created, 1);
    assert_eq!(result.resolved_entities_count, 0);

    let initech = only_entity(&engine, EntityType::Company).await;
    assert_eq!(initech.entity_id, m.canonical_id);
    assert_eq!(initech.total_mentions, 2);
    assert_eq!(initech.occurrences.len(), 1);
}

// ── store wrappers ───────────────────────────────────────────────────────────

/// Answers the first exact lookup and candidate scan as if the store were
/// empty, then behaves normally.
pub struct StaleOnce {
    inner: Arc<dyn EntityStore>,
    stale: AtomicBool,
    pub conflicts: AtomicU32,
}

impl StaleOnce {
    pub fn new(inner: Arc<dyn EntityStore>) -> Self {
        Self {
            inner,
            stale: AtomicBool::new(true),
            conflicts: AtomicU32::new(0),
        }
    }
}

impl EntityStore for StaleOnce {
    fn store_type(&self) -> &str {
        "stale_once"
    }

    fn find_by_key(&self, name: &str, t: EntityType) -> Result<Option<CanonicalEntity>, AppError> {
        if self.stale.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_by_key(name, t)
    }

    fn get(&self, id: &str) -> Result<Option<CanonicalEntity>, AppError> {
        self.inner.get(id)
    }

    fn list_by_type(&self, t: EntityType) -> Result<Vec<CanonicalEntity>, AppError> {
        if self.stale.swap(false, Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.inner.list_by_type(t)
    }

    fn list_all(&self) -> Result<Vec<CanonicalEntity>, AppError> {
        self.inner.list_all()
    }

    fn insert_new(&self, entity: &CanonicalEntity) -> Result<(), AppError> {
        let outcome = self.inner.insert_new(entity);
        if matches!(outcome, Err(AppError::UniquenessConflict { .. })) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        outcome
    }

    fn append_occurrence(
        &self,
        id: &str,
        occ: &Occurrence,
        alias: Option<&str>,
    ) -> Result<AppendOutcome, AppError> {
        self.inner.append_occurrence(id, occ, alias)
    }

    fn save_result(&self, result: &entity_resolver::model::EntityResolutionResult) -> Result<(), AppError> {
        self.inner.save_result(result)
    }
}

/// The first successful insert commits but reports a timeout, as a write
/// that outlived its deadline on the blocking pool would.
pub struct CommitsThenFails {
    inner: Arc<dyn EntityStore>,
    failed: AtomicBool,
    pub inserts: AtomicU32,
}

impl CommitsThenFails {
    pub fn new(inner: Arc<dyn EntityStore>) -> Self {
        Self {
            inner,
            failed: AtomicBool::new(false),
            inserts: AtomicU32::new(0),
        }
    }
}

impl EntityStore for CommitsThenFails {
    fn store_type(&self) -> &str {
        "commits_then_fails"
    }

    fn find_by_key(&self, name: &str, t: EntityType) -> Result<Option<CanonicalEntity>, AppError> {
        self.inner.find_by_key(name, t)
    }

    fn get(&self, id: &str) -> Result<Option<CanonicalEntity>, AppError> {
        self.inner.get(id)
    }

    fn list_by_type(&self, t: EntityType) -> Result<Vec<CanonicalEntity>, AppError> {
        self.inner.list_by_type(t)
    }

    fn list_all(&self) -> Result<Vec<CanonicalEntity>, AppError> {
        self.inner.list_all()
    }

    fn insert_new(&self, entity: &CanonicalEntity) -> Result<(), AppError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_new(entity)?;
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("insert_new timed out after 5000 ms".into()));
        }
        Ok(())
    }

    fn append_occurrence(
        &self,
        id: &str,
        occ: &Occurrence,
        alias: Option<&str>,
    ) -> Result<AppendOutcome, AppError> {
        self.inner.append_occurrence(id, occ, alias)
    }

    fn save_result(&self, result: &entity_resolver::model::EntityResolutionResult) -> Result<(), AppError> {
        self.inner.save_result(result)
    }
}
