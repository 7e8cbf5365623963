//! Resolution engine: raw mentions in, canonical entities out.
//!
//! Per mention the engine tries, in order:
//!
//! 1. **exact**: `(normalize(name), type)` is an existing creation key;
//! 2. **fuzzy**: the best candidate of the same type scores at least
//!    `similarity_threshold`;
//! 3. **new**: a fresh canonical entity is inserted.
//!
//! Creation is conditional on the key being unused.  A writer that loses the
//! race gets [`AppError::UniquenessConflict`] and re-runs the whole sequence,
//! which then normally exact-matches the winner.
//!
//! Occurrences are keyed on `(call_id, raw_name)`, so repeats of one name
//! within a call are folded into a single mention with the summed count
//! before anything is written.

pub mod candidates;
pub mod normalize;
mod recorder;
pub mod similarity;
pub mod stats;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{ResolverConfig, validate_threshold};
use crate::error::AppError;
use crate::model::{
    AppendOutcome, CanonicalEntity, ContactDetails, EntityMapping, EntityResolutionResult,
    EntitySearchQuery, EntitySearchResult, EntityStats, EntityType, MatchMethod, RawMention,
};
use crate::store::StoreHandle;

use candidates::CandidateIndex;
use normalize::normalize;

pub struct ResolutionEngine {
    store: StoreHandle,
    config: ResolverConfig,
}

impl ResolutionEngine {
    pub fn new(store: StoreHandle, config: ResolverConfig) -> Result<Self, AppError> {
        validate_threshold(config.similarity_threshold)?;
        Ok(Self { store, config })
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.config.similarity_threshold
    }

    // ── Per call ──────────────────────────────────────────────────────

    /// Resolve every mention extracted from one call.
    ///
    /// Blank names are skipped with a warning.  Any other failure fails the
    /// whole call.  This is not all-or-nothing: occurrences recorded before
    /// the failure stay applied.  Rerunning the call converges on the same
    /// state, since a repeated `(call_id, raw_name)` is never counted twice.
    pub async fn resolve(
        &self,
        call_id: &str,
        mentions: &[RawMention],
    ) -> Result<EntityResolutionResult, AppError> {
        let started = Instant::now();
        info!(call_id, mentions = mentions.len(), "resolving call entities");

        let mut slots: Vec<Option<EntityMapping>> = vec![None; mentions.len()];
        for group in fold_repeats(mentions) {
            match self.resolve_mention(call_id, &group.mention).await {
                Ok(first) => {
                    for (n, &i) in group.members.iter().enumerate() {
                        let mut m = first.clone();
                        m.raw_name = mentions[i].name.clone();
                        // Later repeats would have found the entity the first one created.
                        if n > 0 && m.match_method == MatchMethod::New {
                            m.match_method = MatchMethod::Exact;
                        }
                        slots[i] = Some(m);
                    }
                }
                Err(AppError::InvalidMention(reason)) => {
                    warn!(call_id, %reason, "skipping mention");
                }
                Err(e) => {
                    warn!(call_id, raw_name = %group.mention.name, error = %e, "entity resolution failed");
                    return Err(e);
                }
            }
        }

        let entity_mappings: Vec<EntityMapping> = slots.into_iter().flatten().collect();
        let created = entity_mappings
            .iter()
            .filter(|m| m.match_method == MatchMethod::New)
            .count();
        let resolved = entity_mappings.len() - created;

        let confidence_scores: HashMap<String, f64> = entity_mappings
            .iter()
            .map(|m| (m.raw_name.clone(), m.similarity_score))
            .collect();

        let result = EntityResolutionResult {
            call_id: call_id.to_string(),
            raw_entities_count: mentions.len(),
            resolved_entities_count: resolved,
            new_entities_created: created,
            entity_mappings,
            processing_time_seconds: started.elapsed().as_secs_f64(),
            confidence_scores,
            resolved_at: recorder::now(),
        };
        self.store.save_result(result.clone()).await?;

        info!(
            call_id,
            raw = result.raw_entities_count,
            resolved = result.resolved_entities_count,
            new = result.new_entities_created,
            elapsed_s = result.processing_time_seconds,
            "call entities resolved"
        );
        Ok(result)
    }

    // ── Per mention ───────────────────────────────────────────────────

    async fn resolve_mention(
        &self,
        call_id: &str,
        mention: &RawMention,
    ) -> Result<EntityMapping, AppError> {
        let key = normalize(&mention.name);
        if key.is_empty() {
            return Err(AppError::InvalidMention(format!(
                "blank entity name (type {})",
                mention.entity_type
            )));
        }

        // Id of the entity this mention tried to create, if any.  A timed-out
        // insert may still have committed; finding that entity later means
        // the creation was ours.
        let mut attempted: Option<String> = None;
        let mut retries = 0;
        loop {
            match self.match_once(call_id, mention, &key, &mut attempted).await {
                Err(e @ (AppError::UniquenessConflict { .. } | AppError::NotFound(_))) => {
                    if retries >= self.config.max_conflict_retries {
                        return Err(e);
                    }
                    retries += 1;
                    warn!(call_id, canonical_name = %key, retry = retries, error = %e, "lost a write race; re-matching");
                }
                other => return other,
            }
        }
    }

    /// One pass of exact -> fuzzy -> new against the current store state.
    async fn match_once(
        &self,
        call_id: &str,
        mention: &RawMention,
        key: &str,
        attempted: &mut Option<String>,
    ) -> Result<EntityMapping, AppError> {
        let entity_type = mention.entity_type;

        if let Some(entity) = self.store.find_by_key(key, entity_type).await? {
            let outcome = recorder::append(&self.store, &entity.entity_id, call_id, mention, None).await?;
            if attempted.as_deref() == Some(entity.entity_id.as_str()) {
                recorder::log_created(&entity, call_id);
                return Ok(mapping(mention, &entity, MatchMethod::New, 100.0));
            }
            log_match(call_id, mention, &entity, MatchMethod::Exact, 100.0, outcome);
            return Ok(mapping(mention, &entity, MatchMethod::Exact, 100.0));
        }

        let index = CandidateIndex::build(self.store.list_by_type(entity_type).await?);
        if let Some(best) = index.best_match(key, self.config.similarity_threshold) {
            let raw = mention.name.trim();
            let alias = (!best.entity.knows_name(raw)).then(|| raw.to_string());
            let outcome =
                recorder::append(&self.store, &best.entity.entity_id, call_id, mention, alias).await?;
            log_match(call_id, mention, &best.entity, MatchMethod::Fuzzy, best.score, outcome);
            return Ok(mapping(mention, &best.entity, MatchMethod::Fuzzy, best.score));
        }

        let entity = recorder::first_seen(key, call_id, mention);
        *attempted = Some(entity.entity_id.clone());
        let entity = recorder::create(&self.store, entity, call_id).await?;
        Ok(mapping(mention, &entity, MatchMethod::New, 100.0))
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Entities whose name (canonical or alias) scores at least
    /// `query.min_similarity` against `query.entity_name`, best first, one
    /// hit per entity.
    pub async fn search(&self, query: &EntitySearchQuery) -> Result<Vec<EntitySearchResult>, AppError> {
        let key = normalize(&query.entity_name);
        if key.is_empty() {
            return Err(AppError::InvalidMention("blank search name".into()));
        }
        let entities = match query.entity_type {
            Some(t) => self.store.list_by_type(t).await?,
            None => self.store.list_all().await?,
        };

        let mut hits = CandidateIndex::build(entities).ranked(&key, query.min_similarity);
        hits.truncate(query.limit);
        debug!(name = %key, hits = hits.len(), "entity search");

        Ok(hits
            .into_iter()
            .map(|hit| {
                let match_method = if hit.entity.canonical_name == key {
                    MatchMethod::Exact
                } else {
                    MatchMethod::Fuzzy
                };
                EntitySearchResult {
                    entity: hit.entity,
                    similarity_score: hit.score,
                    match_method,
                }
            })
            .collect())
    }

    pub async fn get_entity(&self, entity_id: &str) -> Result<Option<CanonicalEntity>, AppError> {
        self.store.get(entity_id).await
    }

    pub async fn entities_by_type(&self, entity_type: EntityType) -> Result<Vec<CanonicalEntity>, AppError> {
        self.store.list_by_type(entity_type).await
    }

    /// The `limit` most-mentioned entities of any type.
    pub async fn top_entities(&self, limit: usize) -> Result<Vec<CanonicalEntity>, AppError> {
        let all = self.store.list_all().await?;
        Ok(stats::top_by_mentions(&all, limit).into_iter().cloned().collect())
    }

    pub async fn stats(&self, top_n: usize) -> Result<EntityStats, AppError> {
        Ok(stats::compute(&self.store.list_all().await?, top_n))
    }

    pub async fn result_for_call(&self, call_id: &str) -> Result<Option<EntityResolutionResult>, AppError> {
        self.store.result_for_call(call_id).await
    }

    /// Attach contact details to an entity.  Counters are never touched.
    pub async fn enrich(
        &self,
        entity_id: &str,
        details: ContactDetails,
    ) -> Result<CanonicalEntity, AppError> {
        let entity = self.store.enrich(entity_id, details, recorder::now()).await?;
        info!(entity_id, canonical_name = %entity.canonical_name, "entity enriched");
        Ok(entity)
    }
}

/// Mentions of one call sharing a trimmed name and type, folded into one
/// mention carrying the summed count.  `members` indexes the input slice in
/// order; the first member's context is kept.
struct MentionGroup {
    mention: RawMention,
    members: Vec<usize>,
}

fn fold_repeats(mentions: &[RawMention]) -> Vec<MentionGroup> {
    let mut groups: Vec<MentionGroup> = Vec::new();
    let mut by_name: HashMap<(&str, EntityType), usize> = HashMap::new();
    for (i, m) in mentions.iter().enumerate() {
        match by_name.entry((m.name.trim(), m.entity_type)) {
            Entry::Occupied(slot) => {
                let group = &mut groups[*slot.get()];
                group.mention.mentions = group.mention.mentions.saturating_add(m.mentions);
                group.members.push(i);
            }
            Entry::Vacant(slot) => {
                slot.insert(groups.len());
                groups.push(MentionGroup {
                    mention: m.clone(),
                    members: vec![i],
                });
            }
        }
    }
    groups
}

fn mapping(
    mention: &RawMention,
    entity: &CanonicalEntity,
    match_method: MatchMethod,
    similarity_score: f64,
) -> EntityMapping {
    EntityMapping {
        raw_name: mention.name.clone(),
        canonical_id: entity.entity_id.clone(),
        canonical_name: entity.canonical_name.clone(),
        entity_type: entity.entity_type,
        similarity_score,
        match_method,
    }
}

fn log_match(
    call_id: &str,
    mention: &RawMention,
    entity: &CanonicalEntity,
    match_method: MatchMethod,
    similarity: f64,
    outcome: AppendOutcome,
) {
    debug!(
        call_id,
        raw_name = %mention.name,
        entity_id = %entity.entity_id,
        canonical_name = %entity.canonical_name,
        %match_method,
        similarity,
        already_recorded = outcome == AppendOutcome::AlreadyRecorded,
        "mention matched"
    );
}
