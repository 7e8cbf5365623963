//! Data model shared by the resolution engine and every store backend.
//!
//! * [`RawMention`]: one upstream extraction for one call.  Transient.
//! * [`CanonicalEntity`]: the deduplicated master record, with its
//!   [`Occurrence`] history.
//! * [`EntityResolutionResult`]: per-call summary, one [`EntityMapping`] per
//!   resolved mention.
//!
//! Timestamps are `chrono::DateTime<Utc>` and serialise as RFC 3339.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ── EntityType ───────────────────────────────────────────────────────────────

/// Category of a canonical entity.  Entities of different types never match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum EntityType {
    Person,
    Company,
    Product,
    Location,
    Technology,
    #[default]
    Other,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Person,
        EntityType::Company,
        EntityType::Product,
        EntityType::Location,
        EntityType::Technology,
        EntityType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Company => "company",
            EntityType::Product => "product",
            EntityType::Location => "location",
            EntityType::Technology => "technology",
            EntityType::Other => "other",
        }
    }

    /// Upstream extraction is free-form: anything unrecognised is `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "person" => EntityType::Person,
            "company" => EntityType::Company,
            "product" => EntityType::Product,
            "location" => EntityType::Location,
            "technology" => EntityType::Technology,
            _ => EntityType::Other,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        EntityType::from_label(&s)
    }
}

/// Strict parse, used where a typo should be reported (CLI flags, stored rows).
impl FromStr for EntityType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::InvalidMention(format!("unknown entity type '{s}'")))
    }
}

// ── Input ────────────────────────────────────────────────────────────────────

/// One entity extracted from one call by the upstream analyser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMention {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: EntityType,
    #[serde(default = "default_mentions")]
    pub mentions: u64,
    #[serde(default)]
    pub context: Option<String>,
}

fn default_mentions() -> u64 {
    1
}

impl RawMention {
    pub fn new(name: impl Into<String>, entity_type: EntityType, mentions: u64) -> Self {
        Self {
            name: name.into(),
            entity_type,
            mentions,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

// ── Canonical entity ─────────────────────────────────────────────────────────

/// One record of a canonical entity being mentioned in one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub call_id: String,
    pub raw_name: String,
    pub entity_type: EntityType,
    pub mentions: u64,
    #[serde(default)]
    pub context: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

/// Deduplicated master record.
///
/// Invariants kept by every store: `first_seen <= last_seen`,
/// `total_mentions == Σ occurrences.mentions`, and `call_count` equals the
/// number of distinct `call_id`s in `occurrences`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub entity_id: String,
    pub canonical_name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub aliases: Vec<String>,

    // Out-of-band enrichment; never written by resolution.
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_mentions: u64,
    pub call_count: u64,
    #[serde(default)]
    pub occurrences: Vec<Occurrence>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalEntity {
    /// A brand-new entity carrying its first occurrence.
    ///
    /// `canonical_name` must already be normalised; `occurrence.raw_name`
    /// becomes the sole alias when it differs from it.
    pub fn from_first_occurrence(canonical_name: String, occurrence: Occurrence) -> Self {
        let now = occurrence.extracted_at;
        let aliases = if occurrence.raw_name != canonical_name {
            vec![occurrence.raw_name.clone()]
        } else {
            Vec::new()
        };
        Self {
            entity_id: uuid::Uuid::now_v7().to_string(),
            canonical_name,
            entity_type: occurrence.entity_type,
            aliases,
            email: None,
            phone: None,
            company: None,
            title: None,
            metadata: BTreeMap::new(),
            first_seen: now,
            last_seen: now,
            total_mentions: occurrence.mentions,
            call_count: 1,
            occurrences: vec![occurrence],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_call(&self, call_id: &str) -> bool {
        self.occurrences.iter().any(|o| o.call_id == call_id)
    }

    pub fn has_occurrence(&self, call_id: &str, raw_name: &str) -> bool {
        self.occurrences
            .iter()
            .any(|o| o.call_id == call_id && o.raw_name == raw_name)
    }

    /// `true` when `name` is already known for this entity, ignoring case,
    /// either as the canonical name or as an alias.
    pub fn knows_name(&self, name: &str) -> bool {
        name_is_known(&self.canonical_name, &self.aliases, name)
    }

    /// Apply one occurrence in memory.  Stores that hold entities as values
    /// call this inside their critical section; SQL stores mirror it in a
    /// transaction.
    pub fn record(&mut self, occurrence: Occurrence, alias: Option<&str>) -> AppendOutcome {
        if self.has_occurrence(&occurrence.call_id, &occurrence.raw_name) {
            return AppendOutcome::AlreadyRecorded;
        }
        if !self.has_call(&occurrence.call_id) {
            self.call_count = self.call_count.saturating_add(1);
        }
        self.total_mentions = self.total_mentions.saturating_add(occurrence.mentions);
        if occurrence.extracted_at > self.last_seen {
            self.last_seen = occurrence.extracted_at;
        }
        self.updated_at = occurrence.extracted_at.max(self.updated_at);
        if let Some(alias) = alias {
            if !self.knows_name(alias) {
                self.aliases.push(alias.to_string());
            }
        }
        self.occurrences.push(occurrence);
        AppendOutcome::Appended
    }

    /// Overwrite only the enrichment fields that are set in `details`.
    pub fn enrich(&mut self, details: &ContactDetails, now: DateTime<Utc>) {
        if let Some(v) = &details.email {
            self.email = Some(v.clone());
        }
        if let Some(v) = &details.phone {
            self.phone = Some(v.clone());
        }
        if let Some(v) = &details.company {
            self.company = Some(v.clone());
        }
        if let Some(v) = &details.title {
            self.title = Some(v.clone());
        }
        self.metadata
            .extend(details.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.updated_at = now.max(self.updated_at);
    }
}

/// Case-insensitive membership of `name` in `{canonical_name} ∪ aliases`.
pub fn name_is_known(canonical_name: &str, aliases: &[String], name: &str) -> bool {
    let lower = name.to_lowercase();
    canonical_name.to_lowercase() == lower || aliases.iter().any(|a| a.to_lowercase() == lower)
}

/// Result of an atomic occurrence append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The same `(call_id, raw_name)` was already recorded; nothing changed.
    AlreadyRecorded,
}

/// Out-of-band enrichment payload.  `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

// ── Output ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Fuzzy,
    New,
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchMethod::Exact => "exact",
            MatchMethod::Fuzzy => "fuzzy",
            MatchMethod::New => "new",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMapping {
    pub raw_name: String,
    pub canonical_id: String,
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub similarity_score: f64,
    pub match_method: MatchMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResolutionResult {
    pub call_id: String,
    pub raw_entities_count: usize,
    pub resolved_entities_count: usize,
    pub new_entities_created: usize,
    pub entity_mappings: Vec<EntityMapping>,
    pub processing_time_seconds: f64,
    /// raw name -> similarity score of its mapping.
    #[serde(default)]
    pub confidence_scores: HashMap<String, f64>,
    pub resolved_at: DateTime<Utc>,
}

// ── Search ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySearchQuery {
    pub entity_name: String,
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_min_similarity() -> f64 {
    80.0
}

fn default_search_limit() -> usize {
    10
}

impl EntitySearchQuery {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            entity_type: None,
            min_similarity: default_min_similarity(),
            limit: default_search_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySearchResult {
    pub entity: CanonicalEntity,
    pub similarity_score: f64,
    pub match_method: MatchMethod,
}

// ── Statistics ───────────────────────────────────────────────────────────────

/// Compact row used in statistics listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub entity_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub mentions: u64,
    pub calls: u64,
    pub first_seen: DateTime<Utc>,
}

impl From<&CanonicalEntity> for EntitySummary {
    fn from(e: &CanonicalEntity) -> Self {
        Self {
            entity_id: e.entity_id.clone(),
            name: e.canonical_name.clone(),
            entity_type: e.entity_type,
            mentions: e.total_mentions,
            calls: e.call_count,
            first_seen: e.first_seen,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStats {
    pub total_entities: u64,
    pub entities_by_type: BTreeMap<EntityType, u64>,
    pub total_mentions: u64,
    pub most_mentioned_entities: Vec<EntitySummary>,
    pub recent_entities: Vec<EntitySummary>,
}

// ── Tests ────────────────────────────────────────────────────────────────────
