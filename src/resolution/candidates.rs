//! Candidate index: one snapshot of the entities a name may fuzzy-match.
//!
//! Every entity contributes its canonical name plus each normalised alias as
//! comparison strings.  Scoring keeps the best string per entity, then orders
//! entities by score desc, `total_mentions` desc, `canonical_name` asc,
//! `entity_id` asc, so the winner never depends on store iteration order.

use std::cmp::Ordering;

use crate::model::CanonicalEntity;

use super::normalize::normalize;
use super::similarity::token_sort_ratio;

/// An entity together with the best score any of its names reached.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub entity: CanonicalEntity,
    pub score: f64,
}

pub struct CandidateIndex {
    entities: Vec<CanonicalEntity>,
    /// (comparison string, index into `entities`)
    entries: Vec<(String, usize)>,
}

impl CandidateIndex {
    pub fn build(entities: Vec<CanonicalEntity>) -> Self {
        let mut entries = Vec::new();
        for (idx, entity) in entities.iter().enumerate() {
            entries.push((entity.canonical_name.clone(), idx));
            for alias in &entity.aliases {
                let key = normalize(alias);
                if !key.is_empty() && key != entity.canonical_name {
                    entries.push((key, idx));
                }
            }
        }
        Self { entities, entries }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All entities scoring at least `min_score` against `key`, best first.
    pub fn ranked(&self, key: &str, min_score: f64) -> Vec<ScoredCandidate> {
        let mut best: Vec<Option<f64>> = vec![None; self.entities.len()];
        for (name, idx) in &self.entries {
            let score = token_sort_ratio(key, name);
            let slot = &mut best[*idx];
            if slot.is_none_or(|s| score > s) {
                *slot = Some(score);
            }
        }

        let mut ranked: Vec<ScoredCandidate> = best
            .into_iter()
            .enumerate()
            .filter_map(|(idx, score)| {
                let score = score?;
                (score >= min_score).then(|| ScoredCandidate {
                    entity: self.entities[idx].clone(),
                    score,
                })
            })
            .collect();
        ranked.sort_by(compare);
        ranked
    }

    /// The single winner at or above `threshold`, if any.
    pub fn best_match(&self, key: &str, threshold: f64) -> Option<ScoredCandidate> {
        self.ranked(key, threshold).into_iter().next()
    }
}

fn compare(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.entity.total_mentions.cmp(&a.entity.total_mentions))
        .then_with(|| a.entity.canonical_name.cmp(&b.entity.canonical_name))
        .then_with(|| a.entity.entity_id.cmp(&b.entity.entity_id))
}
