//! Read-only aggregation over the entity set.

use std::collections::BTreeMap;

use crate::model::{CanonicalEntity, EntityStats, EntitySummary, EntityType};

/// Summarise `entities`.  Every entity type appears in `entities_by_type`,
/// zero counts included.
pub fn compute(entities: &[CanonicalEntity], top_n: usize) -> EntityStats {
    let mut entities_by_type: BTreeMap<EntityType, u64> =
        EntityType::ALL.iter().map(|t| (*t, 0)).collect();
    for e in entities {
        *entities_by_type.entry(e.entity_type).or_default() += 1;
    }

    EntityStats {
        total_entities: entities.len() as u64,
        entities_by_type,
        total_mentions: entities.iter().map(|e| e.total_mentions).sum(),
        most_mentioned_entities: top_by_mentions(entities, top_n)
            .into_iter()
            .map(EntitySummary::from)
            .collect(),
        recent_entities: most_recent(entities, top_n)
            .into_iter()
            .map(EntitySummary::from)
            .collect(),
    }
}

/// `total_mentions` desc, then name, then id.
pub fn top_by_mentions(entities: &[CanonicalEntity], n: usize) -> Vec<&CanonicalEntity> {
    let mut sorted: Vec<&CanonicalEntity> = entities.iter().collect();
    sorted.sort_by(|a, b| {
        b.total_mentions
            .cmp(&a.total_mentions)
            .then_with(|| a.canonical_name.cmp(&b.canonical_name))
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    sorted.truncate(n);
    sorted
}

fn most_recent(entities: &[CanonicalEntity], n: usize) -> Vec<&CanonicalEntity> {
    let mut sorted: Vec<&CanonicalEntity> = entities.iter().collect();
    sorted.sort_by(|a, b| {
        b.first_seen
            .cmp(&a.first_seen)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    sorted.truncate(n);
    sorted
}
