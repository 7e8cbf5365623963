//! Canonical entity resolution for call-transcript entity mentions.
//!
//! Raw `{name, type, mentions, context}` tuples extracted per call are
//! folded into deduplicated [`CanonicalEntity`](model::CanonicalEntity)
//! records by the [`ResolutionEngine`](resolution::ResolutionEngine), which
//! talks to a pluggable [`EntityStore`](store::EntityStore) through an async
//! [`StoreHandle`](store::StoreHandle).

pub mod config;
pub mod error;
pub mod logger;
pub mod model;
pub mod resolution;
pub mod store;

pub use error::AppError;
pub use resolution::ResolutionEngine;
pub use store::{EntityStore, StoreHandle};
