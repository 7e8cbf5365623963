//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    /// Transient store failure (busy, locked, timed out, I/O).  Retried by
    /// the store handle before it surfaces.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Non-transient store failure (schema mismatch, corrupt row, …).
    #[error("store error: {0}")]
    Store(String),

    /// A canonical entity with the same `(canonical_name, entity_type)` key
    /// was created by a concurrent writer.
    #[error("uniqueness conflict on ({canonical_name}, {entity_type})")]
    UniquenessConflict {
        canonical_name: String,
        entity_type: String,
    },

    #[error("invalid mention: {0}")]
    InvalidMention(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// `true` for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }
}
