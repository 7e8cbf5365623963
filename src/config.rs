//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `ENTITY_RESOLVER_STORE_PATH`, `ENTITY_RESOLVER_LOG_LEVEL` and
//! `ENTITY_RESOLVER_SIMILARITY_THRESHOLD` overrides.  Every value is
//! validated here so a bad threshold is fatal at startup and never shows up
//! mid-resolution.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::AppError;
use crate::logger;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 85.0;

/// Which [`EntityStore`](crate::store::EntityStore) backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local, lost on exit.  Tests and dry runs.
    Memory,
    /// Embedded SQLite file shared by every worker process on the host.
    Sqlite,
}

/// Resolution policy.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Minimum token-sort score (0-100) for a fuzzy match.
    pub similarity_threshold: f64,
    /// How many times one mention re-runs the match sequence after losing a
    /// creation race before the call is failed.
    pub max_conflict_retries: u32,
}

/// Store access policy shared by every backend.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database file (already expanded, no `~`).  Ignored by the memory backend.
    pub path: PathBuf,
    /// Upper bound for a single store operation.
    pub op_timeout: Duration,
    /// Attempts per operation, including the first.
    pub max_attempts: u32,
    /// First backoff delay; doubles on each retry.
    pub backoff_base: Duration,
}

#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub top_n: usize,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

/// Fully-resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub resolver: ResolverConfig,
    pub store: StoreConfig,
    pub stats: StatsConfig,
    pub logging: LoggingConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: PathBuf::from(default_store_path()),
            op_timeout: Duration::from_millis(default_op_timeout_ms()),
            max_attempts: default_max_attempts(),
            backoff_base: Duration::from_millis(default_backoff_base_ms()),
        }
    }
}

/// Raw TOML shape, the `serde` target before resolution.
#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    resolver: RawResolver,
    #[serde(default)]
    store: RawStore,
    #[serde(default)]
    stats: RawStats,
    #[serde(default)]
    logging: RawLogging,
}

#[derive(Deserialize)]
struct RawResolver {
    #[serde(default = "default_similarity_threshold")]
    similarity_threshold: f64,
    #[serde(default = "default_max_conflict_retries")]
    max_conflict_retries: u32,
}

impl Default for RawResolver {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

#[derive(Deserialize)]
struct RawStore {
    #[serde(default = "default_backend")]
    backend: String,
    #[serde(default = "default_store_path")]
    path: String,
    #[serde(default = "default_op_timeout_ms")]
    op_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    backoff_base_ms: u64,
}

impl Default for RawStore {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
            op_timeout_ms: default_op_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

#[derive(Deserialize)]
struct RawStats {
    #[serde(default = "default_top_n")]
    top_n: usize,
}

impl Default for RawStats {
    fn default() -> Self {
        Self { top_n: default_top_n() }
    }
}

#[derive(Deserialize)]
struct RawLogging {
    #[serde(default = "default_log_level")]
    level: String,
}

impl Default for RawLogging {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_similarity_threshold() -> f64 { DEFAULT_SIMILARITY_THRESHOLD }
fn default_max_conflict_retries() -> u32 { 5 }
fn default_backend() -> String { "sqlite".to_string() }
fn default_store_path() -> String { "~/.entity-resolver/entities.db".to_string() }
fn default_op_timeout_ms() -> u64 { 5_000 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_base_ms() -> u64 { 50 }
fn default_top_n() -> usize { 10 }
fn default_log_level() -> String { "info".to_string() }

/// Explicit overrides, normally sourced from the environment.
/// Tests construct this directly instead of mutating env vars.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub store_path: Option<String>,
    pub log_level: Option<String>,
    pub similarity_threshold: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            store_path: env::var("ENTITY_RESOLVER_STORE_PATH").ok(),
            log_level: env::var("ENTITY_RESOLVER_LOG_LEVEL").ok(),
            similarity_threshold: env::var("ENTITY_RESOLVER_SIMILARITY_THRESHOLD").ok(),
        }
    }
}

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    load_from(Path::new(DEFAULT_CONFIG_PATH), &Overrides::from_env())
}

/// Load from an explicit path.  A missing file is an error; an empty file
/// yields all defaults.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    load_str(&raw, overrides)
        .map_err(|e| match e {
            AppError::Config(msg) => AppError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
}

/// Parse and validate TOML text.
pub fn load_str(raw: &str, overrides: &Overrides) -> Result<Config, AppError> {
    let parsed: RawConfig =
        toml::from_str(raw).map_err(|e| AppError::Config(format!("parse error: {e}")))?;

    let similarity_threshold = match overrides.similarity_threshold.as_deref() {
        Some(s) => s.trim().parse::<f64>().map_err(|_| {
            AppError::Config(format!("similarity_threshold override is not a number: '{s}'"))
        })?,
        None => parsed.resolver.similarity_threshold,
    };
    validate_threshold(similarity_threshold)?;

    let backend = match parsed.store.backend.as_str() {
        "memory" => StoreBackend::Memory,
        "sqlite" => StoreBackend::Sqlite,
        other => {
            return Err(AppError::Config(format!(
                "unknown store backend '{other}' (expected \"sqlite\" or \"memory\")"
            )));
        }
    };

    if parsed.store.max_attempts == 0 {
        return Err(AppError::Config("store.max_attempts must be at least 1".into()));
    }
    if parsed.store.op_timeout_ms == 0 {
        return Err(AppError::Config("store.op_timeout_ms must be positive".into()));
    }

    let level = overrides
        .log_level
        .clone()
        .unwrap_or(parsed.logging.level);
    logger::validate_directives(&level).map_err(|e| AppError::Config(e.to_string()))?;

    let path_str = overrides
        .store_path
        .as_deref()
        .unwrap_or(&parsed.store.path);

    Ok(Config {
        resolver: ResolverConfig {
            similarity_threshold,
            max_conflict_retries: parsed.resolver.max_conflict_retries,
        },
        store: StoreConfig {
            backend,
            path: expand_home(path_str),
            op_timeout: Duration::from_millis(parsed.store.op_timeout_ms),
            max_attempts: parsed.store.max_attempts,
            backoff_base: Duration::from_millis(parsed.store.backoff_base_ms),
        },
        stats: StatsConfig { top_n: parsed.stats.top_n },
        logging: LoggingConfig { level },
    })
}

/// Thresholds are percentages; NaN and out-of-range values are rejected.
pub fn validate_threshold(threshold: f64) -> Result<(), AppError> {
    if !threshold.is_finite() || !(0.0..=100.0).contains(&threshold) {
        return Err(AppError::Config(format!(
            "similarity_threshold must be within [0, 100], got {threshold}"
        )));
    }
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

impl Config {
    /// In-memory store, default policy, fast retries.  No files touched.
    pub fn test_default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            store: StoreConfig {
                backoff_base: Duration::from_millis(1),
                ..StoreConfig::default()
            },
            stats: StatsConfig { top_n: default_top_n() },
            logging: LoggingConfig { level: "info".into() },
        }
    }
}
