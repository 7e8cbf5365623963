//! Logging initialisation via tracing-subscriber.
//!
//! The binary calls [`init`] exactly once, after config is loaded.  Library
//! code only emits `tracing` events and never installs a subscriber.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Build the event filter.
///
/// With `prefer_level`, the configured `level` wins and `RUST_LOG` is only a
/// fallback for an unparsable level.  Without it, `RUST_LOG` wins and `level`
/// is the fallback.  `level` may be a plain level or a full directive such as
/// `"entity_resolver=debug,info"`.
pub fn build_filter(level: &str, prefer_level: bool) -> Result<EnvFilter, AppError> {
    if prefer_level {
        return EnvFilter::try_new(level).or_else(|level_err| {
            EnvFilter::try_from_default_env().map_err(|env_err| {
                AppError::Logger(format!(
                    "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
                ))
            })
        });
    }
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))
}

/// Install the global fmt subscriber writing to stderr, so stdout stays free
/// for JSON command output.
pub fn init(level: &str, prefer_level: bool) -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(level, prefer_level)?)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}

/// Parse a plain level string into a [`LevelFilter`].
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

/// Check a configured `level` before the logger is installed, so a typo
/// fails at startup rather than silently logging nothing.
///
/// Accepts a plain level or comma-separated directives.  Every directive
/// must end in a level (`target=level`) or be one; a bare word such as
/// `verbose` would otherwise be read as a target name and pass.
pub fn validate_directives(level: &str) -> Result<(), AppError> {
    for directive in level.split(',') {
        let directive = directive.trim();
        match directive.rsplit_once('=') {
            Some((target, lvl)) if !target.is_empty() => {
                parse_level(lvl)?;
            }
            _ => {
                parse_level(directive)?;
            }
        }
    }
    EnvFilter::try_new(level)
        .map(|_| ())
        .map_err(|e| AppError::Logger(format!("invalid log directive '{level}': {e}")))
}
