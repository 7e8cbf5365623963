//! `entity-resolver`: operator CLI for the entity store.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse args
//!   3. Load config
//!   4. Init logger once (CLI `-v` flags > config/env)
//!   5. Open the configured store
//!   6. Run one command, print JSON to stdout

use std::path::Path;

use tracing::info;

use entity_resolver::config::{self, Overrides};
use entity_resolver::error::AppError;
use entity_resolver::logger;
use entity_resolver::model::{EntitySearchQuery, EntityType, RawMention};
use entity_resolver::store::{self, StoreHandle};
use entity_resolver::ResolutionEngine;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = match args.config_path.as_deref() {
        Some(path) => config::load_from(Path::new(path), &Overrides::from_env())?,
        None => config::load()?,
    };

    let effective_log_level = args.log_level.unwrap_or(config.logging.level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    let handle = StoreHandle::new(store::open_store(&config.store)?, &config.store);
    info!(
        store = handle.store_type(),
        path = %config.store.path.display(),
        similarity_threshold = config.resolver.similarity_threshold,
        effective_log_level,
        "config loaded"
    );

    let engine = ResolutionEngine::new(handle, config.resolver.clone())?;

    let command = args.command.ok_or_else(|| {
        AppError::Config("no command given; run 'entity-resolver --help' for usage".into())
    })?;

    match command {
        Command::Resolve { call_id, mentions_path } => {
            let raw = std::fs::read_to_string(&mentions_path)?;
            let mentions: Vec<RawMention> = serde_json::from_str(&raw)?;
            let result = engine.resolve(&call_id, &mentions).await?;
            print_json(&result)
        }
        Command::Stats { top } => {
            let stats = engine.stats(top.unwrap_or(config.stats.top_n)).await?;
            print_json(&stats)
        }
        Command::Search(query) => {
            let hits = engine.search(&query).await?;
            print_json(&hits)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── CLI arg parsing ────────────────────────────────────────────────────────

enum Command {
    Resolve { call_id: String, mentions_path: String },
    Stats { top: Option<usize> },
    Search(EntitySearchQuery),
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
    command: Option<Command>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut flags: Vec<(String, String)> = Vec::new();

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-f" | "--config" => config_path = Some(require_value(&arg, iter.next())),
            "--top" | "--type" | "--min" | "--limit" => {
                let value = require_value(&arg, iter.next());
                flags.push((arg, value));
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => positional.push(arg),
        }
    }

    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    let command = match build_command(&positional, &flags) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!("  run 'entity-resolver --help' for usage");
            std::process::exit(2);
        }
    };

    CliArgs { log_level, config_path, command }
}

fn require_value(flag: &str, value: Option<String>) -> String {
    match value {
        Some(v) => v,
        None => {
            eprintln!("error: {flag} requires a value");
            std::process::exit(2);
        }
    }
}

fn build_command(positional: &[String], flags: &[(String, String)]) -> Result<Option<Command>, String> {
    let flag = |name: &str| flags.iter().rev().find(|(f, _)| f == name).map(|(_, v)| v.as_str());
    let number = |name: &str| -> Result<Option<usize>, String> {
        flag(name)
            .map(|v| v.parse::<usize>().map_err(|_| format!("{name} expects a number, got '{v}'")))
            .transpose()
    };

    let Some(cmd) = positional.first() else {
        return Ok(None);
    };
    match cmd.as_str() {
        "resolve" => match (positional.get(1), positional.get(2)) {
            (Some(call_id), Some(path)) => Ok(Some(Command::Resolve {
                call_id: call_id.clone(),
                mentions_path: path.clone(),
            })),
            _ => Err("usage: entity-resolver resolve <call_id> <mentions.json>".into()),
        },
        "stats" => Ok(Some(Command::Stats { top: number("--top")? })),
        "search" => {
            let name = positional
                .get(1)
                .ok_or("usage: entity-resolver search <name> [--type T] [--min S] [--limit N]")?;
            let mut query = EntitySearchQuery::new(name.clone());
            if let Some(t) = flag("--type") {
                query.entity_type = Some(t.parse::<EntityType>().map_err(|e| e.to_string())?);
            }
            if let Some(m) = flag("--min") {
                query.min_similarity = m
                    .parse::<f64>()
                    .ok()
                    .filter(|s| (0.0..=100.0).contains(s))
                    .ok_or_else(|| format!("--min expects a score in [0, 100], got '{m}'"))?;
            }
            if let Some(limit) = number("--limit")? {
                query.limit = limit;
            }
            Ok(Some(Command::Search(query)))
        }
        other => Err(format!("unknown command: {other}")),
    }
}

fn print_help() {
    println!("Usage: entity-resolver [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  resolve <call_id> <mentions.json>   Resolve a JSON array of raw mentions for one call");
    println!("  stats [--top N]                     Print entity statistics");
    println!("  search <name> [--type T] [--min S] [--limit N]");
    println!("                                      Fuzzy-search canonical entities");
    println!();
    println!("Options:");
    println!("  -h, --help                 Print help");
    println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
    println!("  -v, -vv, -vvv, -vvvv       Set log level to warn, info, debug, trace");
}
