//! `sqlite` store: embedded SQLite file shared by every worker on the host.
//!
//! ## Schema (v1)
//!
//! - `entities`: one row per canonical entity.  `UNIQUE(canonical_name,
//!   entity_type)` is the creation guard.  Aliases and metadata are JSON text.
//! - `occurrences`: append-only, `UNIQUE(entity_id, call_id, raw_name)`.
//! - `results`: latest [`EntityResolutionResult`] per `call_id`, as JSON.
//!
//! Every operation opens its own connection (WAL, `busy_timeout`), so
//! concurrent workers in one process contend exactly like separate
//! processes would.  Writes run in `IMMEDIATE` transactions; a busy or
//! locked database surfaces as [`AppError::StoreUnavailable`] for the
//! handle to retry.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};

use crate::error::AppError;
use crate::model::{
    AppendOutcome, CanonicalEntity, ContactDetails, EntityResolutionResult, EntityType, Occurrence,
    name_is_known,
};

use super::EntityStore;

/// Schema version stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const ENTITY_COLUMNS: &str = "entity_id, canonical_name, entity_type, aliases, email, phone, \
     company, title, metadata, first_seen, last_seen, total_mentions, call_count, \
     created_at, updated_at";

pub struct SqliteEntityStore {
    db_path: PathBuf,
}

impl SqliteEntityStore {
    /// Open (creating if needed) the database at `db_path` and apply the
    /// schema.  Parent directories are created.
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    AppError::StoreUnavailable(format!(
                        "sqlite: create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.init_db()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_conn(&self) -> Result<Connection, AppError> {
        let conn = Connection::open(&self.db_path).map_err(|e| {
            AppError::StoreUnavailable(format!("sqlite: open {}: {e}", self.db_path.display()))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| sql_err("set busy_timeout", e))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| sql_err("set journal_mode WAL", e))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| sql_err("set foreign_keys ON", e))?;
        Ok(conn)
    }

    fn init_db(&self) -> Result<(), AppError> {
        let conn = self.open_conn()?;
        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .map_err(|e| sql_err("read schema version", e))?;

        match version {
            0 => conn
                .execute_batch(
                    "
                    BEGIN IMMEDIATE;

                    CREATE TABLE IF NOT EXISTS entities (
                        entity_id TEXT PRIMARY KEY,
                        canonical_name TEXT NOT NULL,
                        entity_type TEXT NOT NULL,
                        aliases TEXT NOT NULL DEFAULT '[]',
                        email TEXT,
                        phone TEXT,
                        company TEXT,
                        title TEXT,
                        metadata TEXT NOT NULL DEFAULT '{}',
                        first_seen TEXT NOT NULL,
                        last_seen TEXT NOT NULL,
                        total_mentions INTEGER NOT NULL,
                        call_count INTEGER NOT NULL,
                        created_at TEXT NOT NULL,
                        updated_at TEXT NOT NULL,
                        UNIQUE (canonical_name, entity_type)
                    );

                    CREATE INDEX IF NOT EXISTS idx_entities_type ON entities (entity_type);

                    CREATE TABLE IF NOT EXISTS occurrences (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        entity_id TEXT NOT NULL REFERENCES entities (entity_id),
                        call_id TEXT NOT NULL,
                        raw_name TEXT NOT NULL,
                        entity_type TEXT NOT NULL,
                        mentions INTEGER NOT NULL,
                        context TEXT,
                        extracted_at TEXT NOT NULL,
                        UNIQUE (entity_id, call_id, raw_name)
                    );

                    CREATE TABLE IF NOT EXISTS results (
                        call_id TEXT PRIMARY KEY,
                        result TEXT NOT NULL,
                        resolved_at TEXT NOT NULL
                    );

                    PRAGMA user_version = 1;

                    COMMIT;
                    ",
                )
                .map_err(|e| sql_err("initialize schema", e)),
            SCHEMA_VERSION => Ok(()),
            other => Err(AppError::Store(format!(
                "sqlite: unsupported schema version {other} in {}",
                self.db_path.display()
            ))),
        }
    }
}

// ── Error mapping ─────────────────────────────────────────────────────────────

fn sql_err(context: &str, e: rusqlite::Error) -> AppError {
    let transient = matches!(
        e.sqlite_error_code(),
        Some(
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
        )
    );
    if transient {
        AppError::StoreUnavailable(format!("sqlite: {context}: {e}"))
    } else {
        AppError::Store(format!("sqlite: {context}: {e}"))
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        // A replayed insert trips the primary key on `entity_id` as well.
        rusqlite::Error::SqliteFailure(f, _) => matches!(
            f.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        ),
        _ => false,
    }
}

// ── Row conversion ────────────────────────────────────────────────────────────

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| AppError::Store(format!("sqlite: bad timestamp '{s}': {e}")))
}

fn parse_type(s: &str) -> Result<EntityType, AppError> {
    s.parse()
        .map_err(|_| AppError::Store(format!("sqlite: bad entity type '{s}'")))
}

fn count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

/// A counter as an SQLite INTEGER.  Values past `i64::MAX` are refused.
fn sql_count(field: &str, n: u64) -> Result<i64, AppError> {
    i64::try_from(n).map_err(|_| AppError::Store(format!("sqlite: {field} {n} exceeds INTEGER range")))
}

/// Column values as read, before parsing.
struct EntityRow {
    entity_id: String,
    canonical_name: String,
    entity_type: String,
    aliases: String,
    email: Option<String>,
    phone: Option<String>,
    company: Option<String>,
    title: Option<String>,
    metadata: String,
    first_seen: String,
    last_seen: String,
    total_mentions: i64,
    call_count: i64,
    created_at: String,
    updated_at: String,
}

impl EntityRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_id: row.get(0)?,
            canonical_name: row.get(1)?,
            entity_type: row.get(2)?,
            aliases: row.get(3)?,
            email: row.get(4)?,
            phone: row.get(5)?,
            company: row.get(6)?,
            title: row.get(7)?,
            metadata: row.get(8)?,
            first_seen: row.get(9)?,
            last_seen: row.get(10)?,
            total_mentions: row.get(11)?,
            call_count: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_entity(self, occurrences: Vec<Occurrence>) -> Result<CanonicalEntity, AppError> {
        let aliases: Vec<String> = serde_json::from_str(&self.aliases)?;
        let metadata: BTreeMap<String, String> = serde_json::from_str(&self.metadata)?;
        Ok(CanonicalEntity {
            entity_type: parse_type(&self.entity_type)?,
            first_seen: parse_ts(&self.first_seen)?,
            last_seen: parse_ts(&self.last_seen)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            entity_id: self.entity_id,
            canonical_name: self.canonical_name,
            aliases,
            email: self.email,
            phone: self.phone,
            company: self.company,
            title: self.title,
            metadata,
            total_mentions: count(self.total_mentions),
            call_count: count(self.call_count),
            occurrences,
        })
    }
}

struct OccurrenceRow {
    entity_id: String,
    call_id: String,
    raw_name: String,
    entity_type: String,
    mentions: i64,
    context: Option<String>,
    extracted_at: String,
}

impl OccurrenceRow {
    fn into_occurrence(self) -> Result<(String, Occurrence), AppError> {
        Ok((
            self.entity_id,
            Occurrence {
                call_id: self.call_id,
                raw_name: self.raw_name,
                entity_type: parse_type(&self.entity_type)?,
                mentions: count(self.mentions),
                context: self.context,
                extracted_at: parse_ts(&self.extracted_at)?,
            },
        ))
    }
}

/// Load entities matching `filter` (a SQL predicate on `entities`) with
/// their occurrences.  Runs both queries on `conn`, which the caller keeps
/// inside one transaction for a consistent snapshot.
fn load_entities(
    conn: &Connection,
    filter: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<CanonicalEntity>, AppError> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE {filter} ORDER BY entity_id");
    let mut stmt = conn.prepare(&sql).map_err(|e| sql_err("prepare entity query", e))?;
    let rows = stmt
        .query_map(args, EntityRow::read)
        .map_err(|e| sql_err("query entities", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| sql_err("read entity row", e))?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT o.entity_id, o.call_id, o.raw_name, o.entity_type, o.mentions, o.context, o.extracted_at \
         FROM occurrences o JOIN entities ON entities.entity_id = o.entity_id \
         WHERE {filter} ORDER BY o.id"
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| sql_err("prepare occurrence query", e))?;
    let occ_rows = stmt
        .query_map(args, |row| {
            Ok(OccurrenceRow {
                entity_id: row.get(0)?,
                call_id: row.get(1)?,
                raw_name: row.get(2)?,
                entity_type: row.get(3)?,
                mentions: row.get(4)?,
                context: row.get(5)?,
                extracted_at: row.get(6)?,
            })
        })
        .map_err(|e| sql_err("query occurrences", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| sql_err("read occurrence row", e))?;

    let mut by_entity: HashMap<String, Vec<Occurrence>> = HashMap::new();
    for row in occ_rows {
        let (entity_id, occ) = row.into_occurrence()?;
        by_entity.entry(entity_id).or_default().push(occ);
    }

    rows.into_iter()
        .map(|row| {
            let occs = by_entity.remove(&row.entity_id).unwrap_or_default();
            row.into_entity(occs)
        })
        .collect()
}

fn load_one(conn: &Connection, entity_id: &str) -> Result<Option<CanonicalEntity>, AppError> {
    Ok(load_entities(conn, "entities.entity_id = ?1", &[&entity_id])?
        .into_iter()
        .next())
}

fn insert_occurrence(conn: &Connection, entity_id: &str, occ: &Occurrence) -> Result<usize, AppError> {
    let mentions = sql_count("mentions", occ.mentions)?;
    conn.execute(
        "INSERT INTO occurrences (entity_id, call_id, raw_name, entity_type, mentions, context, extracted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entity_id,
            occ.call_id,
            occ.raw_name,
            occ.entity_type.as_str(),
            mentions,
            occ.context,
            ts(&occ.extracted_at),
        ],
    )
    .map_err(|e| sql_err("insert occurrence", e))
}

// ── EntityStore impl ──────────────────────────────────────────────────────────

impl EntityStore for SqliteEntityStore {
    fn store_type(&self) -> &str {
        "sqlite"
    }

    fn find_by_key(
        &self,
        canonical_name: &str,
        entity_type: EntityType,
    ) -> Result<Option<CanonicalEntity>, AppError> {
        let mut conn = self.open_conn()?;
        let tx = conn.transaction().map_err(|e| sql_err("begin read", e))?;
        let found = load_entities(
            &tx,
            "entities.canonical_name = ?1 AND entities.entity_type = ?2",
            &[&canonical_name, &entity_type.as_str()],
        )?;
        Ok(found.into_iter().next())
    }

    fn get(&self, entity_id: &str) -> Result<Option<CanonicalEntity>, AppError> {
        let mut conn = self.open_conn()?;
        let tx = conn.transaction().map_err(|e| sql_err("begin read", e))?;
        load_one(&tx, entity_id)
    }

    fn list_by_type(&self, entity_type: EntityType) -> Result<Vec<CanonicalEntity>, AppError> {
        let mut conn = self.open_conn()?;
        let tx = conn.transaction().map_err(|e| sql_err("begin read", e))?;
        load_entities(&tx, "entities.entity_type = ?1", &[&entity_type.as_str()])
    }

    fn list_all(&self) -> Result<Vec<CanonicalEntity>, AppError> {
        let mut conn = self.open_conn()?;
        let tx = conn.transaction().map_err(|e| sql_err("begin read", e))?;
        load_entities(&tx, "1 = 1", &[])
    }

    fn insert_new(&self, entity: &CanonicalEntity) -> Result<(), AppError> {
        let mut conn = self.open_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| sql_err("begin insert", e))?;

        let inserted = tx.execute(
            &format!(
                "INSERT INTO entities ({ENTITY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                entity.entity_id,
                entity.canonical_name,
                entity.entity_type.as_str(),
                serde_json::to_string(&entity.aliases)?,
                entity.email,
                entity.phone,
                entity.company,
                entity.title,
                serde_json::to_string(&entity.metadata)?,
                ts(&entity.first_seen),
                ts(&entity.last_seen),
                sql_count("total_mentions", entity.total_mentions)?,
                sql_count("call_count", entity.call_count)?,
                ts(&entity.created_at),
                ts(&entity.updated_at),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::UniquenessConflict {
                    canonical_name: entity.canonical_name.clone(),
                    entity_type: entity.entity_type.to_string(),
                });
            }
            Err(e) => return Err(sql_err("insert entity", e)),
        }

        for occ in &entity.occurrences {
            insert_occurrence(&tx, &entity.entity_id, occ)?;
        }
        tx.commit().map_err(|e| sql_err("commit insert", e))
    }

    fn append_occurrence(
        &self,
        entity_id: &str,
        occurrence: &Occurrence,
        alias: Option<&str>,
    ) -> Result<AppendOutcome, AppError> {
        let mut conn = self.open_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| sql_err("begin append", e))?;

        let head: Option<(String, String, String, String, i64, i64)> = tx
            .query_row(
                "SELECT canonical_name, aliases, last_seen, updated_at, total_mentions, call_count
                 FROM entities WHERE entity_id = ?1",
                params![entity_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
            )
            .optional()
            .map_err(|e| sql_err("read entity", e))?;
        let (canonical_name, aliases, last_seen, updated_at, total_mentions, call_count) =
            head.ok_or_else(|| AppError::NotFound(format!("entity {entity_id}")))?;

        let (already, seen_call): (bool, bool) = tx
            .query_row(
                "SELECT
                    EXISTS (SELECT 1 FROM occurrences WHERE entity_id = ?1 AND call_id = ?2 AND raw_name = ?3),
                    EXISTS (SELECT 1 FROM occurrences WHERE entity_id = ?1 AND call_id = ?2)",
                params![entity_id, occurrence.call_id, occurrence.raw_name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| sql_err("check occurrence", e))?;
        if already {
            return Ok(AppendOutcome::AlreadyRecorded);
        }

        insert_occurrence(&tx, entity_id, occurrence)?;
        let total_mentions = count(total_mentions).saturating_add(occurrence.mentions);
        let call_count = count(call_count).saturating_add(u64::from(!seen_call));

        let mut aliases: Vec<String> = serde_json::from_str(&aliases)?;
        if let Some(alias) = alias {
            if !name_is_known(&canonical_name, &aliases, alias) {
                aliases.push(alias.to_string());
            }
        }
        let last_seen = parse_ts(&last_seen)?.max(occurrence.extracted_at);
        let updated_at = parse_ts(&updated_at)?.max(occurrence.extracted_at);

        tx.execute(
            "UPDATE entities SET
                total_mentions = ?2,
                call_count = ?3,
                last_seen = ?4,
                updated_at = ?5,
                aliases = ?6
             WHERE entity_id = ?1",
            params![
                entity_id,
                sql_count("total_mentions", total_mentions)?,
                sql_count("call_count", call_count)?,
                ts(&last_seen),
                ts(&updated_at),
                serde_json::to_string(&aliases)?,
            ],
        )
        .map_err(|e| sql_err("update entity", e))?;

        tx.commit().map_err(|e| sql_err("commit append", e))?;
        Ok(AppendOutcome::Appended)
    }

    fn enrich(
        &self,
        entity_id: &str,
        details: &ContactDetails,
        now: DateTime<Utc>,
    ) -> Result<CanonicalEntity, AppError> {
        let mut conn = self.open_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| sql_err("begin enrich", e))?;

        let mut entity = load_one(&tx, entity_id)?
            .ok_or_else(|| AppError::NotFound(format!("entity {entity_id}")))?;
        entity.enrich(details, now);

        tx.execute(
            "UPDATE entities SET email = ?2, phone = ?3, company = ?4, title = ?5,
                metadata = ?6, updated_at = ?7
             WHERE entity_id = ?1",
            params![
                entity_id,
                entity.email,
                entity.phone,
                entity.company,
                entity.title,
                serde_json::to_string(&entity.metadata)?,
                ts(&entity.updated_at),
            ],
        )
        .map_err(|e| sql_err("update enrichment", e))?;
        tx.commit().map_err(|e| sql_err("commit enrich", e))?;
        Ok(entity)
    }

    fn save_result(&self, result: &EntityResolutionResult) -> Result<(), AppError> {
        let conn = self.open_conn()?;
        conn.execute(
            "INSERT INTO results (call_id, result, resolved_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (call_id) DO UPDATE SET result = excluded.result, resolved_at = excluded.resolved_at",
            params![
                result.call_id,
                serde_json::to_string(result)?,
                ts(&result.resolved_at),
            ],
        )
        .map_err(|e| sql_err("save result", e))?;
        Ok(())
    }

    fn result_for_call(&self, call_id: &str) -> Result<Option<EntityResolutionResult>, AppError> {
        let conn = self.open_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT result FROM results WHERE call_id = ?1",
                params![call_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| sql_err("read result", e))?;
        raw.map(|r| serde_json::from_str(&r).map_err(AppError::from))
            .transpose()
    }
}
