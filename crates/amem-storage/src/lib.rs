use amem_core::contracts::TypeCount;
use amem_core::{
    ContractError, MemoryConfig, NewObservation, Observation, ObservationId, ObservationType,
    DEFAULT_CONFIDENCE,
};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

mod lifecycle;
mod search;
mod timeline;

pub use lifecycle::{ArchiveOutcome, StoreStatus, VacuumOutcome};

pub const MEMORY_SCHEMA_VERSION: i64 = 2;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const OBSERVATION_COLUMNS: &str = "id, type, narrative, facts, confidence, files_read, \
     files_modified, concepts, bead_id, created_at, expires_at";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage unavailable at {path}: {reason}")]
    Unavailable { path: String, reason: String },
    #[error("query syntax error: {0}")]
    QuerySyntax(String),
    #[error("validation error: {0}")]
    Validation(#[from] ContractError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

pub struct MemoryStore {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn open_config(config: &MemoryConfig) -> Result<Self, StorageError> {
        Self::open(config.memory_db_path())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| unavailable(parent, err))?;
        }

        let conn = Connection::open(path).map_err(|err| unavailable(path, err))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|err| unavailable(path, err))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(|err| unavailable(path, err))?;

        let store = Self {
            conn,
            db_path: Some(path.to_path_buf()),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn,
            db_path: None,
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn memory_dir(&self) -> Option<&Path> {
        self.db_path
            .as_deref()
            .and_then(Path::parent)
            .filter(|dir| !dir.as_os_str().is_empty())
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    /// Applies pending migrations in one transaction and returns the versions
    /// applied. Safe to call on every open.
    pub fn migrate(&self) -> Result<Vec<i64>, StorageError> {
        let tx = self.write_transaction()?;
        let current: i64 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if current > MEMORY_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: MEMORY_SCHEMA_VERSION,
            });
        }

        let mut applied = Vec::new();
        if current < 1 {
            tx.execute_batch(include_str!("../migrations/0001_observations.sql"))?;
            tx.pragma_update(None, "user_version", 1)?;
            applied.push(1);
        }

        if current < 2 {
            for (column, ddl) in [
                (
                    "concepts",
                    "ALTER TABLE observations ADD COLUMN concepts TEXT NOT NULL DEFAULT '[]'",
                ),
                ("bead_id", "ALTER TABLE observations ADD COLUMN bead_id TEXT"),
                (
                    "expires_at",
                    "ALTER TABLE observations ADD COLUMN expires_at TEXT",
                ),
            ] {
                if !column_exists(&tx, "observations", column)? {
                    tx.execute(ddl, [])?;
                }
            }
            tx.execute_batch(include_str!("../migrations/0002_concepts_bead_link.sql"))?;
            tx.pragma_update(None, "user_version", 2)?;
            applied.push(2);
        }

        tx.commit()?;
        if !applied.is_empty() {
            info!("schema_migrated: from={current} applied={applied:?}");
        }
        Ok(applied)
    }

    pub fn create(&self, observation: &NewObservation) -> Result<ObservationId, StorageError> {
        self.create_at(observation, Utc::now())
    }

    pub fn create_at(
        &self,
        observation: &NewObservation,
        created_at: DateTime<Utc>,
    ) -> Result<ObservationId, StorageError> {
        let tx = self.write_transaction()?;
        let id = insert_observation(&tx, observation, created_at)?;
        tx.commit()?;
        debug!("observation_created: id={id} type={}", observation.kind);
        Ok(id)
    }

    /// Inserts `observation` unless an observation of the same type already
    /// carries its `bead_id`. Check and insert share one write transaction.
    pub fn create_once_per_task(
        &self,
        observation: &NewObservation,
    ) -> Result<Option<ObservationId>, StorageError> {
        let bead_id = observation
            .bead_id
            .as_deref()
            .map(str::trim)
            .filter(|bead_id| !bead_id.is_empty())
            .ok_or(ContractError::MissingField("bead_id"))?;

        let tx = self.write_transaction()?;
        let existing = tx
            .query_row(
                "SELECT id FROM observations WHERE type = ?1 AND bead_id = ?2 LIMIT 1",
                params![observation.kind.as_str(), bead_id],
                |row| row.get::<_, ObservationId>(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(None);
        }

        let id = insert_observation(&tx, observation, Utc::now())?;
        tx.commit()?;
        Ok(Some(id))
    }

    pub fn fetch(&self, id: ObservationId) -> Result<Option<Observation>, StorageError> {
        let sql = format!("SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [id], observation_from_row)
            .optional()?)
    }

    /// Returns the live rows among `ids`, ascending by id. Unknown ids are
    /// skipped.
    pub fn fetch_by_ids(&self, ids: &[ObservationId]) -> Result<Vec<Observation>, StorageError> {
        let ids = ids.iter().copied().collect::<BTreeSet<_>>();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id IN ({placeholders}) ORDER BY id ASC"
        );
        let mut statement = self.conn.prepare(&sql)?;
        let rows = statement.query_map(params_from_iter(ids.iter()), observation_from_row)?;
        collect_rows(rows)
    }

    pub fn observations_by_type(
        &self,
        kind: ObservationType,
        limit: usize,
    ) -> Result<Vec<Observation>, StorageError> {
        let sql = format!(
            "
            SELECT {OBSERVATION_COLUMNS}
            FROM observations
            WHERE type = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "
        );
        let mut statement = self.conn.prepare(&sql)?;
        let rows = statement.query_map(
            params![kind.as_str(), limit_param(limit)],
            observation_from_row,
        )?;
        collect_rows(rows)
    }

    pub fn observations_by_bead(&self, bead_id: &str) -> Result<Vec<Observation>, StorageError> {
        let sql = format!(
            "
            SELECT {OBSERVATION_COLUMNS}
            FROM observations
            WHERE bead_id = ?1
            ORDER BY created_at DESC, id DESC
            "
        );
        let mut statement = self.conn.prepare(&sql)?;
        let rows = statement.query_map([bead_id], observation_from_row)?;
        collect_rows(rows)
    }

    /// Observations of the given types that reference an external task.
    pub fn task_linked_observations(
        &self,
        kinds: &[ObservationType],
    ) -> Result<Vec<Observation>, StorageError> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; kinds.len()].join(",");
        let sql = format!(
            "
            SELECT {OBSERVATION_COLUMNS}
            FROM observations
            WHERE bead_id IS NOT NULL AND type IN ({placeholders})
            ORDER BY id ASC
            "
        );
        let mut statement = self.conn.prepare(&sql)?;
        let rows = statement.query_map(
            params_from_iter(kinds.iter().map(ObservationType::as_str)),
            observation_from_row,
        )?;
        collect_rows(rows)
    }

    /// Appends `concept` unless already present. Returns whether the row
    /// changed; an unknown id is not an error.
    pub fn link_concept(&self, id: ObservationId, concept: &str) -> Result<bool, StorageError> {
        let concept = concept.trim();
        if concept.is_empty() {
            return Err(ContractError::BlankConcept.into());
        }

        let tx = self.write_transaction()?;
        let concepts_json: Option<Option<String>> = tx
            .query_row(
                "SELECT concepts FROM observations WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(concepts_json) = concepts_json else {
            return Ok(false);
        };

        let mut concepts = decode_list(concepts_json.as_deref())?;
        if concepts.iter().any(|existing| existing == concept) {
            return Ok(false);
        }
        concepts.push(concept.to_string());
        tx.execute(
            "UPDATE observations SET concepts = ?1 WHERE id = ?2",
            params![encode_list(&concepts)?, id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Points `id` at an external task. Returns whether the observation exists.
    pub fn set_bead_id(&self, id: ObservationId, bead_id: &str) -> Result<bool, StorageError> {
        let bead_id = bead_id.trim();
        if bead_id.is_empty() {
            return Err(ContractError::MissingField("bead_id").into());
        }

        let tx = self.write_transaction()?;
        let changes = tx.execute(
            "UPDATE observations SET bead_id = ?1 WHERE id = ?2",
            params![bead_id, id],
        )?;
        tx.commit()?;
        Ok(changes > 0)
    }

    pub fn count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?)
    }

    pub fn count_by_type(&self) -> Result<Vec<TypeCount>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT type, COUNT(*)
            FROM observations
            GROUP BY type
            ORDER BY type ASC
            ",
        )?;
        let rows = statement.query_map([], |row| {
            Ok(TypeCount {
                kind: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        collect_rows(rows)
    }

    /// Reads a UTF-8 file that lives under the memory directory.
    pub fn read_memory_file(&self, relative_path: &str) -> Result<Option<String>, StorageError> {
        let Some(memory_dir) = self.memory_dir() else {
            return Ok(None);
        };
        let relative = Path::new(relative_path);
        let escapes = relative_path.trim().is_empty()
            || relative.components().any(|component| {
                !matches!(component, Component::Normal(_) | Component::CurDir)
            });
        if escapes {
            return Err(ContractError::InvalidPath {
                path: relative_path.to_string(),
                reason: "must be a relative path inside the memory directory".to_string(),
            }
            .into());
        }

        match fs::read_to_string(memory_dir.join(relative)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn write_transaction(&self) -> Result<Transaction<'_>, StorageError> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

fn insert_observation(
    conn: &Connection,
    observation: &NewObservation,
    created_at: DateTime<Utc>,
) -> Result<ObservationId, StorageError> {
    let facts_json = encode_list(&observation.facts)?;
    let files_read_json = encode_list(&observation.files_read)?;
    let files_modified_json = encode_list(&observation.files_modified)?;
    let concepts_json = encode_list(&observation.normalized_concepts())?;
    let bead_id = observation
        .bead_id
        .as_deref()
        .map(str::trim)
        .filter(|bead_id| !bead_id.is_empty());

    conn.execute(
        "
        INSERT INTO observations (
            type,
            narrative,
            facts,
            confidence,
            files_read,
            files_modified,
            concepts,
            bead_id,
            created_at,
            expires_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ",
        params![
            observation.kind.as_str(),
            observation.narrative,
            facts_json,
            observation.confidence_or_default(),
            files_read_json,
            files_modified_json,
            concepts_json,
            bead_id,
            format_timestamp(created_at),
            observation.expires_at.map(format_timestamp),
        ],
    )?;
    let id = conn.last_insert_rowid();
    search::index_observation(conn, id, observation.kind, &observation.narrative, &facts_json)?;
    Ok(id)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, StorageError> {
    let mut statement = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = statement.query_map([], |row| row.get::<_, String>(1))?;
    for row in rows {
        if row? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<Observation> {
    Ok(Observation {
        id: row.get(0)?,
        kind: kind_column(row, 1)?,
        narrative: row.get(2)?,
        facts: list_column(row, 3)?,
        confidence: row
            .get::<_, Option<f64>>(4)?
            .unwrap_or(DEFAULT_CONFIDENCE),
        files_read: list_column(row, 5)?,
        files_modified: list_column(row, 6)?,
        concepts: list_column(row, 7)?,
        bead_id: row.get(8)?,
        created_at: timestamp_column(row, 9)?,
        expires_at: row
            .get::<_, Option<String>>(10)?
            .map(|value| parse_timestamp(&value))
            .transpose()
            .map_err(|err| conversion_failure(10, err))?,
    })
}

pub(crate) fn kind_column(row: &Row<'_>, index: usize) -> rusqlite::Result<ObservationType> {
    let raw: String = row.get(index)?;
    raw.parse::<ObservationType>()
        .map_err(|err| conversion_failure(index, err))
}

pub(crate) fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    parse_timestamp(&raw).map_err(|err| conversion_failure(index, err))
}

fn list_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Vec<String>> {
    let raw: Option<String> = row.get(index)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(json) => serde_json::from_str(json).map_err(|err| conversion_failure(index, err)),
    }
}

fn conversion_failure<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, StorageError> {
    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

pub(crate) fn encode_list(values: &[String]) -> Result<String, StorageError> {
    serde_json::to_string(values).map_err(|err| StorageError::Serialization(err.to_string()))
}

fn decode_list(value: Option<&str>) -> Result<Vec<String>, StorageError> {
    match value.map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(json) => {
            serde_json::from_str(json).map_err(|err| StorageError::Serialization(err.to_string()))
        }
    }
}

pub(crate) fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Fixed-width UTC form so that text order in SQLite equals time order.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp
        .trunc_subsecs(6)
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(value) {
        Ok(timestamp) => Ok(timestamp.with_timezone(&Utc)),
        Err(err) => NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
            .map(|naive| naive.and_utc())
            .map_err(|_| err),
    }
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> StorageError {
    StorageError::Unavailable {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 23, 14, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn full_observation() -> NewObservation {
        NewObservation::new(ObservationType::Decision, "Chose index-based search")
            .with_facts(vec!["fts5 ships with sqlite".to_string(), "no server".to_string()])
            .with_confidence(0.9)
            .with_files(
                vec!["src/search.rs".to_string()],
                vec!["src/lib.rs".to_string(), "Cargo.toml".to_string()],
            )
            .with_concepts(vec!["search".to_string(), "sqlite".to_string()])
            .with_bead_id("bd-7")
            .with_expires_at(ts() + chrono::Duration::days(30))
    }

    #[test]
    fn migration_creates_tables_and_schema_version() {
        let store = MemoryStore::open_in_memory().expect("open db");

        for table in ["observations", "observations_fts"] {
            assert!(store.table_exists(table).expect("table check"));
        }
        assert_eq!(
            store.schema_version().expect("schema version"),
            MEMORY_SCHEMA_VERSION
        );
        assert!(store.migrate().expect("re-run migrate").is_empty());
    }

    #[test]
    fn create_then_fetch_round_trips_every_field() {
        let store = MemoryStore::open_in_memory().expect("open db");
        let input = full_observation();
        let id = store.create_at(&input, ts()).expect("create");

        let loaded = store.fetch_by_ids(&[id]).expect("fetch");
        assert_eq!(loaded.len(), 1);
        let loaded = &loaded[0];
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.kind, input.kind);
        assert_eq!(loaded.narrative, input.narrative);
        assert_eq!(loaded.facts, input.facts);
        assert_eq!(loaded.confidence, 0.9);
        assert_eq!(loaded.files_read, input.files_read);
        assert_eq!(loaded.files_modified, input.files_modified);
        assert_eq!(loaded.concepts, input.concepts);
        assert_eq!(loaded.bead_id.as_deref(), Some("bd-7"));
        assert_eq!(loaded.created_at, ts());
        assert_eq!(loaded.expires_at, input.expires_at);
    }

    #[test]
    fn omitted_fields_take_defaults_and_empty_narrative_is_accepted() {
        let store = MemoryStore::open_in_memory().expect("open db");
        let id = store
            .create(&NewObservation::new(ObservationType::Progress, ""))
            .expect("create");

        let loaded = store.fetch(id).expect("fetch").expect("exists");
        assert_eq!(loaded.narrative, "");
        assert_eq!(loaded.confidence, 1.0);
        assert!(loaded.facts.is_empty());
        assert!(loaded.files_read.is_empty());
        assert!(loaded.files_modified.is_empty());
        assert!(loaded.concepts.is_empty());
        assert!(loaded.bead_id.is_none());
        assert!(loaded.expires_at.is_none());
    }

    #[test]
    fn ids_increase_and_are_not_reused_after_delete() {
        let store = MemoryStore::open_in_memory().expect("open db");
        let first = store
            .create_at(&NewObservation::new(ObservationType::Learning, "a"), ts())
            .expect("first");
        let second = store
            .create(&NewObservation::new(ObservationType::Learning, "b"))
            .expect("second");
        assert!(second > first);

        store.archive_before(ts() + chrono::Duration::seconds(1), false)
            .expect("archive first");
        let third = store
            .create(&NewObservation::new(ObservationType::Learning, "c"))
            .expect("third");
        assert!(third > second);
    }

    #[test]
    fn fetch_skips_unknown_ids_and_deduplicates() {
        let store = MemoryStore::open_in_memory().expect("open db");
        let id = store
            .create(&NewObservation::new(ObservationType::Blocker, "stuck"))
            .expect("create");

        let loaded = store.fetch_by_ids(&[id, 999, id]).expect("fetch");
        assert_eq!(loaded.len(), 1);
        assert!(store.fetch_by_ids(&[]).expect("empty").is_empty());
        assert!(store.fetch(999).expect("fetch missing").is_none());
    }

    #[test]
    fn link_concept_appends_once_and_ignores_unknown_ids() {
        let store = MemoryStore::open_in_memory().expect("open db");
        let id = store
            .create(
                &NewObservation::new(ObservationType::Learning, "wal helps readers")
                    .with_concepts(vec!["sqlite".to_string()]),
            )
            .expect("create");

        assert!(store.link_concept(id, "wal").expect("link"));
        assert!(!store.link_concept(id, "wal").expect("relink"));
        assert!(!store.link_concept(id, " sqlite ").expect("existing"));
        assert!(!store.link_concept(404, "wal").expect("unknown id"));
        assert!(matches!(
            store.link_concept(id, "  "),
            Err(StorageError::Validation(ContractError::BlankConcept))
        ));

        let loaded = store.fetch(id).expect("fetch").expect("exists");
        assert_eq!(loaded.concepts, vec!["sqlite".to_string(), "wal".to_string()]);
        assert_eq!(loaded.narrative, "wal helps readers");
    }

    #[test]
    fn set_bead_id_is_reassignable_and_idempotent() {
        let store = MemoryStore::open_in_memory().expect("open db");
        let id = store
            .create(&NewObservation::new(ObservationType::Decision, "use beads"))
            .expect("create");

        assert!(store.set_bead_id(id, "bd-1").expect("link"));
        assert!(store.set_bead_id(id, "bd-1").expect("relink"));
        assert!(store.set_bead_id(id, "bd-2").expect("reassign"));
        assert!(!store.set_bead_id(77, "bd-2").expect("unknown"));

        assert!(store.observations_by_bead("bd-1").expect("by bead").is_empty());
        let linked = store.observations_by_bead("bd-2").expect("by bead");
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].id, id);
    }

    #[test]
    fn create_once_per_task_skips_existing_task_observation() {
        let store = MemoryStore::open_in_memory().expect("open db");
        let synced = NewObservation::new(ObservationType::Progress, "Finish parser").with_bead_id("bd-3");

        assert!(store.create_once_per_task(&synced).expect("first").is_some());
        assert!(store.create_once_per_task(&synced).expect("second").is_none());
        assert_eq!(store.count().expect("count"), 1);

        let unlinked = NewObservation::new(ObservationType::Progress, "no task");
        assert!(matches!(
            store.create_once_per_task(&unlinked),
            Err(StorageError::Validation(ContractError::MissingField("bead_id")))
        ));
    }

    #[test]
    fn observations_by_type_returns_newest_first() {
        let store = MemoryStore::open_in_memory().expect("open db");
        for offset in 0..3 {
            store
                .create_at(
                    &NewObservation::new(ObservationType::Handoff, format!("handoff {offset}")),
                    ts() + chrono::Duration::minutes(offset),
                )
                .expect("create");
        }
        store
            .create_at(&NewObservation::new(ObservationType::Learning, "other"), ts())
            .expect("create");

        let handoffs = store
            .observations_by_type(ObservationType::Handoff, 2)
            .expect("by type");
        let narratives = handoffs
            .iter()
            .map(|observation| observation.narrative.as_str())
            .collect::<Vec<_>>();
        assert_eq!(narratives, vec!["handoff 2", "handoff 1"]);
    }

    #[test]
    fn count_by_type_groups_rows() {
        let store = MemoryStore::open_in_memory().expect("open db");
        for kind in [
            ObservationType::Decision,
            ObservationType::Decision,
            ObservationType::Blocker,
        ] {
            store.create(&NewObservation::new(kind, "x")).expect("create");
        }

        assert_eq!(store.count().expect("count"), 3);
        assert_eq!(
            store.count_by_type().expect("by type"),
            vec![
                TypeCount {
                    kind: "blocker".to_string(),
                    count: 1
                },
                TypeCount {
                    kind: "decision".to_string(),
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn open_creates_missing_directory_and_reopens() {
        let dir = tempdir().expect("temp dir");
        let db_path = dir.path().join("nested/memory/memory.db");

        let id = {
            let store = MemoryStore::open(&db_path).expect("open");
            store
                .create(&NewObservation::new(ObservationType::Learning, "persisted"))
                .expect("create")
        };

        let reopened = MemoryStore::open(&db_path).expect("reopen");
        let loaded = reopened.fetch(id).expect("fetch").expect("exists");
        assert_eq!(loaded.narrative, "persisted");
        assert_eq!(reopened.schema_version().expect("version"), MEMORY_SCHEMA_VERSION);
    }

    #[test]
    fn open_reports_unavailable_when_directory_cannot_be_created() {
        let dir = tempdir().expect("temp dir");
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").expect("write file");

        let result = MemoryStore::open(blocker.join("memory.db"));
        assert!(matches!(result, Err(StorageError::Unavailable { .. })));
    }

    #[test]
    fn newer_schema_versions_are_rejected() {
        let dir = tempdir().expect("temp dir");
        let db_path = dir.path().join("memory.db");
        {
            let conn = Connection::open(&db_path).expect("raw open");
            conn.pragma_update(None, "user_version", 9).expect("bump");
        }

        assert!(matches!(
            MemoryStore::open(&db_path),
            Err(StorageError::UnsupportedSchemaVersion { found: 9, .. })
        ));
    }

    #[test]
    fn read_memory_file_stays_inside_memory_dir() {
        let dir = tempdir().expect("temp dir");
        let store = MemoryStore::open(dir.path().join("memory.db")).expect("open");
        fs::create_dir_all(dir.path().join("notes")).expect("mkdir");
        fs::write(dir.path().join("notes/handoff.md"), "next: wire sync").expect("write");

        assert_eq!(
            store.read_memory_file("notes/handoff.md").expect("read"),
            Some("next: wire sync".to_string())
        );
        assert_eq!(store.read_memory_file("missing.md").expect("read"), None);
        for escaping in ["../secret", "/etc/passwd", ""] {
            assert!(matches!(
                store.read_memory_file(escaping),
                Err(StorageError::Validation(ContractError::InvalidPath { .. }))
            ));
        }
    }

    #[test]
    fn timestamps_format_with_fixed_width() {
        let formatted = format_timestamp(ts());
        assert_eq!(formatted, "2026-02-23T14:00:00.000000Z");
        assert_eq!(parse_timestamp(&formatted).expect("parse"), ts());
        assert_eq!(
            parse_timestamp("2026-02-23 14:00:00").expect("legacy parse"),
            ts()
        );
    }
}
