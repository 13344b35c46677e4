//! Append-only advisory history: record log plus sync-run ledger.

use std::error::Error;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, FixedOffset};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::normalizer::{UpdateDate, UpdateRecord};

/// Metadata for one observation cycle that produced a new content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRun {
    /// When the fetch occurred, in the configured offset.
    pub timestamp: DateTime<FixedOffset>,
    /// Lowercase hex SHA-256 of the raw payload.
    pub content_hash: String,
    /// Human-readable log line for this run.
    pub message: String,
}

impl SyncRun {
    /// Builds a sync-run entry.
    pub fn new(timestamp: DateTime<FixedOffset>, content_hash: String, message: String) -> Self {
        Self {
            timestamp,
            content_hash,
            message,
        }
    }
}

/// Errors surfaced by history-store implementations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite failure.
    Sqlite(rusqlite::Error),
    /// A stored timestamp could not be parsed back.
    BadTimestamp(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::BadTimestamp(raw) => write!(f, "unparseable stored timestamp: {raw}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::BadTimestamp(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(err)
    }
}

/// Durable, append-only history consumed by the change detector.
///
/// Records are never edited or deleted once persisted; `append` commits the
/// run metadata and the record batch together or not at all.
pub trait HistoryStore {
    /// True when no sync run has ever been recorded.
    fn is_empty(&self) -> Result<bool, StoreError>;

    /// The most recent sync run, if any.
    fn last_run(&self) -> Result<Option<SyncRun>, StoreError>;

    /// Every persisted record, oldest first (insertion order).
    fn all_records(&self) -> Result<Vec<UpdateRecord>, StoreError>;

    /// Atomically appends a sync run and its discovered records.
    fn append(&self, run: &SyncRun, records: &[UpdateRecord]) -> Result<(), StoreError>;
}

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS runs (
    run_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    logged_at    TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    log_message  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS updates (
    update_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    update_date  TEXT NOT NULL,
    product      TEXT NOT NULL,
    target       TEXT NOT NULL,
    link         TEXT,
    content_hash TEXT NOT NULL
);
";

/// SQLite-backed history store.
///
/// The connection sits behind a mutex: the poll loop is the only writer, but
/// the store itself enforces one accessor at a time.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (and if needed creates) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let existed = path.is_file();
        let conn = Connection::open(path)?;
        if !existed {
            info!(db = %path.display(), "database created");
        }
        Self::from_connection(conn)
    }

    /// Opens an in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut conn)
    }
}

impl HistoryStore for SqliteStore {
    fn is_empty(&self) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
            Ok(count == 0)
        })
    }

    fn last_run(&self) -> Result<Option<SyncRun>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT logged_at, content_hash, log_message \
                     FROM runs ORDER BY run_id DESC LIMIT 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;

            match row {
                None => Ok(None),
                Some((logged_at, content_hash, message)) => {
                    let timestamp = DateTime::parse_from_rfc3339(&logged_at)
                        .map_err(|_| StoreError::BadTimestamp(logged_at))?;
                    Ok(Some(SyncRun::new(timestamp, content_hash, message)))
                }
            }
        })
    }

    fn all_records(&self) -> Result<Vec<UpdateRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT update_date, product, target, link \
                 FROM updates ORDER BY update_id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(UpdateRecord::new(
                    UpdateDate::from_storage(&row.get::<_, String>(0)?),
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                ))
            })?;

            let mut records = Vec::new();
            for record in rows {
                records.push(record?);
            }
            Ok(records)
        })
    }

    fn append(&self, run: &SyncRun, records: &[UpdateRecord]) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO runs (logged_at, content_hash, log_message) VALUES (?1, ?2, ?3)",
                params![run.timestamp.to_rfc3339(), run.content_hash, run.message],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO updates (update_date, product, target, link, content_hash) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for record in records {
                    stmt.execute(params![
                        record.date.storage(),
                        record.product,
                        record.target,
                        record.link,
                        run.content_hash,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}

/// In-memory history store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    runs: Vec<SyncRun>,
    records: Vec<UpdateRecord>,
}

impl MemoryStore {
    /// Builds an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded sync runs.
    pub fn run_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).runs.len()
    }
}

impl HistoryStore for MemoryStore {
    fn is_empty(&self) -> Result<bool, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.runs.is_empty())
    }

    fn last_run(&self) -> Result<Option<SyncRun>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.runs.last().cloned())
    }

    fn all_records(&self) -> Result<Vec<UpdateRecord>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.records.clone())
    }

    fn append(&self, run: &SyncRun, records: &[UpdateRecord]) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.runs.push(run.clone());
        state.records.extend_from_slice(records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_run(hash: &str) -> SyncRun {
        let offset = FixedOffset::west_opt(4 * 3600).unwrap();
        let timestamp = offset.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        SyncRun::new(timestamp, hash.to_string(), format!("'{hash}' update."))
    }

    fn sample_record(product: &str, link: Option<&str>) -> UpdateRecord {
        UpdateRecord::new(
            UpdateDate::from_storage("2024-03-15"),
            product.to_string(),
            "macOS".to_string(),
            link.map(str::to_string),
        )
    }

    #[test]
    fn fresh_database_is_empty() {
        let store = SqliteStore::open_in_memory().expect("open");
        assert!(store.is_empty().expect("is_empty"));
        assert_eq!(store.last_run().expect("last_run"), None);
        assert!(store.all_records().expect("all_records").is_empty());
    }

    #[test]
    fn append_round_trips_run_and_records() {
        let store = SqliteStore::open_in_memory().expect("open");
        let run = sample_run("h1");
        let records = vec![
            sample_record("Safari 17.4", Some("https://support.apple.com/HT1")),
            sample_record("macOS Sonoma 14.4", None),
        ];
        store.append(&run, &records).expect("append");

        assert!(!store.is_empty().expect("is_empty"));
        let stored_run = store.last_run().expect("last_run").expect("some run");
        assert_eq!(stored_run, run);

        let stored = store.all_records().expect("all_records");
        assert_eq!(stored, records);
        assert_eq!(stored[1].link, None);
    }

    #[test]
    fn records_keep_insertion_order_across_appends() {
        let store = SqliteStore::open_in_memory().expect("open");
        store
            .append(&sample_run("h1"), &[sample_record("first", None)])
            .expect("append h1");
        store
            .append(&sample_run("h2"), &[sample_record("second", None)])
            .expect("append h2");

        let products: Vec<_> = store
            .all_records()
            .expect("all_records")
            .into_iter()
            .map(|r| r.product)
            .collect();
        assert_eq!(products, vec!["first", "second"]);
        assert_eq!(
            store.last_run().expect("last_run").unwrap().content_hash,
            "h2"
        );
    }

    #[test]
    fn sentinel_dates_survive_storage() {
        let store = SqliteStore::open_in_memory().expect("open");
        let record = UpdateRecord::new(
            UpdateDate::Preinstalled("Preinstalado".to_string()),
            "iOS 17".to_string(),
            "iPhone".to_string(),
            None,
        );
        store.append(&sample_run("h1"), &[record.clone()]).expect("append");
        assert_eq!(store.all_records().expect("all_records"), vec![record]);
    }

    #[test]
    fn memory_store_mirrors_sqlite_contract() {
        let store = MemoryStore::new();
        assert!(store.is_empty().expect("empty"));
        store
            .append(&sample_run("h1"), &[sample_record("a", None)])
            .expect("append");
        assert!(!store.is_empty().expect("nonempty"));
        assert_eq!(store.run_count(), 1);
        assert_eq!(store.all_records().expect("records").len(), 1);
    }
}
