//! SQLite persistence for readings.
//!
//! A single worker thread owns the connection. Callers send it closures and await the
//! result over a oneshot channel, so appends from any number of tasks are serialized and
//! a reader never observes a partially written row.

use crate::reading::{Reading, Source, decode_hex};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid stored reading: {0}")]
    InvalidRow(String),
    #[error("Reading store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Append-only reading storage, as seen by the ingestion pipeline.
pub trait ReadingStore: Send + Sync {
    /// Persist `reading` and return its row id.
    fn append<'a>(&'a self, reading: &'a Reading) -> StoreFuture<'a, i64>;

    /// Readings with `start <= timestamp <= end`, oldest first.
    fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<StoredReading>>;
}

/// A reading together with its row id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReading {
    pub id: i64,
    #[serde(flatten)]
    pub reading: Reading,
}

/// Summary over a time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReadingStats {
    pub count: i64,
    pub avg_co2: Option<f64>,
    pub min_co2: Option<i64>,
    pub max_co2: Option<i64>,
    pub avg_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS readings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        co2_ppm INTEGER,
        temperature_c REAL,
        humidity REAL,
        raw_data TEXT,
        rssi INTEGER,
        source TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_timestamp ON readings(timestamp);
";

/// Bumped whenever `migrate` gains a step.
const SCHEMA_VERSION: i32 = 1;

/// Bring an existing database up to the current layout.
///
/// Older `readings` tables have no `source` column and may hold timestamps with a
/// local offset (`+08:00`); those are rewritten in UTC so text comparison stays
/// chronological.
fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA)?;

    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    if !has_column(&tx, "readings", "source")? {
        info!("Adding source column to readings");
        tx.execute("ALTER TABLE readings ADD COLUMN source TEXT", [])?;
    }
    let normalized = normalize_timestamps(&tx)?;
    if normalized > 0 {
        info!(rows = normalized, "Rewrote stored timestamps in UTC");
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn normalize_timestamps(conn: &Connection) -> rusqlite::Result<usize> {
    let offset_rows = {
        let mut stmt =
            conn.prepare("SELECT id, timestamp FROM readings WHERE timestamp NOT LIKE '%Z'")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let mut update = conn.prepare("UPDATE readings SET timestamp = ?1 WHERE id = ?2")?;
    let mut updated = 0;
    for (id, value) in offset_rows {
        match parse_timestamp(&value) {
            Ok(ts) => updated += update.execute(params![format_timestamp(ts), id])?,
            Err(e) => warn!(id, "Leaving stored timestamp as is: {e}"),
        }
    }
    Ok(updated)
}

const SELECT_COLUMNS: &str =
    "SELECT id, timestamp, co2_ppm, temperature_c, humidity, raw_data, rssi, source FROM readings";

/// Fixed-width RFC 3339 with microseconds, so text order is time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRow(format!("timestamp '{value}': {e}")))
}

struct RawRow {
    id: i64,
    timestamp: String,
    co2_ppm: Option<i64>,
    temperature_c: Option<f64>,
    humidity: Option<f64>,
    raw_data: Option<String>,
    rssi: Option<i64>,
    source: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            co2_ppm: row.get(2)?,
            temperature_c: row.get(3)?,
            humidity: row.get(4)?,
            raw_data: row.get(5)?,
            rssi: row.get(6)?,
            source: row.get(7)?,
        })
    }

    fn into_stored(self) -> Result<StoredReading, StoreError> {
        let id = self.id;
        let invalid = |what: &str| StoreError::InvalidRow(format!("row {id}: {what}"));

        let co2_ppm = self
            .co2_ppm
            .map(u16::try_from)
            .transpose()
            .map_err(|_| invalid("co2_ppm out of range"))?;
        let rssi = self
            .rssi
            .map(i16::try_from)
            .transpose()
            .map_err(|_| invalid("rssi out of range"))?;
        let raw_data = match self.raw_data.as_deref() {
            Some(hex) => decode_hex(hex).map_err(|e| invalid(&e))?,
            None => Vec::new(),
        };
        // Rows written before the source column existed came from advertisements.
        let source = match self.source.as_deref() {
            Some(source) => source.parse::<Source>().map_err(|e| invalid(&e))?,
            None => Source::Advertisement,
        };

        Ok(StoredReading {
            id,
            reading: Reading {
                timestamp: parse_timestamp(&self.timestamp)?,
                co2_ppm,
                temperature_c: self.temperature_c,
                humidity_pct: self.humidity,
                rssi,
                raw_data,
                source,
            },
        })
    }
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<RawRow>>,
) -> Result<Vec<StoredReading>, StoreError> {
    rows.map(|row| row.map_err(StoreError::from).and_then(RawRow::into_stored))
        .collect()
}

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(handle) = guard.take() {
            if let Err(e) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {e}");
            }
            if handle.join().is_err() {
                error!("Store thread panicked");
            }
        }
    }
}

/// SQLite-backed [`ReadingStore`].
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        info!(path = %path.display(), "Opening reading store");
        Self::spawn(move || Connection::open(path))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::spawn(Connection::open_in_memory)
    }

    fn spawn<F>(open: F) -> Result<Self, StoreError>
    where
        F: FnOnce() -> rusqlite::Result<Connection> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), StoreError>>();

        let worker = thread::Builder::new()
            .name("myco2-store".into())
            .spawn(move || {
                let opened = open().map_err(StoreError::from).and_then(|mut conn| {
                    migrate(&mut conn)?;
                    Ok(conn)
                });
                let mut conn = match opened {
                    Ok(conn) => conn,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if ready_tx.send(Ok(())).is_err() {
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => task(&mut conn),
                        StoreCommand::Shutdown => break,
                    }
                }
            })
            .map_err(|e| StoreError::Unavailable(format!("failed to spawn store thread: {e}")))?;

        ready_rx.recv().map_err(|_| {
            StoreError::Unavailable("store thread exited before signaling readiness".into())
        })??;

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Run `task` on the store thread.
    pub async fn execute<F, T>(&self, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = StoreCommand::Execute(Box::new(move |conn| {
            // The caller may have given up waiting; nothing to do then.
            let _ = reply_tx.send(task(conn));
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|_| StoreError::Unavailable("store thread has stopped".into()))?;

        reply_rx
            .await
            .map_err(|_| StoreError::Unavailable("store thread terminated unexpectedly".into()))?
    }

    /// Most recent reading, if any.
    pub async fn latest(&self) -> Result<Option<StoredReading>, StoreError> {
        self.execute(|conn| {
            let row = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} ORDER BY timestamp DESC, id DESC LIMIT 1"),
                    [],
                    RawRow::from_row,
                )
                .optional()?;
            row.map(RawRow::into_stored).transpose()
        })
        .await
    }

    /// Summary of readings taken at or after `since`.
    pub async fn stats_since(&self, since: DateTime<Utc>) -> Result<ReadingStats, StoreError> {
        self.execute(move |conn| {
            let stats = conn.query_row(
                "SELECT COUNT(*),
                        AVG(co2_ppm), MIN(co2_ppm), MAX(co2_ppm),
                        AVG(temperature_c), MIN(temperature_c), MAX(temperature_c),
                        AVG(humidity)
                 FROM readings WHERE timestamp >= ?1",
                params![format_timestamp(since)],
                |row| {
                    Ok(ReadingStats {
                        count: row.get(0)?,
                        avg_co2: row.get(1)?,
                        min_co2: row.get(2)?,
                        max_co2: row.get(3)?,
                        avg_temperature: row.get(4)?,
                        min_temperature: row.get(5)?,
                        max_temperature: row.get(6)?,
                        avg_humidity: row.get(7)?,
                    })
                },
            )?;
            Ok(stats)
        })
        .await
    }
}

impl ReadingStore for SqliteStore {
    fn append<'a>(&'a self, reading: &'a Reading) -> StoreFuture<'a, i64> {
        let timestamp = format_timestamp(reading.timestamp);
        let co2_ppm = reading.co2_ppm;
        let temperature_c = reading.temperature_c;
        let humidity = reading.humidity_pct;
        let raw_data = reading.raw_hex();
        let rssi = reading.rssi;
        let source = reading.source.as_str();

        Box::pin(self.execute(move |conn| {
            conn.execute(
                "INSERT INTO readings (timestamp, co2_ppm, temperature_c, humidity, raw_data, rssi, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![timestamp, co2_ppm, temperature_c, humidity, raw_data, rssi, source],
            )?;
            Ok(conn.last_insert_rowid())
        }))
    }

    fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<StoredReading>> {
        let start = format_timestamp(start);
        let end = format_timestamp(end);

        Box::pin(self.execute(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "{SELECT_COLUMNS} WHERE timestamp >= ?1 AND timestamp <= ?2 ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![start, end], RawRow::from_row)?;
            collect_rows(rows)
        }))
    }
}
