//! SQLite-backed observation store.
//!
//! Rows are keyed by `(resolution, timestamp)` with the timestamp stored as
//! unix seconds; metrics are a JSON object where `null` marks a missing
//! reading. One connection is shared behind a mutex, so batches from the two
//! resolutions are serialized.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use meteofetch_core::StoreError;
use meteofetch_weather::{Alert, AlertKind, AlertOrigin, Metrics, ObservationRecord, Resolution};

use crate::backend::{FetchLogEntry, ObservationStore, StoreResult};

const SCHEMA_VERSION: i32 = 2;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteObservationStore {
    conn: Mutex<Connection>,
}

impl SqliteObservationStore {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("Opened store {} (journal_mode={})", path.display(), mode);

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, gone when dropped.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
            [],
        )?;
        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?;
        if let Some(version) = version.filter(|v| *v > SCHEMA_VERSION) {
            return Err(StoreError::Corruption(format!(
                "database schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS observations (
                resolution TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                metrics TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                PRIMARY KEY (resolution, timestamp)
            );

            CREATE TABLE IF NOT EXISTS alerts (
                resolution TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                kind TEXT NOT NULL,
                value REAL NOT NULL,
                message TEXT NOT NULL,
                raised_at TEXT NOT NULL,
                origin TEXT NOT NULL DEFAULT 'historical',
                PRIMARY KEY (resolution, timestamp, kind)
            );

            CREATE TABLE IF NOT EXISTS fetch_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resolution TEXT NOT NULL,
                window_start INTEGER,
                window_end INTEGER,
                records_fetched INTEGER NOT NULL,
                records_written INTEGER NOT NULL,
                records_skipped INTEGER NOT NULL,
                alerts_raised INTEGER NOT NULL,
                error TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_fetch_log_resolution ON fetch_log(resolution, id);
            "#,
        )?;

        match version {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(1) => {
                tracing::info!("Migrating store schema from version 1 to {}", SCHEMA_VERSION);
                conn.execute_batch(
                    "ALTER TABLE alerts ADD COLUMN origin TEXT NOT NULL DEFAULT 'historical';
                     UPDATE schema_version SET version = 2;",
                )?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Single observation by natural key.
    pub fn get(
        &self,
        resolution: Resolution,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<Option<ObservationRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT resolution, timestamp, metrics, fetched_at FROM observations
                 WHERE resolution = ?1 AND timestamp = ?2",
                params![resolution.as_str(), timestamp.timestamp()],
                Self::read_row,
            )
            .optional()?;
        row.map(Self::decode_record).transpose()
    }

    pub fn count(&self, resolution: Resolution) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM observations WHERE resolution = ?1",
            params![resolution.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Observations in `[start, end)`, oldest first.
    pub fn list_range(
        &self,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<ObservationRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT resolution, timestamp, metrics, fetched_at FROM observations
             WHERE resolution = ?1 AND timestamp >= ?2 AND timestamp < ?3
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map(
                params![resolution.as_str(), start.timestamp(), end.timestamp()],
                Self::read_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(Self::decode_record).collect()
    }

    /// Alerts for `resolution`, oldest first.
    pub fn list_alerts(&self, resolution: Resolution) -> StoreResult<Vec<Alert>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, kind, value, message, origin FROM alerts
             WHERE resolution = ?1 ORDER BY timestamp ASC, kind ASC",
        )?;
        let rows = stmt
            .query_map(params![resolution.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(ts, kind, value, message, origin)| -> StoreResult<Alert> {
                Ok(Alert {
                    resolution,
                    timestamp: decode_timestamp(ts)?,
                    kind: AlertKind::parse(&kind).ok_or_else(|| {
                        StoreError::Corruption(format!("unknown alert kind '{}'", kind))
                    })?,
                    value,
                    message,
                    origin: AlertOrigin::parse(&origin).ok_or_else(|| {
                        StoreError::Corruption(format!("unknown alert origin '{}'", origin))
                    })?,
                })
            })
            .collect()
    }

    /// Most recent fetch-log entries for `resolution`, newest first.
    pub fn recent_fetches(
        &self,
        resolution: Resolution,
        limit: usize,
    ) -> StoreResult<Vec<FetchLogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT window_start, window_end, records_fetched, records_written,
                    records_skipped, alerts_raised, error, started_at, finished_at
             FROM fetch_log WHERE resolution = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        type LogRow = (
            Option<i64>,
            Option<i64>,
            i64,
            i64,
            i64,
            i64,
            Option<String>,
            String,
            String,
        );
        let rows = stmt
            .query_map(params![resolution.as_str(), limit as i64], |row| {
                Ok::<LogRow, rusqlite::Error>((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(start, end, fetched, written, skipped, alerts, error, started, finished)|
                 -> StoreResult<FetchLogEntry> {
                    Ok(FetchLogEntry {
                        resolution,
                        window_start: start.map(decode_timestamp).transpose()?,
                        window_end: end.map(decode_timestamp).transpose()?,
                        records_fetched: fetched as usize,
                        records_written: written as usize,
                        records_skipped: skipped as usize,
                        alerts_raised: alerts as usize,
                        error,
                        started_at: decode_rfc3339(&started)?,
                        finished_at: decode_rfc3339(&finished)?,
                    })
                },
            )
            .collect()
    }

    fn read_row(row: &rusqlite::Row) -> rusqlite::Result<(String, i64, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn decode_record(
        (resolution, timestamp, metrics, fetched_at): (String, i64, String, String),
    ) -> StoreResult<ObservationRecord> {
        let resolution = Resolution::parse(&resolution).ok_or_else(|| {
            StoreError::Corruption(format!("unknown resolution '{}'", resolution))
        })?;
        let metrics: Metrics = serde_json::from_str(&metrics)?;

        Ok(ObservationRecord {
            resolution,
            timestamp: decode_timestamp(timestamp)?,
            metrics,
            fetched_at: decode_rfc3339(&fetched_at)?,
        })
    }
}

fn decode_timestamp(secs: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::Corruption(format!("timestamp {} out of range", secs)))
}

fn decode_rfc3339(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corruption(format!("bad timestamp '{}': {}", s, e)))
}

impl ObservationStore for SqliteObservationStore {
    fn upsert(&self, records: &[ObservationRecord]) -> StoreResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut keys = HashSet::with_capacity(records.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO observations (resolution, timestamp, metrics, fetched_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(resolution, timestamp) DO UPDATE SET
                    metrics = excluded.metrics,
                    fetched_at = excluded.fetched_at",
            )?;
            for record in records {
                let metrics = serde_json::to_string(&record.metrics)?;
                stmt.execute(params![
                    record.resolution.as_str(),
                    record.timestamp.timestamp(),
                    metrics,
                    record.fetched_at.to_rfc3339(),
                ])?;
                keys.insert((record.resolution, record.timestamp));
            }
        }
        tx.commit()?;

        // a key repeated within the batch is one row
        tracing::debug!("Upserted {} observation rows", keys.len());
        Ok(keys.len())
    }

    fn latest_timestamp(&self, resolution: Resolution) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let latest: Option<i64> = conn.query_row(
            "SELECT MAX(timestamp) FROM observations WHERE resolution = ?1",
            params![resolution.as_str()],
            |row| row.get(0),
        )?;
        latest.map(decode_timestamp).transpose()
    }

    fn upsert_alerts(&self, alerts: &[Alert]) -> StoreResult<Vec<Alert>> {
        if alerts.is_empty() {
            return Ok(Vec::new());
        }

        let raised_at = Utc::now().to_rfc3339();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut raised = Vec::new();
        {
            let mut exists = tx.prepare_cached(
                "SELECT 1 FROM alerts WHERE resolution = ?1 AND timestamp = ?2 AND kind = ?3",
            )?;
            // raised_at keeps the first sighting
            let mut stmt = tx.prepare_cached(
                "INSERT INTO alerts (resolution, timestamp, kind, value, message, raised_at, origin)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(resolution, timestamp, kind) DO UPDATE SET
                    value = excluded.value,
                    message = excluded.message,
                    origin = excluded.origin",
            )?;
            for alert in alerts {
                let known = exists.exists(params![
                    alert.resolution.as_str(),
                    alert.timestamp.timestamp(),
                    alert.kind.as_str(),
                ])?;
                stmt.execute(params![
                    alert.resolution.as_str(),
                    alert.timestamp.timestamp(),
                    alert.kind.as_str(),
                    alert.value,
                    alert.message,
                    raised_at,
                    alert.origin.as_str(),
                ])?;
                if !known {
                    raised.push(alert.clone());
                }
            }
        }
        tx.commit()?;
        Ok(raised)
    }

    fn record_fetch(&self, entry: &FetchLogEntry) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO fetch_log (resolution, window_start, window_end, records_fetched,
                records_written, records_skipped, alerts_raised, error, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.resolution.as_str(),
                entry.window_start.map(|ts| ts.timestamp()),
                entry.window_end.map(|ts| ts.timestamp()),
                entry.records_fetched as i64,
                entry.records_written as i64,
                entry.records_skipped as i64,
                entry.alerts_raised as i64,
                entry.error,
                entry.started_at.to_rfc3339(),
                entry.finished_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
