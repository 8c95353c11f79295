//! Storage seam used by the cycle controller.

use chrono::{DateTime, Utc};
use meteofetch_core::StoreError;
use meteofetch_weather::{Alert, ObservationRecord, Resolution};
use serde::{Deserialize, Serialize};

pub type StoreResult<T> = Result<T, StoreError>;

/// One audit row per cycle. Never read back to compute windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchLogEntry {
    pub resolution: Resolution,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub records_fetched: usize,
    pub records_written: usize,
    pub records_skipped: usize,
    pub alerts_raised: usize,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Durable observation store.
///
/// Natural-key uniqueness is the implementation's job: writing the same
/// `(resolution, timestamp)` twice must leave one row holding the later values.
pub trait ObservationStore: Send + Sync {
    /// Insert or replace every record in one atomic batch. Returns the number
    /// of distinct keys written.
    fn upsert(&self, records: &[ObservationRecord]) -> StoreResult<usize>;

    /// Greatest persisted timestamp for `resolution`, `None` before the first
    /// write.
    fn latest_timestamp(&self, resolution: Resolution) -> StoreResult<Option<DateTime<Utc>>>;

    /// Insert or replace alerts keyed by `(resolution, timestamp, kind)`.
    /// Returns the alerts whose key was not stored before.
    fn upsert_alerts(&self, alerts: &[Alert]) -> StoreResult<Vec<Alert>>;

    fn record_fetch(&self, entry: &FetchLogEntry) -> StoreResult<()>;
}
