//! Fakes shared by the sync integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::panic)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use chrono::{DateTime, TimeZone, Utc};
use meteofetch_core::{FetchError, StoreError};
use meteofetch_store::{FetchLogEntry, ObservationStore, SqliteObservationStore, StoreResult};
use meteofetch_weather::{
    Alert, FetchClient, FetchWindow, Metrics, Normalizer, ObservationRecord, RawObservation,
    Resolution,
};
use parking_lot::Mutex;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
}

pub fn normalizer() -> Normalizer {
    Normalizer::new(
        vec!["temperature_2m".into(), "wind_speed_10m".into()],
        vec!["temperature_2m".into(), "wind_speed_10m".into()],
    )
}

pub fn raw(ts: DateTime<Utc>, temperature: f64) -> RawObservation {
    let mut values = Metrics::new();
    values.insert("temperature_2m".into(), Some(temperature));
    values.insert("wind_speed_10m".into(), Some(10.0));
    RawObservation {
        timestamp: Some(ts.format("%Y-%m-%dT%H:%M").to_string()),
        values,
    }
}

/// `count` consecutive grid rows starting at `start`.
pub fn rows(resolution: Resolution, start: DateTime<Utc>, count: i32) -> Vec<RawObservation> {
    (0..count)
        .map(|i| raw(start + resolution.step() * i, f64::from(i)))
        .collect()
}

type FetchResult = Result<Vec<RawObservation>, FetchError>;

/// Answers fetches from a script, then with a fallback.
pub struct ScriptedClient {
    script: Mutex<VecDeque<FetchResult>>,
    fallback: FetchResult,
    windows: Mutex<Vec<FetchWindow>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::always(Ok(Vec::new()))
    }

    pub fn always(fallback: FetchResult) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            windows: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, result: FetchResult) -> &Self {
        self.script.lock().push_back(result);
        self
    }

    pub fn calls(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn calls_for(&self, resolution: Resolution) -> usize {
        self.windows
            .lock()
            .iter()
            .filter(|w| w.resolution() == resolution)
            .count()
    }

    pub fn windows(&self) -> Vec<FetchWindow> {
        self.windows.lock().clone()
    }
}

impl FetchClient for ScriptedClient {
    async fn fetch(&self, window: &FetchWindow) -> FetchResult {
        self.windows.lock().push(*window);
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Panics for one resolution, returns nothing for the other.
pub struct PanickingClient {
    pub panic_on: Resolution,
    pub hourly_calls: AtomicUsize,
    pub subhourly_calls: AtomicUsize,
}

impl PanickingClient {
    pub fn new(panic_on: Resolution) -> Self {
        Self {
            panic_on,
            hourly_calls: AtomicUsize::new(0),
            subhourly_calls: AtomicUsize::new(0),
        }
    }

    pub fn calls_for(&self, resolution: Resolution) -> usize {
        match resolution {
            Resolution::Hourly => self.hourly_calls.load(Ordering::SeqCst),
            Resolution::Subhourly => self.subhourly_calls.load(Ordering::SeqCst),
        }
    }
}

impl FetchClient for PanickingClient {
    async fn fetch(&self, window: &FetchWindow) -> FetchResult {
        match window.resolution() {
            Resolution::Hourly => self.hourly_calls.fetch_add(1, Ordering::SeqCst),
            Resolution::Subhourly => self.subhourly_calls.fetch_add(1, Ordering::SeqCst),
        };
        if window.resolution() == self.panic_on {
            panic!("provider exploded");
        }
        Ok(Vec::new())
    }
}

/// Never answers.
pub struct HangingClient {
    pub calls: AtomicUsize,
}

impl FetchClient for HangingClient {
    async fn fetch(&self, _window: &FetchWindow) -> FetchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// SQLite store whose observation writes can be switched to fail. Records
/// the thread each call ran on.
pub struct FlakyStore {
    pub inner: SqliteObservationStore,
    pub fail_writes: AtomicBool,
    pub threads: Mutex<Vec<ThreadId>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteObservationStore::in_memory().unwrap(),
            fail_writes: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }
    }

    fn enter(&self) {
        self.threads.lock().push(thread::current().id());
    }

    pub fn failing() -> Self {
        let store = Self::new();
        store.fail_writes.store(true, Ordering::SeqCst);
        store
    }
}

impl ObservationStore for FlakyStore {
    fn upsert(&self, records: &[ObservationRecord]) -> StoreResult<usize> {
        self.enter();
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Corruption("disk full".into()));
        }
        self.inner.upsert(records)
    }

    fn latest_timestamp(&self, resolution: Resolution) -> StoreResult<Option<DateTime<Utc>>> {
        self.enter();
        self.inner.latest_timestamp(resolution)
    }

    fn upsert_alerts(&self, alerts: &[Alert]) -> StoreResult<Vec<Alert>> {
        self.enter();
        self.inner.upsert_alerts(alerts)
    }

    fn record_fetch(&self, entry: &FetchLogEntry) -> StoreResult<()> {
        self.enter();
        self.inner.record_fetch(entry)
    }
}
