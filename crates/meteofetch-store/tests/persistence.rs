//! On-disk behaviour of SqliteObservationStore.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use meteofetch_store::{ObservationStore, SqliteObservationStore};
use meteofetch_weather::{Metrics, ObservationRecord, Resolution};
use tempfile::tempdir;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()
}

fn series(resolution: Resolution, count: i64) -> Vec<ObservationRecord> {
    (0..count)
        .map(|i| {
            let mut metrics = Metrics::new();
            metrics.insert("temperature_2m".into(), Some(i as f64 / 10.0));
            ObservationRecord {
                resolution,
                timestamp: base() + resolution.step() * i as i32,
                metrics,
                fetched_at: base() + Duration::days(1),
            }
        })
        .collect()
}

#[test]
fn test_open_creates_parent_directories() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("meteodata.db");

    let store = SqliteObservationStore::open(&path).unwrap();
    store.upsert(&series(Resolution::Hourly, 1)).unwrap();

    assert!(path.exists());
}

#[test]
fn test_latest_timestamp_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("meteodata.db");

    {
        let store = SqliteObservationStore::open(&path).unwrap();
        store.upsert(&series(Resolution::Hourly, 24)).unwrap();
        store.upsert(&series(Resolution::Subhourly, 8)).unwrap();
    }

    let reopened = SqliteObservationStore::open(&path).unwrap();
    assert_eq!(
        reopened.latest_timestamp(Resolution::Hourly).unwrap(),
        Some(base() + Duration::hours(23))
    );
    assert_eq!(
        reopened.latest_timestamp(Resolution::Subhourly).unwrap(),
        Some(base() + Duration::minutes(105))
    );
    assert_eq!(reopened.count(Resolution::Hourly).unwrap(), 24);
}

#[test]
fn test_overlapping_batches_never_duplicate() {
    let dir = tempdir().unwrap();
    let store = SqliteObservationStore::open(dir.path().join("meteodata.db")).unwrap();

    let all = series(Resolution::Hourly, 12);
    store.upsert(&all[..8]).unwrap();
    store.upsert(&all[4..]).unwrap();
    store.upsert(&all).unwrap();

    assert_eq!(store.count(Resolution::Hourly).unwrap(), 12);
    let rows = store
        .list_range(Resolution::Hourly, base(), base() + Duration::days(1))
        .unwrap();
    assert_eq!(rows, all);
}

#[test]
fn test_concurrent_writers_on_disjoint_keys() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteObservationStore::open(dir.path().join("meteodata.db")).unwrap());

    let handles: Vec<_> = Resolution::ALL
        .into_iter()
        .map(|resolution| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let batch = series(resolution, 48);
                for chunk in batch.chunks(6) {
                    store.upsert(chunk).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.count(Resolution::Hourly).unwrap(), 48);
    assert_eq!(store.count(Resolution::Subhourly).unwrap(), 48);
}

#[test]
fn test_open_fails_when_parent_is_a_file() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a dir").unwrap();

    let result = SqliteObservationStore::open(blocker.join("meteodata.db"));
    assert!(result.is_err());
}
