//! Durable local storage for meteofetch observations.
//!
//! `ObservationStore` is the seam the cycle controller writes through;
//! `SqliteObservationStore` is the implementation used in production and tests.

pub mod backend;
pub mod sqlite;

pub use backend::{FetchLogEntry, ObservationStore, StoreResult};
pub use sqlite::SqliteObservationStore;
