//! Fetch cycles and their scheduling.
//!
//! Provides the per-resolution cycle controller, the retry policy it applies
//! to provider fetches, and the scheduler for continuous and single-shot runs.

pub mod cycle;
pub mod report;
pub mod retry;
pub mod scheduler;

pub use cycle::{resolution_config, CycleController};
pub use report::{CycleFailure, CycleReport, FailureKind, SchedulerReport, SkippedRecord};
pub use retry::{with_retry, RetryConfig, RetryError};
pub use scheduler::Scheduler;
