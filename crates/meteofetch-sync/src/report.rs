use chrono::{DateTime, Utc};
use meteofetch_core::ValidationError;
use meteofetch_store::FetchLogEntry;
use meteofetch_weather::{FetchWindow, Resolution};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Provider still failing after the retry budget
    Fetch,
    /// Store read or write failed
    Store,
    /// Shutdown requested before the cycle could finish
    Cancelled,
    /// The cycle task panicked
    Panicked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Store => "store",
            Self::Cancelled => "cancelled",
            Self::Panicked => "panicked",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for CycleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.message)
    }
}

/// A raw record the normalizer rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    /// Position in the fetched batch
    pub index: usize,
    pub raw_timestamp: Option<String>,
    pub reason: ValidationError,
}

/// Outcome of one fetch-normalize-persist pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub resolution: Resolution,
    /// `None` when the store was already current, or the window could not be
    /// computed
    pub window: Option<FetchWindow>,
    pub records_fetched: usize,
    pub records_written: usize,
    pub records_skipped: usize,
    pub skipped: Vec<SkippedRecord>,
    /// Alerts not stored before this run
    pub alerts_raised: usize,
    /// Raised alerts the webhook accepted
    pub alerts_notified: usize,
    pub failure: Option<CycleFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CycleReport {
    pub fn new(resolution: Resolution, started_at: DateTime<Utc>) -> Self {
        Self {
            resolution,
            window: None,
            records_fetched: 0,
            records_written: 0,
            records_skipped: 0,
            skipped: Vec::new(),
            alerts_raised: 0,
            alerts_notified: 0,
            failure: None,
            started_at,
            finished_at: started_at,
        }
    }

    pub fn failed(mut self, kind: FailureKind, message: impl Into<String>) -> Self {
        self.failure = Some(CycleFailure {
            kind,
            message: message.into(),
        });
        self
    }

    /// Per-record skips do not count as failure.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    pub fn to_log_entry(&self) -> FetchLogEntry {
        FetchLogEntry {
            resolution: self.resolution,
            window_start: self.window.map(|w| w.start()),
            window_end: self.window.map(|w| w.end()),
            records_fetched: self.records_fetched,
            records_written: self.records_written,
            records_skipped: self.records_skipped,
            alerts_raised: self.alerts_raised,
            error: self.failure.as_ref().map(ToString::to_string),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cycle", self.resolution)?;
        match &self.window {
            Some(window) => write!(
                f,
                " [{}, {})",
                window.start().to_rfc3339(),
                window.end().to_rfc3339()
            )?,
            None => write!(f, " (no window)")?,
        }
        write!(
            f,
            ": fetched={} written={} skipped={} alerts={}",
            self.records_fetched, self.records_written, self.records_skipped, self.alerts_raised
        )?;
        if let Some(failure) = &self.failure {
            write!(f, ", {}", failure)?;
        }
        Ok(())
    }
}

/// Combined outcome of a single-shot run.
#[derive(Debug, Clone, Default)]
pub struct SchedulerReport {
    /// Ordered by resolution
    pub cycles: Vec<CycleReport>,
}

impl SchedulerReport {
    pub fn get(&self, resolution: Resolution) -> Option<&CycleReport> {
        self.cycles.iter().find(|c| c.resolution == resolution)
    }

    pub fn all_succeeded(&self) -> bool {
        self.cycles.iter().all(CycleReport::is_success)
    }

    /// Process exit status: fetch failures and skips still count as a cycle
    /// that ran; store failures and panics do not.
    pub fn exit_code(&self) -> i32 {
        let fatal = self.cycles.iter().any(|c| {
            matches!(
                c.failure_kind(),
                Some(FailureKind::Store) | Some(FailureKind::Panicked)
            )
        });
        if fatal {
            2
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, 0, 0).unwrap()
    }

    #[test]
    fn test_exit_code_ignores_fetch_failures() {
        let report = SchedulerReport {
            cycles: vec![
                CycleReport::new(Resolution::Hourly, at(9)).failed(FailureKind::Fetch, "down"),
                CycleReport::new(Resolution::Subhourly, at(9)),
            ],
        };
        assert!(!report.all_succeeded());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_exit_code_for_store_failure_and_panic() {
        let store = SchedulerReport {
            cycles: vec![
                CycleReport::new(Resolution::Hourly, at(9)).failed(FailureKind::Store, "disk full")
            ],
        };
        assert_eq!(store.exit_code(), 2);

        let panicked = SchedulerReport {
            cycles: vec![
                CycleReport::new(Resolution::Subhourly, at(9)).failed(FailureKind::Panicked, "boom")
            ],
        };
        assert_eq!(panicked.exit_code(), 2);
    }

    #[test]
    fn test_log_entry_carries_window_and_error() {
        let mut report = CycleReport::new(Resolution::Hourly, at(12));
        report.window = FetchWindow::new(Resolution::Hourly, at(9), at(12));
        report.records_fetched = 3;
        let report = report.failed(FailureKind::Store, "disk full");

        let entry = report.to_log_entry();
        assert_eq!(entry.window_start, Some(at(9)));
        assert_eq!(entry.window_end, Some(at(12)));
        assert_eq!(entry.records_fetched, 3);
        assert_eq!(entry.error.as_deref(), Some("store failure: disk full"));
    }

    #[test]
    fn test_display_summarizes_counts() {
        let mut report = CycleReport::new(Resolution::Subhourly, at(12));
        report.records_fetched = 5;
        report.records_written = 4;
        report.records_skipped = 1;

        let text = report.to_string();
        assert!(text.starts_with("minutely_15 cycle (no window)"));
        assert!(text.contains("written=4 skipped=1"));
    }
}
