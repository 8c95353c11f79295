//! One resolution's fetch-normalize-persist pass.
//!
//! Each run reads the latest persisted timestamp, fetches `[latest, now)`,
//! and upserts what normalizes. The latest stored row is always refetched by
//! the next run.
//!
//! While the store holds nothing for the resolution, the first computed
//! bootstrap start (`now - backfill`, floored to the grid) is pinned so a
//! failed bootstrap is retried from the same start. The pin is dropped as
//! soon as a row is stored; it is not persisted across restarts.
//!
//! Store calls are synchronous SQLite work and run on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use meteofetch_core::{Config, ResolutionConfig, StoreError};
use meteofetch_store::{ObservationStore, StoreResult};
use meteofetch_weather::{
    Alert, AlertRules, FetchClient, FetchWindow, Normalizer, Resolution, WebhookNotifier,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::report::{CycleReport, FailureKind, SkippedRecord};
use crate::retry::{with_retry, RetryConfig, RetryError};

/// The per-resolution section of `config`.
pub fn resolution_config(config: &Config, resolution: Resolution) -> &ResolutionConfig {
    match resolution {
        Resolution::Hourly => &config.hourly,
        Resolution::Subhourly => &config.subhourly,
    }
}

fn default_backfill(resolution: Resolution) -> Duration {
    match resolution {
        Resolution::Hourly => ResolutionConfig::default_hourly().backfill_horizon(),
        Resolution::Subhourly => ResolutionConfig::default_subhourly().backfill_horizon(),
    }
}

pub struct CycleController<C, S> {
    resolution: Resolution,
    client: Arc<C>,
    store: Arc<S>,
    normalizer: Normalizer,
    alerts: AlertRules,
    notifier: Option<WebhookNotifier>,
    backfill_horizon: TimeDelta,
    bootstrap_start: Mutex<Option<DateTime<Utc>>>,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl<C, S> CycleController<C, S>
where
    C: FetchClient,
    S: ObservationStore + 'static,
{
    /// Controller with default horizon and retry policy and alerts off.
    pub fn new(
        resolution: Resolution,
        client: Arc<C>,
        store: Arc<S>,
        normalizer: Normalizer,
    ) -> Self {
        Self {
            resolution,
            client,
            store,
            normalizer,
            alerts: AlertRules::disabled(),
            notifier: None,
            backfill_horizon: TimeDelta::zero(),
            bootstrap_start: Mutex::new(None),
            retry: RetryConfig::default(),
            cancel: CancellationToken::new(),
        }
        .with_backfill_horizon(default_backfill(resolution))
    }

    pub fn from_config(
        resolution: Resolution,
        config: &Config,
        client: Arc<C>,
        store: Arc<S>,
    ) -> Self {
        let notifier = match WebhookNotifier::from_config(&config.alerts, &config.provider) {
            Ok(notifier) => notifier,
            Err(e) => {
                tracing::warn!("Alert webhook disabled: {}", e);
                None
            }
        };

        Self::new(resolution, client, store, Normalizer::from_config(&config.provider))
            .with_backfill_horizon(resolution_config(config, resolution).backfill_horizon())
            .with_retry(RetryConfig::from(&config.retry))
            .with_alerts(AlertRules::from_config(&config.alerts))
            .with_notifier(notifier)
    }

    pub fn with_backfill_horizon(mut self, horizon: Duration) -> Self {
        self.backfill_horizon = TimeDelta::from_std(horizon).unwrap_or(TimeDelta::MAX);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_alerts(mut self, alerts: AlertRules) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_notifier(mut self, notifier: Option<WebhookNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Window the next run at `now` would fetch; `None` when the store is
    /// already current.
    pub async fn compute_window(&self, now: DateTime<Utc>) -> StoreResult<Option<FetchWindow>> {
        let resolution = self.resolution;
        let start = match self.store_call(move |s| s.latest_timestamp(resolution)).await? {
            Some(latest) => {
                self.bootstrap_start.lock().take();
                latest
            }
            None => self.bootstrap_start(now),
        };
        Ok(FetchWindow::new(resolution, start, now))
    }

    fn bootstrap_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        *self.bootstrap_start.lock().get_or_insert_with(|| {
            let back = now
                .checked_sub_signed(self.backfill_horizon)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            self.resolution.floor(back)
        })
    }

    /// Run `op` against the store on the blocking pool. A panic inside `op`
    /// resumes on the calling task.
    async fn store_call<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> StoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || op(&store)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(StoreError::Interrupted(e.to_string())),
        }
    }

    pub async fn run(&self) -> CycleReport {
        self.run_at(Utc::now()).await
    }

    /// Run one cycle as if the wall clock read `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::new(self.resolution, Utc::now());

        if self.cancel.is_cancelled() {
            return self
                .finish(report.failed(FailureKind::Cancelled, "shutdown requested"))
                .await;
        }

        let window = match self.compute_window(now).await {
            Ok(Some(window)) => window,
            Ok(None) => {
                tracing::debug!(
                    "{} store is current through {}",
                    self.resolution,
                    now.to_rfc3339()
                );
                return self.finish(report).await;
            }
            Err(e) => {
                return self
                    .finish(report.failed(FailureKind::Store, e.to_string()))
                    .await;
            }
        };
        report.window = Some(window);

        let raw = match with_retry(&self.retry, &self.cancel, || self.client.fetch(&window)).await {
            Ok(raw) => raw,
            Err(RetryError::Cancelled) => {
                return self
                    .finish(report.failed(FailureKind::Cancelled, "shutdown during fetch"))
                    .await;
            }
            Err(e @ RetryError::Exhausted { .. }) => {
                return self
                    .finish(report.failed(FailureKind::Fetch, e.to_string()))
                    .await;
            }
        };
        report.records_fetched = raw.len();

        let mut records = Vec::with_capacity(raw.len());
        for (index, row) in raw.iter().enumerate() {
            match self.normalizer.normalize(self.resolution, row, now) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    tracing::warn!(
                        "Skipping {} record #{} ({:?}): {}",
                        self.resolution,
                        index,
                        row.timestamp,
                        reason
                    );
                    report.skipped.push(SkippedRecord {
                        index,
                        raw_timestamp: row.timestamp.clone(),
                        reason,
                    });
                }
            }
        }
        report.records_skipped = report.skipped.len();

        let alerts: Vec<_> = records.iter().flat_map(|r| self.alerts.evaluate(r)).collect();

        // Not raced against cancellation: a started batch always commits.
        match self.store_call(move |s| s.upsert(&records)).await {
            Ok(written) => report.records_written = written,
            Err(e) => {
                return self
                    .finish(report.failed(FailureKind::Store, e.to_string()))
                    .await;
            }
        }

        if !alerts.is_empty() {
            match self.store_call(move |s| s.upsert_alerts(&alerts)).await {
                Ok(raised) => {
                    report.alerts_raised = raised.len();
                    self.announce(&raised, &mut report).await;
                }
                Err(e) => tracing::warn!("Failed to store {} alerts: {}", self.resolution, e),
            }
        }

        self.finish(report).await
    }

    /// Log newly raised alerts and deliver them to the webhook, if any.
    async fn announce(&self, raised: &[Alert], report: &mut CycleReport) {
        for alert in raised {
            tracing::warn!(
                "{} alert at {} ({}): {}",
                alert.kind,
                alert.timestamp.to_rfc3339(),
                alert.origin,
                alert.message
            );
        }

        let Some(notifier) = &self.notifier else {
            return;
        };
        if raised.is_empty() {
            return;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::warn!("Shutdown before delivering {} alerts", raised.len());
            }
            delivered = notifier.send_all(raised) => {
                report.alerts_notified = delivered;
            }
        }
    }

    async fn finish(&self, mut report: CycleReport) -> CycleReport {
        report.finished_at = Utc::now();

        match report.failure_kind() {
            None | Some(FailureKind::Cancelled) => tracing::info!("{}", report),
            Some(_) => tracing::error!("{}", report),
        }

        let entry = report.to_log_entry();
        if let Err(e) = self.store_call(move |s| s.record_fetch(&entry)).await {
            tracing::warn!("Failed to record {} fetch log: {}", self.resolution, e);
        }
        report
    }
}
