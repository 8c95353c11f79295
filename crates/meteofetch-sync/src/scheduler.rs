//! Drives one cycle controller per resolution.
//!
//! Continuous mode gives each resolution its own task and interval; a tick
//! that arrives while the previous cycle is still running is skipped. Every
//! cycle runs in a task of its own so a panic is caught and reported as a
//! failed cycle instead of ending the loop.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use meteofetch_core::Config;
use meteofetch_store::ObservationStore;
use meteofetch_weather::{FetchClient, Resolution};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cycle::{resolution_config, CycleController};
use crate::report::{CycleReport, FailureKind, SchedulerReport};

// tokio::time::interval panics on a zero period
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

struct ScheduledCycle<C, S> {
    controller: Arc<CycleController<C, S>>,
    poll_interval: Duration,
}

pub struct Scheduler<C, S> {
    cycles: Vec<ScheduledCycle<C, S>>,
    cancel: CancellationToken,
}

impl<C, S> Scheduler<C, S>
where
    C: FetchClient + 'static,
    S: ObservationStore + 'static,
{
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cycles: Vec::new(),
            cancel,
        }
    }

    /// One controller per enabled resolution, configured from `config`.
    pub fn from_config(
        config: &Config,
        client: Arc<C>,
        store: Arc<S>,
        cancel: CancellationToken,
    ) -> Self {
        let mut scheduler = Self::new(cancel);
        for resolution in Resolution::ALL {
            let settings = resolution_config(config, resolution);
            if !settings.enabled {
                tracing::info!("{} polling disabled", resolution);
                continue;
            }
            let controller = CycleController::from_config(
                resolution,
                config,
                Arc::clone(&client),
                Arc::clone(&store),
            );
            scheduler.add(controller, settings.poll_interval());
        }
        scheduler
    }

    /// Register a controller. It is bound to this scheduler's cancellation
    /// token.
    pub fn add(&mut self, controller: CycleController<C, S>, poll_interval: Duration) -> &mut Self {
        self.cycles.push(ScheduledCycle {
            controller: Arc::new(controller.with_cancel(self.cancel.clone())),
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        });
        self
    }

    pub fn resolutions(&self) -> Vec<Resolution> {
        self.cycles.iter().map(|c| c.controller.resolution()).collect()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run exactly one cycle per registered resolution, concurrently, and
    /// wait for all of them.
    pub async fn run_once(&self) -> SchedulerReport {
        let mut tasks = JoinSet::new();
        for scheduled in &self.cycles {
            tasks.spawn(run_isolated(Arc::clone(&scheduled.controller)));
        }

        let mut report = SchedulerReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(cycle) => report.cycles.push(cycle),
                Err(e) => tracing::error!("Cycle supervisor task failed: {}", e),
            }
        }
        report.cycles.sort_by_key(|c| c.resolution);

        tracing::info!(
            "Single-shot run finished: {} of {} cycles succeeded",
            report.cycles.iter().filter(|c| c.is_success()).count(),
            report.cycles.len()
        );
        report
    }

    /// Poll every registered resolution on its own interval until the
    /// cancellation token fires.
    pub async fn run_until_cancelled(&self) {
        let mut loops = JoinSet::new();
        for scheduled in &self.cycles {
            loops.spawn(poll_loop(
                Arc::clone(&scheduled.controller),
                scheduled.poll_interval,
                self.cancel.clone(),
            ));
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Polling loop ended abnormally: {}", e);
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn poll_loop<C, S>(
    controller: Arc<CycleController<C, S>>,
    poll_interval: Duration,
    cancel: CancellationToken,
) where
    C: FetchClient + 'static,
    S: ObservationStore + 'static,
{
    let resolution = controller.resolution();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!("Polling {} every {:?}", resolution, poll_interval);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let report = run_isolated(Arc::clone(&controller)).await;
        if report.failure_kind() == Some(FailureKind::Cancelled) {
            break;
        }
    }

    tracing::info!("Stopped polling {}", resolution);
}

/// Run one cycle in its own task; a panic becomes a `Panicked` report.
async fn run_isolated<C, S>(controller: Arc<CycleController<C, S>>) -> CycleReport
where
    C: FetchClient + 'static,
    S: ObservationStore + 'static,
{
    let resolution = controller.resolution();
    let started_at = Utc::now();

    match tokio::spawn(async move { controller.run().await }).await {
        Ok(report) => report,
        Err(e) => {
            let message = if e.is_panic() {
                panic_message(e.into_panic())
            } else {
                e.to_string()
            };
            let mut report = CycleReport::new(resolution, started_at)
                .failed(FailureKind::Panicked, message);
            report.finished_at = Utc::now();
            tracing::error!("{}", report);
            report
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "cycle panicked".to_string()
    }
}
