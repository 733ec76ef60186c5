use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use futures::{stream, StreamExt};
use thiserror::Error;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::{
    pipeline::{PairOutcome, Pipeline},
    store::{StoreError, SubscriberDirectory},
};

/// Tally of one sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub pairs: usize,
    pub alerts: usize,
    pub no_alert: usize,
    pub skipped: usize,
    /// Pairs that failed after a successful fetch.
    pub failed: usize,
    /// Failed writes among `failed`.
    pub persistence_failures: usize,
    /// Subscribers whose locations could not be listed.
    pub subscribers_failed: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("previous sweep still running")]
    AlreadyRunning,
    #[error("failed to enumerate subscribers: {0}")]
    Enumerate(#[source] StoreError),
    #[error("{} of {} pairs failed to persist", .0.persistence_failures, .0.pairs)]
    Persistence(SweepReport),
}

/// Drives the pipeline over every (subscriber, location) pair on a fixed
/// interval.
pub struct ScanScheduler {
    pipeline: Arc<Pipeline>,
    directory: Arc<dyn SubscriberDirectory>,
    interval: Duration,
    concurrency: usize,
    running: AtomicBool,
}

/// Clears the running flag when the sweep ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ScanScheduler {
    pub fn new(
        pipeline: Arc<Pipeline>,
        directory: Arc<dyn SubscriberDirectory>,
        interval_secs: u64,
        concurrency: usize,
    ) -> Self {
        Self {
            pipeline,
            directory,
            interval: Duration::from_secs(interval_secs),
            concurrency: concurrency.max(1),
            running: AtomicBool::new(false),
        }
    }

    /// Runs the scan loop indefinitely. The first sweep starts immediately.
    /// Spawn this via `tokio::spawn`.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_secs = self.interval.as_secs(),
            concurrency = self.concurrency,
            "Scan loop started"
        );
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(_) => {}
                Err(SweepError::AlreadyRunning) => warn!("Previous sweep still running; skipping tick"),
                Err(e) => error!(error = %e, "Scan sweep failed"),
            }
        }
    }

    /// One pass over every pair. Pairs run concurrently up to the configured
    /// limit and never affect one another.
    ///
    /// Fails when subscribers cannot be listed, when another sweep is in
    /// progress, or, after every pair has run, when any write failed.
    pub async fn sweep(&self) -> Result<SweepReport, SweepError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SweepError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);
        let started = Instant::now();
        let mut report = SweepReport::default();

        let subscribers = self
            .directory
            .subscribers()
            .await
            .map_err(SweepError::Enumerate)?;

        let mut pairs = Vec::new();
        for subscriber in subscribers {
            match self.directory.locations(subscriber.id).await {
                Ok(locations) => {
                    pairs.extend(locations.into_iter().map(|l| (subscriber.clone(), l)));
                }
                Err(e) => {
                    warn!(subscriber_id = %subscriber.id, error = %e, "Failed to list locations");
                    report.subscribers_failed += 1;
                }
            }
        }
        report.pairs = pairs.len();

        let pipeline = &self.pipeline;
        let results: Vec<_> = stream::iter(pairs)
            .map(|(subscriber, location)| async move {
                let result = pipeline.run_pair(&subscriber, &location).await;
                (subscriber, location, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (subscriber, location, result) in results {
            match result {
                Ok(PairOutcome::Alerted { .. }) => report.alerts += 1,
                Ok(PairOutcome::NoAlert) => report.no_alert += 1,
                Ok(PairOutcome::Skipped { .. }) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    if e.is_persistence() {
                        report.persistence_failures += 1;
                    }
                    error!(
                        subscriber_id = %subscriber.id,
                        location_id = %location.id,
                        error = %e,
                        "Pair failed"
                    );
                }
            }
        }
        report.elapsed = started.elapsed();

        info!(
            pairs = report.pairs,
            alerts = report.alerts,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Sweep finished"
        );

        if report.persistence_failures > 0 {
            return Err(SweepError::Persistence(report));
        }
        Ok(report)
    }
}
