//! Per-device polling loop.
//!
//! One poller drives one device on a fixed cadence:
//!
//! - waits for the next tick (first tick one interval after start)
//! - polls the driver under a deadline of half the interval
//! - on success writes the cache, then hands the reading to the publisher
//! - deadline and cancellation failures are expected and not reported;
//!   every other failure is logged and the loop goes on
//!
//! There is no retry inside a tick and no backoff; the interval is the
//! only pacing. The loop ends only when the shutdown token is cancelled.

use crate::device::{Driver, DriverError, PollContext};
use crate::metrics::{PipelineMetrics, OUTCOME_ERROR, OUTCOME_OK, OUTCOME_TIMEOUT};
use crate::pipeline::ReadingCache;
use crate::publisher::Publisher;
use edgelink_common::{DeviceSpec, Reading};
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters a poller hands back when it stops after cancellation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollerReport {
    pub device_id: String,
    /// Timer firings handled
    pub ticks: u64,
    /// Successful polls (each one written to the cache)
    pub readings: u64,
    /// Polls that hit the deadline or were cancelled
    pub polls_abandoned: u64,
    /// Polls that failed for any other reason
    pub polls_failed: u64,
    /// Publishes the sink rejected
    pub publish_failures: u64,
}

pub struct Poller {
    spec: DeviceSpec,
    driver: Box<dyn Driver>,
    cache: Arc<dyn ReadingCache>,
    publisher: Arc<dyn Publisher>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Poller {
    pub fn new(
        spec: DeviceSpec,
        driver: Box<dyn Driver>,
        cache: Arc<dyn ReadingCache>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            spec,
            driver,
            cache,
            publisher,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn device_id(&self) -> &str {
        &self.spec.id
    }

    /// Run until `shutdown` is cancelled, then close the driver.
    pub async fn run(mut self, shutdown: CancellationToken) -> PollerReport {
        let every = self.spec.poll_every;
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut report = PollerReport {
            device_id: self.spec.id.clone(),
            ..PollerReport::default()
        };
        info!(device = %self.spec.id, interval = ?every, "poller started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.tick(&shutdown, &mut report).await,
            }
        }

        if let Err(e) = self.driver.close().await {
            warn!(device = %self.spec.id, error = %e, "driver close failed");
        }
        info!(
            device = %self.spec.id,
            ticks = report.ticks,
            readings = report.readings,
            "poller stopped"
        );
        report
    }

    async fn tick(&mut self, shutdown: &CancellationToken, report: &mut PollerReport) {
        report.ticks += 1;

        let reading = match self.poll_once(shutdown).await {
            Ok(reading) => reading,
            Err(e) if e.is_expected() => {
                report.polls_abandoned += 1;
                debug!(device = %self.spec.id, reason = %e, "poll abandoned");
                return;
            }
            Err(e) => {
                report.polls_failed += 1;
                warn!(device = %self.spec.id, error = %e, "poll error");
                return;
            }
        };
        report.readings += 1;

        // The cache reflects the last successful read, whatever happens downstream
        self.cache.set(reading.clone());
        if let Some(metrics) = &self.metrics {
            metrics.set_devices_cached(self.cache.len());
        }

        let published = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            result = self.publisher.publish(&reading) => Some(result),
        };
        match published {
            Some(Ok(())) => self.record_publish(true),
            Some(Err(e)) => {
                report.publish_failures += 1;
                self.record_publish(false);
                warn!(device = %self.spec.id, error = %e, "publish error");
            }
            None => debug!(device = %self.spec.id, "publish abandoned at shutdown"),
        }
    }

    /// One driver call bounded by half the interval and by shutdown.
    async fn poll_once(&mut self, shutdown: &CancellationToken) -> Result<Reading, DriverError> {
        let budget = self.spec.poll_budget();
        let started = Instant::now();
        let ctx = PollContext::new(started + budget, shutdown.child_token());

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(DriverError::Cancelled),
            polled = tokio::time::timeout(budget, self.driver.poll(&ctx)) => {
                polled.unwrap_or(Err(DriverError::DeadlineExceeded))
            }
        };
        // Anything still watching this attempt must give up now
        ctx.token().cancel();

        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(_) => OUTCOME_OK,
                Err(e) if e.is_expected() => OUTCOME_TIMEOUT,
                Err(_) => OUTCOME_ERROR,
            };
            metrics.record_poll(&self.spec.id, outcome, started.elapsed());
        }
        result
    }

    fn record_publish(&self, ok: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_publish(&self.spec.id, ok);
        }
    }
}
