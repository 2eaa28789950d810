//! Pipeline supervisor
//!
//! Owns the process-wide cache, publisher and metrics, starts one poller
//! task per configured device plus the query interface, and fans a single
//! shutdown token out to all of them.

use crate::device::build_driver;
use crate::metrics::PipelineMetrics;
use crate::pipeline::{MemoryCache, Poller, PollerReport, ReadingCache};
use crate::publisher::{build_publisher, Publisher};
use crate::server::{self, AppState};
use anyhow::{Context, Result};
use edgelink_common::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Upper bound for the query interface to finish in-flight requests
const SERVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// What the gateway hands back after a clean shutdown
#[derive(Debug, Default)]
pub struct GatewayReport {
    /// One report per poller that stopped in time, sorted by device id
    pub pollers: Vec<PollerReport>,
    /// Pollers aborted after `shutdown_wait` expired
    pub aborted: usize,
}

pub struct Gateway {
    config: Config,
    cache: Arc<MemoryCache>,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<PipelineMetrics>,
    pollers: Vec<Poller>,
}

impl Gateway {
    /// Build every component from configuration.
    ///
    /// Must run inside a tokio runtime. Fails on invalid configuration or a
    /// device type without a driver; nothing is started in that case.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let publisher = build_publisher(&config.broker).context("failed to start publisher")?;
        Self::with_publisher(config, publisher)
    }

    /// Same as `new` but with a caller-supplied sink.
    pub fn with_publisher(config: Config, publisher: Arc<dyn Publisher>) -> Result<Self> {
        let metrics = Arc::new(PipelineMetrics::new().context("failed to register metrics")?);
        let cache = Arc::new(MemoryCache::with_capacity(config.devices.len()));

        let mut pollers = Vec::with_capacity(config.devices.len());
        for spec in &config.devices {
            let driver = build_driver(spec)
                .with_context(|| format!("device '{}'", spec.id))?;
            let poller = Poller::new(
                spec.clone(),
                driver,
                Arc::clone(&cache) as Arc<dyn ReadingCache>,
                Arc::clone(&publisher),
            )
            .with_metrics(Arc::clone(&metrics));
            pollers.push(poller);
        }

        Ok(Self {
            config,
            cache,
            publisher,
            metrics,
            pollers,
        })
    }

    pub fn cache(&self) -> Arc<MemoryCache> {
        Arc::clone(&self.cache)
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn device_count(&self) -> usize {
        self.pollers.len()
    }

    /// Run until `shutdown` is cancelled, then drain pollers, close the
    /// publisher and stop the query interface, in that order.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<GatewayReport> {
        let Gateway {
            config,
            cache,
            publisher,
            metrics,
            pollers: to_start,
        } = self;

        let server_token = CancellationToken::new();
        let state = AppState::new(cache as Arc<dyn ReadingCache>, metrics);
        let server = tokio::spawn(server::run(listener, state, server_token.clone()));

        let mut pollers = JoinSet::new();
        for poller in to_start {
            pollers.spawn(poller.run(shutdown.clone()));
        }
        info!(devices = pollers.len(), "gateway running");

        shutdown.cancelled().await;
        info!("shutdown signal received");

        let mut report = GatewayReport::default();
        let drained = tokio::time::timeout(config.shutdown_wait, async {
            while let Some(joined) = pollers.join_next().await {
                match joined {
                    Ok(poller_report) => report.pollers.push(poller_report),
                    Err(e) => error!("poller task failed: {}", e),
                }
            }
        })
        .await;
        if drained.is_err() {
            report.aborted = pollers.len();
            warn!(
                remaining = report.aborted,
                wait = ?config.shutdown_wait,
                "pollers did not stop in time, aborting"
            );
            pollers.abort_all();
        }
        report.pollers.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        if let Err(e) = publisher.close().await {
            warn!(error = %e, "publisher close failed");
        }

        server_token.cancel();
        match tokio::time::timeout(SERVER_SHUTDOWN_TIMEOUT, server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!("query interface error: {:#}", e),
            Ok(Err(e)) => error!("query interface task failed: {}", e),
            Err(_) => warn!("query interface did not stop within {:?}", SERVER_SHUTDOWN_TIMEOUT),
        }

        info!(pollers = report.pollers.len(), "gateway stopped");
        Ok(report)
    }
}

/// Resolve on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
