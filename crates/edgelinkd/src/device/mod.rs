//! Device driver abstraction.
//!
//! A driver produces one reading per `poll` call or fails. The pipeline does
//! not care whether the device behind it is real or simulated; it only
//! relies on `poll` being safe to call repeatedly and safe to abandon
//! mid-call when the per-tick deadline expires.

pub mod simulated;

pub use simulated::SimulatedDriver;

use async_trait::async_trait;
use edgelink_common::{DeviceSpec, Reading};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Error types for driver operations.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// The per-tick deadline expired before the device answered
    #[error("poll deadline exceeded")]
    DeadlineExceeded,

    /// The gateway is shutting down
    #[error("poll cancelled")]
    Cancelled,

    /// Link-level failure talking to the device
    #[error("transport error: {0}")]
    Transport(String),

    /// The device answered with something unusable
    #[error("device error: {0}")]
    Device(String),

    /// No driver exists for the configured device type
    #[error("unsupported device type '{0}'")]
    Unsupported(String),
}

impl DriverError {
    /// Deadline and cancellation are normal outcomes of the poll loop and
    /// are not reported as failures.
    pub fn is_expected(&self) -> bool {
        matches!(self, DriverError::DeadlineExceeded | DriverError::Cancelled)
    }
}

/// Bounded context for one poll attempt.
///
/// The token is a child of the gateway's shutdown token, so it is cancelled
/// both at shutdown and when the poller abandons the attempt.
#[derive(Debug, Clone)]
pub struct PollContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl PollContext {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    /// Context with `budget` from now and its own (root) cancellation token.
    pub fn with_budget(budget: Duration) -> Self {
        Self::new(Instant::now() + budget, CancellationToken::new())
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline (zero once passed).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Check the context before starting expensive work.
    pub fn check(&self) -> Result<(), DriverError> {
        if self.cancel.is_cancelled() {
            Err(DriverError::Cancelled)
        } else if Instant::now() >= self.deadline {
            Err(DriverError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

/// Capability set every device driver provides.
#[async_trait]
pub trait Driver: Send {
    /// Read one snapshot from the device.
    async fn poll(&mut self, ctx: &PollContext) -> Result<Reading, DriverError>;

    /// Release the device. Called once when the poller stops.
    async fn close(&mut self) -> Result<(), DriverError>;
}

/// Select a driver implementation for a device spec by its type tag.
pub fn build_driver(spec: &DeviceSpec) -> Result<Box<dyn Driver>, DriverError> {
    match spec.device_type.as_str() {
        "fake" | "simulated" => Ok(Box::new(SimulatedDriver::new(spec.clone()))),
        other => Err(DriverError::Unsupported(other.to_string())),
    }
}
