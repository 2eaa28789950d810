//! Shared types for the EdgeLink gateway.
//!
//! Data model (readings, device specs), configuration loading and the
//! error types shared between the daemon and its tests.

pub mod config;
pub mod error;
pub mod models;

pub use config::{device_topic, BrokerConfig, Config, PublisherKind};
pub use error::ConfigError;
pub use models::{DeviceSpec, Reading, QUALITY_GOOD};

/// Crate version, shared by every EdgeLink component.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short git hash captured at build time ("unknown" outside a checkout).
pub const GIT_SHA: &str = env!("EDGELINK_GIT_SHA");
