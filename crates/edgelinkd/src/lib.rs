//! EdgeLink gateway daemon library - exposes modules for testing.

pub mod device;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod publisher;
pub mod routes;
pub mod server;
pub mod supervisor;

pub use supervisor::{Gateway, GatewayReport};
