//! Fault-tolerant supervisor for a PPP-over-serial to Wi-Fi access point
//! bridge.
//!
//! The supervisor keeps the point-to-point link negotiated over a serial
//! transport, periodically checks that access point clients are reachable,
//! restarts the access point when they are not, and feeds a liveness timer
//! so that a total software hang still ends in a clean reset.

pub mod access_point;
pub mod api;
pub mod api_client;
pub mod config;
pub mod error;
pub mod link;
pub mod liveness;
pub mod monitor;
pub mod presentation;
pub mod recovery;
pub mod telemetry;
#[cfg(test)]
pub(crate) mod testing;
pub mod tracing;
pub mod transport;
pub mod types;
