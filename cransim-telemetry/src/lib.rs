//! # Cransim Telemetry
//!
//! Crate for logging and metrics shared by the replay pipeline and the server.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::{MetricsRecorder, MetricsSnapshot};
