//! ## cransim-telemetry::metrics
//! **Prometheus counters for the replay pipeline**
//!
//! ### Components:
//! - Player: published, skipped (late) and unparseable records, scanner failures
//! - Hub: per-subscriber drops, live subscriber gauge
//! - Server: accepted connections

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub lines_published: IntCounter,
    pub lines_dropped: IntCounter,
    pub lines_skipped: IntCounter,
    pub parse_errors: IntCounter,
    pub archive_errors: IntCounter,
    pub connections: IntCounter,
    pub active_subscribers: IntGauge,
}

/// Point-in-time copy of every metric, for log lines and assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub lines_published: u64,
    pub lines_dropped: u64,
    pub lines_skipped: u64,
    pub parse_errors: u64,
    pub archive_errors: u64,
    pub connections: u64,
    pub active_subscribers: i64,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let lines_published = IntCounter::new(
            "cransim_lines_published_total",
            "Records handed to the broadcast hub",
        )?;
        let lines_dropped = IntCounter::new(
            "cransim_lines_dropped_total",
            "Records discarded because a subscriber queue was full",
        )?;
        let lines_skipped = IntCounter::new(
            "cransim_lines_skipped_total",
            "Records skipped because their virtual time had already passed",
        )?;
        let parse_errors = IntCounter::new(
            "cransim_parse_errors_total",
            "Records whose timestamp could not be parsed",
        )?;
        let archive_errors = IntCounter::new(
            "cransim_archive_errors_total",
            "Failed archive reads (missing, empty or corrupt files)",
        )?;
        let connections = IntCounter::new(
            "cransim_connections_total",
            "Subscriber connections accepted",
        )?;
        let active_subscribers = IntGauge::new(
            "cransim_active_subscribers",
            "Subscribers currently registered with the hub",
        )?;

        registry.register(Box::new(lines_published.clone()))?;
        registry.register(Box::new(lines_dropped.clone()))?;
        registry.register(Box::new(lines_skipped.clone()))?;
        registry.register(Box::new(parse_errors.clone()))?;
        registry.register(Box::new(archive_errors.clone()))?;
        registry.register(Box::new(connections.clone()))?;
        registry.register(Box::new(active_subscribers.clone()))?;

        Ok(Self {
            registry,
            lines_published,
            lines_dropped,
            lines_skipped,
            parse_errors,
            archive_errors,
            connections,
            active_subscribers,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            lines_published: self.lines_published.get(),
            lines_dropped: self.lines_dropped.get(),
            lines_skipped: self.lines_skipped.get(),
            parse_errors: self.parse_errors.get(),
            archive_errors: self.archive_errors.get(),
            connections: self.connections.get(),
            active_subscribers: self.active_subscribers.get(),
        }
    }
}
