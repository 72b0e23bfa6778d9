//! ## cransim-telemetry::logging
//! **Structured logging with `tracing`**
//!
//! ### Expectations:
//! - One subscriber per process, installed before any task is spawned
//! - `RUST_LOG` always wins over the configured filter
//! - Periodic replay statistics emitted as a single structured event

use tracing::info_span;
use tracing_subscriber::{fmt, EnvFilter};

use crate::metrics::MetricsSnapshot;

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global fmt subscriber. Later calls are no-ops.
    pub fn init(default_filter: &str) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));

        let _ = fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_target(false)
            .try_init();
    }

    pub fn log_stats(snapshot: &MetricsSnapshot) {
        let span = info_span!("replay_stats", otel.kind = "INTERNAL");
        let _guard = span.enter();

        tracing::info!(
            published = snapshot.lines_published,
            dropped = snapshot.lines_dropped,
            skipped = snapshot.lines_skipped,
            parse_errors = snapshot.parse_errors,
            archive_errors = snapshot.archive_errors,
            connections = snapshot.connections,
            subscribers = snapshot.active_subscribers,
            "Replay statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_stats_logging() {
        let snapshot = MetricsSnapshot {
            lines_published: 12,
            lines_dropped: 3,
            active_subscribers: 2,
            ..MetricsSnapshot::default()
        };
        EventLogger::log_stats(&snapshot);
        assert!(logs_contain("Replay statistics"));
        assert!(logs_contain("published=12"));
        assert!(logs_contain("subscribers=2"));
    }
}
