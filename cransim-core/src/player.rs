//! # Player
//!
//! Paces archive records against the virtual clock and hands each one to
//! the broadcast hub once virtual "now" reaches its embedded timestamp.
//!
//! ## Pacing rules
//! - Scanner failures back off for a fixed interval and retry
//! - Records with an unreadable timestamp are skipped, never retried
//! - The first record since startup is emitted even if already late;
//!   every later late record is skipped instead of replayed in a burst
//! - A run of skipped lines yields to the runtime every [`SKIP_YIELD_INTERVAL`] lines

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use tokio::task::yield_now;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use cransim_telemetry::MetricsRecorder;

use crate::archive::LineSource;
use crate::clock::VirtualClock;
use crate::error::TimestampError;
use crate::hub::HubHandle;

/// Width of the leading `"YYYY-MM-DD","HH:MM:SS"` field.
pub const TIMESTAMP_LEN: usize = 23;

const TIMESTAMP_FORMAT: &str = "\"%Y-%m-%d\",\"%H:%M:%S\"";

/// Delay before retrying after a scanner failure.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Consecutive skipped lines between forced yields.
pub const SKIP_YIELD_INTERVAL: u32 = 256;

/// Reads the UTC timestamp a record line starts with.
pub fn parse_record_time(line: &str) -> Result<DateTime<Utc>, TimestampError> {
    if line.len() < TIMESTAMP_LEN {
        return Err(TimestampError::Truncated);
    }
    let field = line.get(..TIMESTAMP_LEN).ok_or(TimestampError::Malformed)?;
    let at = NaiveDateTime::parse_from_str(field, TIMESTAMP_FORMAT)?;
    Ok(at.and_utc())
}

pub struct Player<S> {
    source: S,
    clock: VirtualClock,
    hub: HubHandle,
    metrics: MetricsRecorder,
    backoff: Duration,
    first_record_handled: bool,
    skips_since_yield: u32,
}

impl<S: LineSource> Player<S> {
    pub fn new(source: S, clock: VirtualClock, hub: HubHandle, metrics: MetricsRecorder) -> Self {
        Self {
            source,
            clock,
            hub,
            metrics,
            backoff: DEFAULT_RETRY_BACKOFF,
            first_record_handled: false,
            skips_since_yield: 0,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Replays records until the hub goes away.
    #[instrument(level = "info", name = "player", skip_all)]
    pub async fn run(mut self) {
        info!(offset = %self.clock.offset(), "Starting replay");
        loop {
            let line = match self.source.next_line() {
                Ok(line) => line,
                Err(err) => {
                    self.metrics.archive_errors.inc();
                    warn!(error = %err, "Archive read failed, backing off");
                    sleep(self.backoff).await;
                    continue;
                }
            };

            let at = match parse_record_time(&line) {
                Ok(at) => at,
                Err(err) => {
                    self.metrics.parse_errors.inc();
                    warn!(error = %err, "Skipping record with unreadable timestamp");
                    self.skipped().await;
                    continue;
                }
            };

            let Some(wait) = self.schedule(at) else {
                self.metrics.lines_skipped.inc();
                debug!(%at, "Skipping late record");
                self.skipped().await;
                continue;
            };
            self.skips_since_yield = 0;
            if !wait.is_zero() {
                sleep(wait).await;
            }

            let mut payload = line.into_bytes();
            payload.push(b'\n');
            if self.hub.publish(Bytes::from(payload)).await.is_err() {
                info!("Broadcast hub closed, stopping replay");
                return;
            }
        }
    }

    async fn skipped(&mut self) {
        self.skips_since_yield += 1;
        if self.skips_since_yield >= SKIP_YIELD_INTERVAL {
            self.skips_since_yield = 0;
            yield_now().await;
        }
    }

    /// How long to wait before emitting a record stamped `at`, or `None`
    /// when it is late and not the first record since startup.
    fn schedule(&mut self, at: DateTime<Utc>) -> Option<Duration> {
        let wait = at - self.clock.now();
        let first = !self.first_record_handled;
        self.first_record_handled = true;

        if wait < TimeDelta::zero() && !first {
            return None;
        }
        Some(wait.to_std().unwrap_or(Duration::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::error::ArchiveError;
    use crate::hub::{BroadcastHub, Subscriber};
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    const OFFSET_DAYS: i64 = 28;

    /// Virtual "now" at the start of every test: 2024-03-01 12:00:00.
    fn wall_epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 29, 12, 0, 0).unwrap()
    }

    fn record(hms: &str, rest: &str) -> String {
        format!("\"2024-03-01\",\"{hms}\",{rest}")
    }

    struct ScriptedSource {
        items: VecDeque<Result<String, ArchiveError>>,
    }

    impl ScriptedSource {
        fn lines(lines: &[String]) -> Self {
            Self {
                items: lines.iter().cloned().map(Ok).collect(),
            }
        }
    }

    impl LineSource for ScriptedSource {
        fn next_line(&mut self) -> Result<String, ArchiveError> {
            self.items.pop_front().unwrap_or_else(|| {
                Err(ArchiveError::MissingOrEmpty {
                    path: PathBuf::from("2024-03-02.csv.gz"),
                    size: None,
                })
            })
        }
    }

    struct Harness {
        hub: HubHandle,
        metrics: MetricsRecorder,
        start: Instant,
    }

    impl Harness {
        fn new() -> Self {
            let metrics = MetricsRecorder::new().unwrap();
            let (hub, _task) = BroadcastHub::spawn(64, metrics.clone());
            Self {
                hub,
                metrics,
                start: Instant::now(),
            }
        }

        async fn subscribe(&self) -> mpsc::Receiver<Bytes> {
            let (tx, rx) = mpsc::channel(64);
            let peer = "127.0.0.1:50000".parse().unwrap();
            self.hub.register(Subscriber::new(tx, peer)).await.unwrap();
            rx
        }

        fn play(&self, source: ScriptedSource) {
            let clock = VirtualClock::with_wall_clock(
                TimeDelta::days(OFFSET_DAYS),
                MonotonicClock::anchored_at(wall_epoch()),
            );
            let player = Player::new(source, clock, self.hub.clone(), self.metrics.clone());
            tokio::spawn(player.run());
        }

        async fn next(&self, rx: &mut mpsc::Receiver<Bytes>) -> (String, Duration) {
            let line = rx.recv().await.unwrap();
            let text = String::from_utf8(line.to_vec()).unwrap();
            (text, self.start.elapsed())
        }
    }

    fn assert_near(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(20),
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn parses_leading_timestamp() {
        let at = parse_record_time(&record("06:07:18", "1234,\"3.1.2\"")).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 3, 1, 6, 7, 18).unwrap());
    }

    #[test]
    fn rejects_bad_timestamps() {
        assert!(matches!(
            parse_record_time("\"2024-03-01\""),
            Err(TimestampError::Truncated)
        ));
        assert!(matches!(
            parse_record_time("\"2024-13-01\",\"06:07:18\",x"),
            Err(TimestampError::Invalid(_))
        ));
        assert!(matches!(
            parse_record_time("\"2024-03-01\",\"06:07:18\u{e9},x"),
            Err(TimestampError::Malformed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn paces_records_and_emits_first_late_record() {
        let harness = Harness::new();
        let mut early = harness.subscribe().await;
        harness.play(ScriptedSource::lines(&[
            record("11:59:58", "t0"),
            record("12:00:05", "t1"),
            record("12:00:10", "t2"),
        ]));

        let (line, at) = harness.next(&mut early).await;
        assert_eq!(line, format!("{}\n", record("11:59:58", "t0")));
        assert_near(at, Duration::ZERO);

        let mut late = harness.subscribe().await;

        let (line, at) = harness.next(&mut early).await;
        assert_eq!(line, format!("{}\n", record("12:00:05", "t1")));
        assert_near(at, Duration::from_secs(5));

        let (line, at) = harness.next(&mut early).await;
        assert_eq!(line, format!("{}\n", record("12:00:10", "t2")));
        assert_near(at, Duration::from_secs(10));

        let (line, _) = harness.next(&mut late).await;
        assert!(line.ends_with("t1\n"), "late subscriber must start at t1");
        let (line, _) = harness.next(&mut late).await;
        assert!(line.ends_with("t2\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn later_late_records_are_skipped() {
        let harness = Harness::new();
        let mut rx = harness.subscribe().await;
        harness.play(ScriptedSource::lines(&[
            record("11:00:00", "first"),
            record("11:30:00", "stale"),
            record("11:59:59", "stale"),
            record("12:00:01", "due"),
        ]));

        let (line, _) = harness.next(&mut rx).await;
        assert!(line.ends_with("first\n"));
        let (line, at) = harness.next(&mut rx).await;
        assert!(line.ends_with("due\n"));
        assert_near(at, Duration::from_secs(1));
        assert_eq!(harness.metrics.snapshot().lines_skipped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_records_do_not_count_as_first() {
        let harness = Harness::new();
        let mut rx = harness.subscribe().await;
        harness.play(ScriptedSource::lines(&[
            "garbage".to_string(),
            "\"2024-03-01\",\"25:00:00\",bad-hour".to_string(),
            record("10:00:00", "first"),
        ]));

        let (line, at) = harness.next(&mut rx).await;
        assert!(line.ends_with("first\n"));
        assert_near(at, Duration::ZERO);
        assert_eq!(harness.metrics.snapshot().parse_errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scanner_errors_back_off_before_retrying() {
        let harness = Harness::new();
        let mut rx = harness.subscribe().await;
        let source = ScriptedSource {
            items: VecDeque::from(vec![
                Err(ArchiveError::MissingOrEmpty {
                    path: PathBuf::from("2024-03-01.csv.gz"),
                    size: Some(20),
                }),
                Ok(record("11:59:00", "after-backoff")),
                Ok(record("23:59:59", "parked")),
            ]),
        };
        harness.play(source);

        let (line, at) = harness.next(&mut rx).await;
        assert!(line.ends_with("after-backoff\n"));
        assert_near(at, DEFAULT_RETRY_BACKOFF);
        assert_eq!(harness.metrics.snapshot().archive_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_day_does_not_stop_replay() {
        let harness = Harness::new();
        let mut rx = harness.subscribe().await;
        let source = ScriptedSource {
            items: VecDeque::from(vec![
                Ok(record("12:00:01", "before")),
                Err(ArchiveError::Corrupt {
                    path: PathBuf::from("2024-03-01.csv.gz"),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, "bad deflate"),
                }),
                Ok("\"2024-03-02\",\"00:00:00\",next-day".to_string()),
                Ok("\"2024-03-02\",\"23:59:59\",parked".to_string()),
            ]),
        };
        harness.play(source);

        let (line, _) = harness.next(&mut rx).await;
        assert!(line.ends_with("before\n"));
        let (line, at) = harness.next(&mut rx).await;
        assert!(line.ends_with("next-day\n"));
        assert_near(at, Duration::from_secs(12 * 3600));
        assert_eq!(harness.metrics.snapshot().archive_errors, 1);
    }

    /// Endless late backlog; every line is behind virtual "now".
    struct LateBacklog {
        left: u64,
    }

    impl LineSource for LateBacklog {
        fn next_line(&mut self) -> Result<String, ArchiveError> {
            if self.left == 0 {
                return Err(ArchiveError::MissingOrEmpty {
                    path: PathBuf::from("2024-03-02.csv.gz"),
                    size: None,
                });
            }
            self.left -= 1;
            Ok(record("00:00:00", "late"))
        }
    }

    #[tokio::test]
    async fn skipping_backlog_leaves_runtime_responsive() {
        const BACKLOG: u64 = 3_000_000;
        let metrics = MetricsRecorder::new().unwrap();
        let (hub, _task) = BroadcastHub::spawn(64, metrics.clone());
        let clock = VirtualClock::with_wall_clock(
            TimeDelta::days(OFFSET_DAYS),
            MonotonicClock::anchored_at(wall_epoch()),
        );
        let player = Player::new(LateBacklog { left: BACKLOG }, clock, hub, metrics.clone());
        tokio::spawn(player.run());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let skipped = metrics.snapshot().lines_skipped;
        assert!(
            skipped < BACKLOG - 1,
            "timer starved until the backlog was drained ({skipped} skipped)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_hub_is_gone() {
        let metrics = MetricsRecorder::new().unwrap();
        let (hub, task) = BroadcastHub::spawn(4, metrics.clone());
        task.abort();
        let _ = task.await;

        let clock = VirtualClock::with_wall_clock(
            TimeDelta::days(OFFSET_DAYS),
            MonotonicClock::anchored_at(wall_epoch()),
        );
        let source = ScriptedSource::lines(&[record("11:00:00", "orphan")]);
        Player::new(source, clock, hub, metrics).run().await;
    }
}
