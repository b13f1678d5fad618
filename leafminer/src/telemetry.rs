//! Periodic statistics reporting.
//!
//! The mining core only writes counters into [`JobState`]. A reporter task
//! samples them on an interval, derives a hash rate, and hands the result to
//! a [`TelemetrySink`]. The default sink writes a log line; a display or
//! metrics exporter would implement the same trait.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::state::{JobState, Stats};
use crate::stratum_v1::SubmissionQueue;
use crate::tracing::prelude::*;
use crate::types::{Difficulty, HashRate};

/// One sample of the mining counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryReport {
    pub stats: Stats,

    /// Average since the previous sample
    #[serde(serialize_with = "serialize_hash_rate")]
    pub hash_rate: HashRate,

    /// Shares lost to a full submission queue since startup
    pub submissions_dropped: u64,
}

fn serialize_hash_rate<S: serde::Serializer>(rate: &HashRate, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(rate.0)
}

/// Consumer of telemetry reports.
pub trait TelemetrySink: Send + Sync {
    fn report(&self, report: &TelemetryReport);
}

/// Sink that logs each report at INFO.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn report(&self, report: &TelemetryReport) {
        let stats = &report.stats;
        info!(
            hashrate = %report.hash_rate,
            hashes = stats.hashes,
            accepted = stats.accepted,
            rejected = stats.rejected,
            blocks = stats.blocks_found,
            best = %Difficulty::new(stats.highest_difficulty),
            pool_difficulty = %Difficulty::new(stats.pool_difficulty),
            dropped = report.submissions_dropped,
            "Mining stats"
        );
    }
}

/// Turns successive counter snapshots into reports.
pub struct Reporter {
    state: Arc<JobState>,
    queue: Arc<SubmissionQueue>,
    last_sample: Instant,
    last_hashes: u64,
}

impl Reporter {
    pub fn new(state: Arc<JobState>, queue: Arc<SubmissionQueue>, now: Instant) -> Self {
        let last_hashes = state.stats().hashes;
        Self {
            state,
            queue,
            last_sample: now,
            last_hashes,
        }
    }

    pub fn sample(&mut self, now: Instant) -> TelemetryReport {
        let stats = self.state.stats();

        // The counter restarts from zero when the session resets
        let hashes = stats.hashes.saturating_sub(self.last_hashes);
        let hash_rate = HashRate::from_hashes(hashes, now.saturating_duration_since(self.last_sample));

        self.last_sample = now;
        self.last_hashes = stats.hashes;

        TelemetryReport {
            stats,
            hash_rate,
            submissions_dropped: self.queue.dropped(),
        }
    }
}

/// Report every `period` until `shutdown` is cancelled.
pub async fn run_reporter(
    state: Arc<JobState>,
    queue: Arc<SubmissionQueue>,
    sink: Arc<dyn TelemetrySink>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let start = Instant::now();
    let mut reporter = Reporter::new(state, queue, start);
    let mut ticker = interval_at(start + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => sink.report(&reporter.sample(Instant::now())),
        }
    }
    debug!("Telemetry reporter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<TelemetryReport>>,
    }

    impl TelemetrySink for RecordingSink {
        fn report(&self, report: &TelemetryReport) {
            self.reports.lock().push(*report);
        }
    }

    #[test]
    fn test_sample_computes_rate_since_last_sample() {
        let state = Arc::new(JobState::new());
        let start = Instant::now();
        state.record_hashes(1_000);
        let mut reporter = Reporter::new(state.clone(), Arc::new(SubmissionQueue::new()), start);

        state.record_hashes(5_000);
        let report = reporter.sample(start + Duration::from_secs(1));
        assert_eq!(report.hash_rate, HashRate(5_000));
        assert_eq!(report.stats.hashes, 6_000);

        state.record_hashes(20_000);
        let report = reporter.sample(start + Duration::from_secs(3));
        assert_eq!(report.hash_rate, HashRate(10_000));
    }

    #[test]
    fn test_sample_after_counter_reset() {
        let state = Arc::new(JobState::new());
        let start = Instant::now();
        state.record_hashes(1_000);
        let mut reporter = Reporter::new(state.clone(), Arc::new(SubmissionQueue::new()), start);

        state.reset_session();
        let report = reporter.sample(start + Duration::from_secs(1));

        assert!(report.hash_rate.is_zero());
    }

    #[test]
    fn test_report_serializes() {
        let state = Arc::new(JobState::new());
        state.record_accepted();
        let mut reporter =
            Reporter::new(state, Arc::new(SubmissionQueue::new()), Instant::now());

        let json = serde_json::to_value(reporter.sample(Instant::now())).unwrap();

        assert_eq!(json["stats"]["accepted"], 1);
        assert_eq!(json["hash_rate"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_runs_on_interval_until_cancelled() {
        let state = Arc::new(JobState::new());
        let sink = Arc::new(RecordingSink::default());
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run_reporter(
            state.clone(),
            Arc::new(SubmissionQueue::new()),
            sink.clone(),
            Duration::from_secs(30),
            shutdown.clone(),
        ));

        // Let the reporter take its baseline first
        tokio::time::sleep(Duration::from_secs(1)).await;
        state.record_hashes(30_000);
        tokio::time::sleep(Duration::from_secs(64)).await;
        shutdown.cancel();
        task.await.unwrap();

        let reports = sink.reports.lock();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].hash_rate, HashRate(1_000));
        assert!(reports[1].hash_rate.is_zero());
    }
}
