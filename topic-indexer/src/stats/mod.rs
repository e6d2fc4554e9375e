//! Periodic counter reports.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};
use topic_indexer_shared::{CountersSnapshot, PipelineCounters};

/// One stats report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    pub messages_rx: u64,
    pub messages_tx: u64,
    pub rx_per_sec: f64,
    pub tx_per_sec: f64,
}

impl StatsReport {
    /// Totals from `current`, rates from the change since `previous`.
    pub fn between(
        previous: CountersSnapshot,
        current: CountersSnapshot,
        elapsed: Duration,
    ) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        let rate = |now: u64, before: u64| {
            if elapsed_secs > 0.0 {
                now.saturating_sub(before) as f64 / elapsed_secs
            } else {
                0.0
            }
        };

        Self {
            messages_rx: current.consumed,
            messages_tx: current.sent,
            rx_per_sec: rate(current.consumed, previous.consumed),
            tx_per_sec: rate(current.sent, previous.sent),
        }
    }
}

/// Logs the consumed/sent counters every `report_sec` seconds.
pub struct StatsReporter {
    report_sec: u64,
    counters: Arc<PipelineCounters>,
}

impl StatsReporter {
    pub fn new(report_sec: u64, counters: Arc<PipelineCounters>) -> Self {
        Self {
            report_sec,
            counters,
        }
    }

    /// Report forever. Returns immediately when reporting is disabled.
    pub async fn run(self) {
        if self.report_sec == 0 {
            debug!("Stats reporting disabled");
            return;
        }

        let period = Duration::from_secs(self.report_sec);
        let mut report_timer = interval_at(Instant::now() + period, period);
        report_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut previous = self.counters.snapshot();
        let mut previous_at = Instant::now();

        loop {
            report_timer.tick().await;

            let current = self.counters.snapshot();
            let now = Instant::now();
            let report = StatsReport::between(previous, current, now.duration_since(previous_at));

            info!(
                messages_rx = report.messages_rx,
                messages_tx = report.messages_tx,
                rx_per_sec = format!("{:.2}", report.rx_per_sec),
                tx_per_sec = format!("{:.2}", report.tx_per_sec),
                "Processed messages from bus to index"
            );

            previous = current;
            previous_at = now;
        }
    }
}
