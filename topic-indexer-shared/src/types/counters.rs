//! Pipeline counters shared by the consumers and dispatchers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic consumed/sent counters, safe to increment from any task.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    consumed: AtomicU64,
    sent: AtomicU64,
}

/// A point-in-time copy of [`PipelineCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub consumed: u64,
    pub sent: u64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message received from the bus.
    pub fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record documents delivered to the indexing backend.
    pub fn record_sent(&self, count: u64) {
        self.sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            consumed: self.consumed(),
            sent: self.sent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_increments() {
        let counters = Arc::new(PipelineCounters::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.record_consumed();
                        counters.record_sent(1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            counters.snapshot(),
            CountersSnapshot {
                consumed: 8000,
                sent: 8000
            }
        );
    }
}
