//! Session counters and monitoring
//!
//! Lightweight atomic counters for the session layer; a snapshot feeds the
//! status output and the demo summary.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the session counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub commands_submitted: u64,
    pub commands_completed: u64,
    pub commands_failed: u64,
    pub channels_opened: u64,
    pub open_failures: u64,
    pub channels_died: u64,
}

/// Counter set shared between the session manager, the dispatcher and the
/// channel observer
#[derive(Debug, Default)]
pub struct SessionMetrics {
    commands_submitted: AtomicU64,
    commands_completed: AtomicU64,
    commands_failed: AtomicU64,
    channels_opened: AtomicU64,
    open_failures: AtomicU64,
    channels_died: AtomicU64,
}

impl SessionMetrics {
    /// Create a fresh counter set
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.commands_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.commands_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.commands_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_channel_opened(&self) {
        self.channels_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_open_failure(&self) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_channel_died(&self) {
        self.channels_died.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters at once
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_submitted: self.commands_submitted.load(Ordering::Relaxed),
            commands_completed: self.commands_completed.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            channels_opened: self.channels_opened.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            channels_died: self.channels_died.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = SessionMetrics::new();
        metrics.record_submitted();
        metrics.record_submitted();
        metrics.record_completed();
        metrics.record_failed();
        metrics.record_channel_opened();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.commands_submitted, 2);
        assert_eq!(snapshot.commands_completed, 1);
        assert_eq!(snapshot.commands_failed, 1);
        assert_eq!(snapshot.channels_opened, 1);
        assert_eq!(snapshot.channels_died, 0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let metrics = SessionMetrics::new();
        let before = metrics.snapshot();
        metrics.record_submitted();
        assert_eq!(before, MetricsSnapshot::default());
        assert_ne!(metrics.snapshot(), before);
    }
}
