//! Ingest counters updated from the listener and the workers

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    dropped: AtomicU64,
    read_errors: AtomicU64,
    oversized: AtomicU64,
    malformed: AtomicU64,
    unknown: AtomicU64,
    unauthorized: AtomicU64,
    dispatched: AtomicU64,
    handler_errors: AtomicU64,
    handler_panics: AtomicU64,
    worker_restarts: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub dropped: u64,
    pub read_errors: u64,
    pub oversized: u64,
    pub malformed: u64,
    pub unknown: u64,
    pub unauthorized: u64,
    pub dispatched: u64,
    pub handler_errors: u64,
    pub handler_panics: u64,
    pub worker_restarts: u64,
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        bump(&self.received);
    }

    /// Datagram dropped because the dispatch queue stayed full
    pub fn record_dropped(&self) {
        bump(&self.dropped);
    }

    pub fn record_read_error(&self) {
        bump(&self.read_errors);
    }

    pub fn record_oversized(&self) {
        bump(&self.oversized);
    }

    pub fn record_malformed(&self) {
        bump(&self.malformed);
    }

    pub fn record_unknown(&self) {
        bump(&self.unknown);
    }

    pub fn record_unauthorized(&self) {
        bump(&self.unauthorized);
    }

    /// Packet handed to every handler
    pub fn record_dispatched(&self) {
        bump(&self.dispatched);
    }

    pub fn record_handler_error(&self) {
        bump(&self.handler_errors);
    }

    pub fn record_handler_panic(&self) {
        bump(&self.handler_panics);
    }

    pub fn record_worker_restart(&self) {
        bump(&self.worker_restarts);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            unauthorized: self.unauthorized.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            worker_restarts: self.worker_restarts.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} dispatched={} dropped={} malformed={} unknown={} unauthorized={} \
             oversized={} read_errors={} handler_errors={} handler_panics={} worker_restarts={}",
            self.received,
            self.dispatched,
            self.dropped,
            self.malformed,
            self.unknown,
            self.unauthorized,
            self.oversized,
            self.read_errors,
            self.handler_errors,
            self.handler_panics,
            self.worker_restarts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = IngestStats::new();
        stats.record_received();
        stats.record_received();
        stats.record_malformed();
        stats.record_handler_panic();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.malformed, 1);
        assert_eq!(snapshot.handler_panics, 1);
        assert_eq!(snapshot.dispatched, 0);
    }

    #[test]
    fn test_display() {
        let snapshot = StatsSnapshot {
            received: 5,
            dropped: 1,
            ..Default::default()
        };
        let line = snapshot.to_string();
        assert!(line.starts_with("received=5 dispatched=0 dropped=1"));
    }
}
