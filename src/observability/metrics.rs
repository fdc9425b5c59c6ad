//! Metrics collection.
//!
//! # Metrics
//! - `tls_listener_accepts_total` (counter): sockets accepted
//! - `tls_listener_accept_errors_total` (counter): failed accept operations
//! - `tls_listener_handshakes_total` (counter): handshakes by `outcome`
//! - `tls_listener_active_sessions` (gauge): live sessions
//!
//! Every value recorded through the `metrics` facade is also kept in
//! [`ListenerStats`], which needs no recorder and is what tests read.

use std::sync::atomic::{AtomicU64, Ordering};

/// Handshake outcome label values.
pub const OUTCOME_ESTABLISHED: &str = "established";
pub const OUTCOME_FAILED: &str = "failed";
pub const OUTCOME_TIMED_OUT: &str = "timed_out";

/// Per-listener counters.
#[derive(Debug, Default)]
pub struct ListenerStats {
    accepts_posted: AtomicU64,
    accepted: AtomicU64,
    accept_errors: AtomicU64,
    established: AtomicU64,
    handshake_failures: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of [`ListenerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub accepts_posted: u64,
    pub accepted: u64,
    pub accept_errors: u64,
    pub established: u64,
    pub handshake_failures: u64,
    pub timeouts: u64,
}

impl StatsSnapshot {
    /// Sessions whose handshake outcome has been acted upon.
    pub fn resolved(&self) -> u64 {
        self.established + self.handshake_failures + self.timeouts
    }
}

impl ListenerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly posted accept operation and return its sequence number.
    pub fn record_accept_posted(&self) -> u64 {
        self.accepts_posted.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn accepts_posted(&self) -> u64 {
        self.accepts_posted.load(Ordering::SeqCst)
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tls_listener_accepts_total").increment(1);
    }

    pub fn record_accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tls_listener_accept_errors_total").increment(1);
    }

    pub fn record_established(&self) {
        self.established.fetch_add(1, Ordering::Relaxed);
        record_handshake(OUTCOME_ESTABLISHED);
    }

    pub fn record_handshake_failure(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
        record_handshake(OUTCOME_FAILED);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        record_handshake(OUTCOME_TIMED_OUT);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepts_posted: self.accepts_posted.load(Ordering::SeqCst),
            accepted: self.accepted.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            established: self.established.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

fn record_handshake(outcome: &'static str) {
    metrics::counter!("tls_listener_handshakes_total", "outcome" => outcome).increment(1);
}

/// Publish the live session count.
pub fn record_active_sessions(count: u64) {
    metrics::gauge!("tls_listener_active_sessions").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_sequence_numbers_start_at_one() {
        let stats = ListenerStats::new();
        assert_eq!(stats.record_accept_posted(), 1);
        assert_eq!(stats.record_accept_posted(), 2);
        assert_eq!(stats.accepts_posted(), 2);
    }

    #[test]
    fn snapshot_counts_resolved_sessions() {
        let stats = ListenerStats::new();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_established();
        stats.record_handshake_failure();
        stats.record_timeout();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.accepted, 3);
        assert_eq!(snapshot.resolved(), 3);
    }
}
