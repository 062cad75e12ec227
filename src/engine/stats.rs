//! Request statistics
//!
//! Counters owned by one engine. They are atomics so a snapshot can be
//! taken from another thread through [`Engine::stats_handle`](super::Engine::stats_handle).

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters
#[derive(Debug, Default)]
pub struct Stats {
    requests_started: AtomicU64,
    requests_restarted: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_timed_out: AtomicU64,
    requests_failed: AtomicU64,
    connections_created: AtomicU64,
    connections_destroyed: AtomicU64,
    connections_destroyed_timeout: AtomicU64,
    events: AtomicU64,
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Requests accepted by the engine
    pub requests_started: u64,
    /// Dispatch attempts, the first one included
    pub requests_restarted: u64,
    pub requests_succeeded: u64,
    pub requests_timed_out: u64,
    /// Terminal network, parse and internal failures
    pub requests_failed: u64,
    pub connections_created: u64,
    pub connections_destroyed: u64,
    /// Subset of `connections_destroyed` closed by a timeout
    pub connections_destroyed_timeout: u64,
    /// Readiness events dispatched; timer events are not counted
    pub events: u64,
}

impl StatsSnapshot {
    /// Completed requests of any outcome
    pub fn requests_completed(&self) -> u64 {
        self.requests_succeeded + self.requests_timed_out + self.requests_failed
    }

    pub fn events_per_request(&self) -> f64 {
        if self.requests_started == 0 {
            0.0
        } else {
            self.events as f64 / self.requests_started as f64
        }
    }
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_started: self.requests_started.load(Ordering::Relaxed),
            requests_restarted: self.requests_restarted.load(Ordering::Relaxed),
            requests_succeeded: self.requests_succeeded.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_destroyed: self.connections_destroyed.load(Ordering::Relaxed),
            connections_destroyed_timeout: self
                .connections_destroyed_timeout
                .load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn started(&self) {
        self.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn restarted(&self) {
        self.requests_restarted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn succeeded(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn timed_out(&self) {
        self.requests_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_destroyed(&self) {
        self.connections_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_destroyed_by_timeout(&self) {
        self.connections_destroyed.fetch_add(1, Ordering::Relaxed);
        self.connections_destroyed_timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }
}
