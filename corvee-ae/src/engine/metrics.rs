//! Engine counters
//!
//! Lock-free counters in the style of the shared-state intervention
//! counters: every degradation path the error taxonomy calls "observable"
//! increments one of these, and the monitoring surface reads a snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lock-free engine counters
#[derive(Debug, Default)]
pub struct Metrics {
    /// Assignments handed out
    pub assignments_total: AtomicU64,
    /// Requests refused because no eligible item existed
    pub no_work_total: AtomicU64,
    /// Reserve calls that lost a race (retried internally, never surfaced)
    pub reservation_races_total: AtomicU64,
    /// Strategy panics caught and degraded to Random
    pub strategy_faults_total: AtomicU64,
    /// Explicit fallbacks to Random (missing signals, fallback policy)
    pub random_fallbacks_total: AtomicU64,
    /// Signal updates applied by the writer task
    pub signals_applied_total: AtomicU64,
    /// Signal updates discarded for losing a generation race
    pub stale_signals_total: AtomicU64,
    /// Capacity invariant violations observed (must stay 0)
    pub invariant_violations_total: AtomicU64,
    /// Reservations reclaimed by the TTL sweeper
    pub reservations_reclaimed_total: AtomicU64,
    /// Commits rejected for lacking an outstanding reservation
    pub commits_rejected_total: AtomicU64,
    /// Recluster requests raised by completed cluster passes
    pub recluster_requests_total: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub assignments_total: u64,
    pub no_work_total: u64,
    pub reservation_races_total: u64,
    pub strategy_faults_total: u64,
    pub random_fallbacks_total: u64,
    pub signals_applied_total: u64,
    pub stale_signals_total: u64,
    pub invariant_violations_total: u64,
    pub reservations_reclaimed_total: u64,
    pub commits_rejected_total: u64,
    pub recluster_requests_total: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            assignments_total: self.assignments_total.load(Ordering::Relaxed),
            no_work_total: self.no_work_total.load(Ordering::Relaxed),
            reservation_races_total: self.reservation_races_total.load(Ordering::Relaxed),
            strategy_faults_total: self.strategy_faults_total.load(Ordering::Relaxed),
            random_fallbacks_total: self.random_fallbacks_total.load(Ordering::Relaxed),
            signals_applied_total: self.signals_applied_total.load(Ordering::Relaxed),
            stale_signals_total: self.stale_signals_total.load(Ordering::Relaxed),
            invariant_violations_total: self.invariant_violations_total.load(Ordering::Relaxed),
            reservations_reclaimed_total: self.reservations_reclaimed_total.load(Ordering::Relaxed),
            commits_rejected_total: self.commits_rejected_total.load(Ordering::Relaxed),
            recluster_requests_total: self.recluster_requests_total.load(Ordering::Relaxed),
        }
    }
}
