//! Pool metrics
//!
//! Counters are updated by the dispatcher task and read through snapshots,
//! so callers never contend with dispatch.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Invocation and task counters for one pool
#[derive(Debug)]
pub struct PoolMetrics {
    /// Invocations handed to the dispatcher
    pub invocations_started: AtomicU64,
    /// Invocations that resolved successfully
    pub invocations_completed: AtomicU64,
    /// Invocations rejected by a task failure, transport error or destroy
    pub invocations_failed: AtomicU64,
    /// Dispatch messages sent to units
    pub tasks_dispatched: AtomicU64,
    /// Result messages received
    pub tasks_completed: AtomicU64,
    /// Failure messages received
    pub tasks_failed: AtomicU64,
    per_unit: Vec<AtomicU64>,
}

impl PoolMetrics {
    pub fn new(units: usize) -> Self {
        Self {
            invocations_started: AtomicU64::new(0),
            invocations_completed: AtomicU64::new(0),
            invocations_failed: AtomicU64::new(0),
            tasks_dispatched: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            per_unit: (0..units).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn record_invocation_started(&self) {
        self.invocations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invocation_finished(&self, success: bool) {
        if success {
            self.invocations_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.invocations_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a dispatch message sent to `unit`
    pub fn record_dispatch(&self, unit: usize) {
        self.tasks_dispatched.fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = self.per_unit.get(unit) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            units: self.per_unit.len(),
            invocations_started: self.invocations_started.load(Ordering::Relaxed),
            invocations_completed: self.invocations_completed.load(Ordering::Relaxed),
            invocations_failed: self.invocations_failed.load(Ordering::Relaxed),
            tasks_dispatched: self.tasks_dispatched.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            dispatched_per_unit: self
                .per_unit
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

/// Snapshot of pool metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub units: usize,
    pub invocations_started: u64,
    pub invocations_completed: u64,
    pub invocations_failed: u64,
    pub tasks_dispatched: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    /// Dispatch messages sent to each unit, indexed by unit id
    pub dispatched_per_unit: Vec<u64>,
}

impl PoolStats {
    /// Number of units that received at least one dispatch message
    pub fn units_used(&self) -> usize {
        self.dispatched_per_unit.iter().filter(|&&n| n > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_counters() {
        let metrics = PoolMetrics::new(3);
        metrics.record_dispatch(0);
        metrics.record_dispatch(0);
        metrics.record_dispatch(2);
        // out-of-range ids only count toward the total
        metrics.record_dispatch(9);

        let stats = metrics.snapshot();
        assert_eq!(stats.units, 3);
        assert_eq!(stats.tasks_dispatched, 4);
        assert_eq!(stats.dispatched_per_unit, vec![2, 0, 1]);
        assert_eq!(stats.units_used(), 2);
    }

    #[test]
    fn test_invocation_counters() {
        let metrics = PoolMetrics::new(1);
        metrics.record_invocation_started();
        metrics.record_invocation_started();
        metrics.record_invocation_finished(true);
        metrics.record_invocation_finished(false);
        metrics.record_task_completed();
        metrics.record_task_failed();

        let stats = metrics.snapshot();
        assert_eq!(stats.invocations_started, 2);
        assert_eq!(stats.invocations_completed, 1);
        assert_eq!(stats.invocations_failed, 1);
        assert_eq!(stats.tasks_completed, 1);
        assert_eq!(stats.tasks_failed, 1);
    }
}
