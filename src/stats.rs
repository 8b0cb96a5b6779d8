//! Observability counters and events emitted by the control plane.
//!
//! Two kinds of bookkeeping live in the system: the counters here, which are
//! monotonic for the life of the process, and the per-run
//! [`crate::scheduler::RuntimeStats`], which the controller resets on every
//! stop.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Counter recorded when a role change forces a scheduler restart.
pub const RCA_SCHEDULER_RESTART: &str = "rca_scheduler_restart";

/// Counter recorded when the operator disables RCA while it is running.
pub const RCA_STOPPED_BY_OPERATOR: &str = "rca_stopped_by_operator";

/// Counter recorded when a restart is performed on behalf of the operator.
pub const RCA_RESTARTED_BY_OPERATOR: &str = "rca_restarted_by_operator";

/// Counter recorded when a graph node's operate cycle raises an error.
pub const EXCEPTION_IN_OPERATE: &str = "exception_in_operate";

/// Duration series for graph-node operate calls.
pub const GRAPH_NODE_OPERATE_DURATION: &str = "graph_node_operate_duration";

/// Counter recorded when the network pool rejects a task (queue full).
pub const NET_TASK_REJECTED: &str = "net_task_rejected";

/// Counter recorded when an inbound flow unit is dropped (buffer full).
pub const FLOW_UNIT_DROPPED: &str = "flow_unit_dropped";

/// Aggregated duration series: invocation count and total elapsed time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurationRecord {
    pub count: u64,
    pub total: Duration,
}

/// Sink for named counters and duration series.
///
/// One instance is shared by every component that emits observability events.
/// Counters survive scheduler stop/start; they are only cleared by an
/// explicit [`StatsCollector::clear`] (used by tests).
#[derive(Default)]
pub struct StatsCollector {
    counters: Mutex<HashMap<String, u64>>,
    durations: Mutex<HashMap<String, DurationRecord>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the named counter by one.
    pub fn increment(&self, name: &str) {
        self.increment_by(name, 1);
    }

    pub fn increment_by(&self, name: &str, delta: u64) {
        let mut counters = self.counters.lock();
        *counters.entry(name.to_string()).or_insert(0) += delta;
    }

    /// Current value of the named counter (0 if never incremented).
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Record one observation in the named duration series.
    pub fn record_duration(&self, name: &str, elapsed: Duration) {
        let mut durations = self.durations.lock();
        let record = durations.entry(name.to_string()).or_default();
        record.count += 1;
        record.total += elapsed;
    }

    pub fn duration_record(&self, name: &str) -> DurationRecord {
        self.durations.lock().get(name).copied().unwrap_or_default()
    }

    /// Drop all recorded values.
    pub fn clear(&self) {
        self.counters.lock().clear();
        self.durations.lock().clear();
    }
}
