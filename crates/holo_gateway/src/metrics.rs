//! In-process counters for UPDATE execution.
//!
//! Lock-free so the shard-visit hot path can bump them without contention.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::GatewayErrorCode;

/// Counters shared by every statement a gateway executes.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Top-level UPDATE statements executed.
    updates: AtomicU64,
    /// Statements that touched one key.
    single_key_updates: AtomicU64,
    /// Statements that walked a scope.
    range_updates: AtomicU64,
    /// Mutation RPCs issued to shards.
    shard_visits: AtomicU64,
    /// Retries granted after a route change.
    route_change_retries: AtomicU64,
    /// Statements that ran out of backoff budget.
    backoff_timeouts: AtomicU64,
    /// Range walks that reached the wide fan-out threshold.
    wide_fanouts: AtomicU64,
    /// Rows reported as mutated across all successful statements.
    affected_rows: AtomicU64,
    /// Statements that failed, any class.
    failures: AtomicU64,
    /// Failures whose class was a shard status code.
    mutation_failures: AtomicU64,
    /// Failures raised before any shard was contacted.
    validation_failures: AtomicU64,
}

/// Immutable snapshot view of [`GatewayMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayMetricsSnapshot {
    pub updates: u64,
    pub single_key_updates: u64,
    pub range_updates: u64,
    pub shard_visits: u64,
    pub route_change_retries: u64,
    pub backoff_timeouts: u64,
    pub wide_fanouts: u64,
    pub affected_rows: u64,
    pub failures: u64,
    pub mutation_failures: u64,
    pub validation_failures: u64,
}

impl GatewayMetrics {
    pub fn record_update(&self, single_key: bool) {
        self.updates.fetch_add(1, Ordering::Relaxed);
        if single_key {
            self.single_key_updates.fetch_add(1, Ordering::Relaxed);
        } else {
            self.range_updates.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_shard_visit(&self) {
        self.shard_visits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_route_change_retry(&self) {
        self.route_change_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wide_fanout(&self) {
        self.wide_fanouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, affected_rows: u64) {
        self.affected_rows.fetch_add(affected_rows, Ordering::Relaxed);
    }

    /// Counts a failed statement and buckets it by class.
    pub fn record_failure(&self, code: GatewayErrorCode) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let counter = match code {
            GatewayErrorCode::Timeout => &self.backoff_timeouts,
            GatewayErrorCode::Mutation => &self.mutation_failures,
            GatewayErrorCode::Validation
            | GatewayErrorCode::TableNotFound
            | GatewayErrorCode::Translation => &self.validation_failures,
            GatewayErrorCode::RouteChanged | GatewayErrorCode::Transport => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            updates: self.updates.load(Ordering::Relaxed),
            single_key_updates: self.single_key_updates.load(Ordering::Relaxed),
            range_updates: self.range_updates.load(Ordering::Relaxed),
            shard_visits: self.shard_visits.load(Ordering::Relaxed),
            route_change_retries: self.route_change_retries.load(Ordering::Relaxed),
            backoff_timeouts: self.backoff_timeouts.load(Ordering::Relaxed),
            wide_fanouts: self.wide_fanouts.load(Ordering::Relaxed),
            affected_rows: self.affected_rows.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            mutation_failures: self.mutation_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_bucketed_by_class() {
        let metrics = GatewayMetrics::default();
        metrics.record_failure(GatewayErrorCode::Timeout);
        metrics.record_failure(GatewayErrorCode::TableNotFound);
        metrics.record_failure(GatewayErrorCode::Transport);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failures, 3);
        assert_eq!(snapshot.backoff_timeouts, 1);
        assert_eq!(snapshot.validation_failures, 1);
        assert_eq!(snapshot.mutation_failures, 0);
    }

    #[test]
    fn snapshot_serializes_as_flat_json() {
        let metrics = GatewayMetrics::default();
        metrics.record_update(false);
        metrics.record_shard_visit();
        metrics.record_success(4);
        let json = serde_json::to_value(metrics.snapshot()).expect("json");
        assert_eq!(json["range_updates"], 1);
        assert_eq!(json["shard_visits"], 1);
        assert_eq!(json["affected_rows"], 4);
    }
}
