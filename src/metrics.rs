// SPDX-License-Identifier: Apache-2.0

//! Lightweight in-memory execution metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

#[derive(Default)]
struct ExecutionMetrics {
    total: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    timeouts: AtomicU64,
    duration_total_ms: AtomicU64,
    duration_max_ms: AtomicU64,
}

static EXECUTION_METRICS: OnceLock<ExecutionMetrics> = OnceLock::new();

fn metrics() -> &'static ExecutionMetrics {
    EXECUTION_METRICS.get_or_init(ExecutionMetrics::default)
}

pub fn record_query(duration_ms: f64, success: bool) {
    let duration_ms = duration_ms.max(0.0) as u64;
    let metrics = metrics();
    metrics.total.fetch_add(1, Ordering::Relaxed);
    if !success {
        metrics.failed.fetch_add(1, Ordering::Relaxed);
    }
    metrics
        .duration_total_ms
        .fetch_add(duration_ms, Ordering::Relaxed);

    let mut current = metrics.duration_max_ms.load(Ordering::Relaxed);
    while duration_ms > current {
        match metrics.duration_max_ms.compare_exchange(
            current,
            duration_ms,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(next) => current = next,
        }
    }
}

pub fn record_cancel() {
    metrics().cancelled.fetch_add(1, Ordering::Relaxed);
}

pub fn record_timeout() {
    metrics().timeouts.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time snapshot of the execution counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timeouts: u64,
    pub duration_total_ms: u64,
    pub duration_max_ms: u64,
}

pub fn snapshot() -> MetricsSnapshot {
    let metrics = metrics();
    MetricsSnapshot {
        total: metrics.total.load(Ordering::Relaxed),
        failed: metrics.failed.load(Ordering::Relaxed),
        cancelled: metrics.cancelled.load(Ordering::Relaxed),
        timeouts: metrics.timeouts.load(Ordering::Relaxed),
        duration_total_ms: metrics.duration_total_ms.load(Ordering::Relaxed),
        duration_max_ms: metrics.duration_max_ms.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let before = snapshot();
        record_query(10.0, true);
        record_query(5.0, false);
        let after = snapshot();

        assert!(after.total >= before.total + 2);
        assert!(after.failed >= before.failed + 1);
        assert!(after.duration_max_ms >= 10);
    }
}
