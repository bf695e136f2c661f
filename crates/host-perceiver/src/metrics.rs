//! Snapshot counters for the host perceiver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

static SNAPSHOT_TOTAL: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_FAILURES: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_LAT_NS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SnapshotMetrics {
    pub total: u64,
    pub failures: u64,
    pub avg_ms: f64,
}

pub fn record_snapshot(duration: Duration) {
    SNAPSHOT_TOTAL.fetch_add(1, Ordering::Relaxed);
    let nanos = duration.as_nanos().min(u64::MAX as u128) as u64;
    SNAPSHOT_LAT_NS.fetch_add(nanos, Ordering::Relaxed);
}

pub fn record_snapshot_failure() {
    SNAPSHOT_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> SnapshotMetrics {
    let total = SNAPSHOT_TOTAL.load(Ordering::Relaxed);
    let lat = SNAPSHOT_LAT_NS.load(Ordering::Relaxed);
    SnapshotMetrics {
        total,
        failures: SNAPSHOT_FAILURES.load(Ordering::Relaxed),
        avg_ms: if total == 0 {
            0.0
        } else {
            lat as f64 / total as f64 / 1_000_000.0
        },
    }
}
