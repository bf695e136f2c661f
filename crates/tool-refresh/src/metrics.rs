//! Per-strategy invocation counters.

use std::sync::atomic::{AtomicU64, Ordering};

use action_locator::LocatorStrategy;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;

#[derive(Default)]
struct Counters {
    performed: AtomicU64,
    refused: AtomicU64,
    failed: AtomicU64,
}

static BY_STRATEGY: Lazy<DashMap<LocatorStrategy, Counters>> = Lazy::new(DashMap::new);

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct StrategyCounts {
    pub performed: u64,
    pub refused: u64,
    pub failed: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct InvokerMetrics {
    pub tooltip: StrategyCounts,
    pub icon_shape: StrategyCounts,
    pub introspection: StrategyCounts,
}

impl InvokerMetrics {
    pub fn total_performed(&self) -> u64 {
        self.tooltip.performed + self.icon_shape.performed + self.introspection.performed
    }
}

pub fn record_performed(strategy: LocatorStrategy) {
    BY_STRATEGY
        .entry(strategy)
        .or_default()
        .performed
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_refused(strategy: LocatorStrategy) {
    BY_STRATEGY
        .entry(strategy)
        .or_default()
        .refused
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_failed(strategy: LocatorStrategy) {
    BY_STRATEGY
        .entry(strategy)
        .or_default()
        .failed
        .fetch_add(1, Ordering::Relaxed);
}

pub fn counts(strategy: LocatorStrategy) -> StrategyCounts {
    BY_STRATEGY
        .get(&strategy)
        .map(|c| StrategyCounts {
            performed: c.performed.load(Ordering::Relaxed),
            refused: c.refused.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        })
        .unwrap_or_default()
}

pub fn snapshot() -> InvokerMetrics {
    InvokerMetrics {
        tooltip: counts(LocatorStrategy::Tooltip),
        icon_shape: counts(LocatorStrategy::IconShape),
        introspection: counts(LocatorStrategy::Introspection),
    }
}
