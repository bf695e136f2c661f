use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    starts: AtomicU64,
    stops: AtomicU64,
    ticks: AtomicU64,
    performed: AtomicU64,
    off_target: AtomicU64,
    tick_failures: AtomicU64,
    boots: AtomicU64,
    boots_not_ready: AtomicU64,
    signals: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_start() {
    increment(&COUNTERS.starts);
}

pub fn record_stop() {
    increment(&COUNTERS.stops);
}

pub fn record_tick() {
    increment(&COUNTERS.ticks);
}

pub fn record_performed() {
    increment(&COUNTERS.performed);
}

pub fn record_off_target() {
    increment(&COUNTERS.off_target);
}

pub fn record_tick_failure() {
    increment(&COUNTERS.tick_failures);
}

pub fn record_boot(ready: bool) {
    increment(&COUNTERS.boots);
    if !ready {
        increment(&COUNTERS.boots_not_ready);
    }
}

pub fn record_signal() {
    increment(&COUNTERS.signals);
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SchedulerMetricsSnapshot {
    pub starts: u64,
    pub stops: u64,
    pub ticks: u64,
    pub performed: u64,
    pub off_target: u64,
    pub tick_failures: u64,
    pub boots: u64,
    pub boots_not_ready: u64,
    pub signals: u64,
}

pub fn snapshot() -> SchedulerMetricsSnapshot {
    SchedulerMetricsSnapshot {
        starts: COUNTERS.starts.load(Ordering::Relaxed),
        stops: COUNTERS.stops.load(Ordering::Relaxed),
        ticks: COUNTERS.ticks.load(Ordering::Relaxed),
        performed: COUNTERS.performed.load(Ordering::Relaxed),
        off_target: COUNTERS.off_target.load(Ordering::Relaxed),
        tick_failures: COUNTERS.tick_failures.load(Ordering::Relaxed),
        boots: COUNTERS.boots.load(Ordering::Relaxed),
        boots_not_ready: COUNTERS.boots_not_ready.load(Ordering::Relaxed),
        signals: COUNTERS.signals.load(Ordering::Relaxed),
    }
}
