//! Process-wide counters gathered from every layer.

use cdp_adapter::metrics::{self as adapter_metrics, AdapterMetricsSnapshot};
use host_perceiver::metrics::{self as snapshot_metrics, SnapshotMetrics};
use refresh_scheduler::metrics::{self as scheduler_metrics, SchedulerMetricsSnapshot};
use serde::Serialize;
use tool_refresh::metrics::{self as invoker_metrics, InvokerMetrics};

#[derive(Clone, Debug, Serialize)]
pub struct MetricsSummary {
    pub scheduler: SchedulerMetricsSnapshot,
    pub invoker: InvokerMetrics,
    pub snapshots: SnapshotMetrics,
    pub adapter: AdapterMetricsSnapshot,
}

pub fn summary() -> MetricsSummary {
    MetricsSummary {
        scheduler: scheduler_metrics::snapshot(),
        invoker: invoker_metrics::snapshot(),
        snapshots: snapshot_metrics::snapshot(),
        adapter: adapter_metrics::snapshot(),
    }
}

impl MetricsSummary {
    pub fn render_human(&self) -> String {
        let s = &self.scheduler;
        let i = &self.invoker;
        let mut out = String::new();
        out.push_str(&format!(
            "scheduler: {} starts, {} stops, {} ticks ({} off target, {} failed)\n",
            s.starts, s.stops, s.ticks, s.off_target, s.tick_failures
        ));
        out.push_str(&format!(
            "boot: {} attempts, {} not ready; {} host signals\n",
            s.boots, s.boots_not_ready, s.signals
        ));
        for (name, counts) in [
            ("tooltip", i.tooltip),
            ("icon-shape", i.icon_shape),
            ("introspection", i.introspection),
        ] {
            out.push_str(&format!(
                "refresh via {name}: {} performed, {} refused, {} failed\n",
                counts.performed, counts.refused, counts.failed
            ));
        }
        out.push_str(&format!(
            "snapshots: {} taken, {} failed, {:.1} ms avg\n",
            self.snapshots.total, self.snapshots.failures, self.snapshots.avg_ms
        ));
        out.push_str(&format!(
            "cdp: {} commands ({} failed), {} events, {} binding calls, {} reconnects",
            self.adapter.commands,
            self.adapter.command_failures,
            self.adapter.events,
            self.adapter.bindings,
            self.adapter.reconnects
        ));
        out
    }
}
