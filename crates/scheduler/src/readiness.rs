//! Bounded wait for the host application to boot.

use std::time::Duration;

use host_perceiver::{HostPort, Readiness};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootReadiness {
    Ready(Readiness),
    /// Terminal for this wait: the deadline passed (or the wait was cancelled).
    NotReady {
        probes: u32,
        last: Readiness,
        error: Option<String>,
    },
}

impl BootReadiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, BootReadiness::Ready(_))
    }
}

/// Probe every `poll` until the root instance and router are observable or `timeout`
/// elapses. Always probes at least once.
pub async fn wait_for_host(
    host: &dyn HostPort,
    poll: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> BootReadiness {
    let deadline = Instant::now() + timeout;
    let mut probes = 0u32;
    let mut last = Readiness::default();
    let mut error = None;
    loop {
        probes += 1;
        match host.probe_readiness().await {
            Ok(readiness) if readiness.is_ready() => {
                debug!(target: "scheduler", probes, "host ready");
                return BootReadiness::Ready(readiness);
            }
            Ok(readiness) => {
                last = readiness;
                error = None;
            }
            Err(err) => error = Some(err.to_string()),
        }
        if Instant::now() >= deadline {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = time::sleep(poll) => {}
        }
    }
    BootReadiness::NotReady {
        probes,
        last,
        error,
    }
}
