use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use sysinfo::{get_current_pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use coda_events::payloads::SystemMetricsPayload;
use coda_events::{EventSink, EventType};

use crate::tracker::PerfTracker;

/// Background resource sampler.
///
/// Samples process CPU% and resident memory via `sysinfo` every
/// `interval` and submits a `system_metrics` event per sample. GPU VRAM
/// is reported only when a platform backend exposes it (none does through
/// sysinfo, so the field stays absent rather than fabricated).
pub struct ResourceMonitor {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ResourceMonitor {
    pub fn spawn(tracker: Arc<PerfTracker>, sink: EventSink, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut sys = System::new();
            let pid = match get_current_pid() {
                Ok(pid) => pid,
                Err(e) => {
                    warn!(error = %e, "cannot resolve own pid, resource monitoring disabled");
                    return;
                }
            };

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_secs = interval.as_secs_f64(), "resource monitoring started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = token.cancelled() => break,
                }

                sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                let Some(process) = sys.process(pid) else {
                    continue;
                };

                let payload = SystemMetricsPayload {
                    memory_mb: process.memory() as f64 / (1024.0 * 1024.0),
                    cpu_percent: process.cpu_usage() as f64,
                    gpu_vram_mb: None,
                    uptime_seconds: tracker.uptime_seconds(),
                };
                debug!(
                    memory_mb = payload.memory_mb,
                    cpu_percent = payload.cpu_percent,
                    "system metrics sample"
                );
                sink.submit(
                    EventType::SystemMetrics,
                    serde_json::to_value(payload).unwrap_or(Value::Null),
                    false,
                );
            }

            info!("resource monitoring stopped");
        });

        Self { handle, cancel }
    }

    /// Stop sampling and wait for the task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Static host description, broadcast once at startup as a high-priority
/// `system_info` event so late joiners see it too.
pub fn system_info() -> Value {
    let mut sys = System::new();
    sys.refresh_memory();
    json!({
        "platform": System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
        "os_version": System::os_version(),
        "arch": std::env::consts::ARCH,
        "cpu_count": std::thread::available_parallelism().ok().map(|n| n.get()),
        "total_memory_mb": sys.total_memory() as f64 / (1024.0 * 1024.0),
    })
}

pub fn emit_system_info(sink: &EventSink) {
    sink.submit(EventType::SystemInfo, system_info(), true);
}
