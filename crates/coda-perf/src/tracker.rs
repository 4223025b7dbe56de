use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, warn};

use coda_events::payloads::{ComponentTimingPayload, LatencyTracePayload};
use coda_events::{EventSink, EventType};

struct TrackerState {
    /// Named points in time.
    markers: HashMap<String, Instant>,
    /// Recorded durations in seconds (audio lengths, pre-measured stage
    /// times). Kept separate from markers: a gauge is a length, not an
    /// instant.
    gauges: HashMap<String, f64>,
    /// component → operation → duration samples.
    timings: HashMap<String, HashMap<String, Vec<f64>>>,
    /// component → operation → start count.
    counts: HashMap<String, HashMap<String, u64>>,
    session_start: Instant,
}

impl TrackerState {
    fn new() -> Self {
        Self {
            markers: HashMap::new(),
            gauges: HashMap::new(),
            timings: HashMap::new(),
            counts: HashMap::new(),
            session_start: Instant::now(),
        }
    }

    fn duration(&self, start: &str, end: &str) -> f64 {
        match (self.markers.get(start), self.markers.get(end)) {
            (Some(a), Some(b)) if b >= a => b.duration_since(*a).as_secs_f64(),
            _ => 0.0,
        }
    }
}

/// Wall-clock latency tracker.
///
/// `mark` records instants, `mark_component` brackets named operations and
/// feeds `component_timing` events, `latency_trace` assembles the
/// end-to-end picture for the last turn. Missing markers always yield a
/// zero duration, never an error.
pub struct PerfTracker {
    state: Mutex<TrackerState>,
    sink: EventSink,
}

impl PerfTracker {
    pub fn new(sink: EventSink) -> Self {
        Self {
            state: Mutex::new(TrackerState::new()),
            sink,
        }
    }

    /// Record the current time against `name`.
    pub fn mark(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.markers.insert(name.to_string(), Instant::now());
    }

    /// Record a pre-measured duration in seconds (e.g. captured audio
    /// length reported by an adapter).
    pub fn set_gauge(&self, name: &str, seconds: f64) {
        let mut state = self.state.lock().unwrap();
        state.gauges.insert(name.to_string(), seconds);
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.state.lock().unwrap().gauges.get(name).copied()
    }

    /// Bracket a component operation. Marks `<component>.<operation>.start`
    /// or `.end`; the end marker computes the duration, appends it to the
    /// per-operation sample list, and emits a `component_timing` event.
    pub fn mark_component(&self, component: &str, operation: &str, start: bool) {
        let suffix = if start { "start" } else { "end" };
        let marker = format!("{component}.{operation}.{suffix}");

        let emitted = {
            let mut state = self.state.lock().unwrap();
            state.markers.insert(marker.clone(), Instant::now());

            if start {
                *state
                    .counts
                    .entry(component.to_string())
                    .or_default()
                    .entry(operation.to_string())
                    .or_insert(0) += 1;
                None
            } else {
                let start_marker = format!("{component}.{operation}.start");
                let duration = state.duration(&start_marker, &marker);
                if state.markers.contains_key(&start_marker) {
                    state
                        .timings
                        .entry(component.to_string())
                        .or_default()
                        .entry(operation.to_string())
                        .or_default()
                        .push(duration);
                    debug!(component, operation, duration, "component timing");
                    Some(duration)
                } else {
                    None
                }
            }
        };

        if let Some(duration_seconds) = emitted {
            let payload = ComponentTimingPayload {
                component: component.to_string(),
                operation: operation.to_string(),
                duration_seconds,
            };
            self.sink.submit(
                EventType::ComponentTiming,
                serde_json::to_value(payload).unwrap_or(Value::Null),
                false,
            );
        }
    }

    /// Seconds between two markers; 0.0 when either is missing.
    pub fn duration(&self, start: &str, end: &str) -> f64 {
        self.state.lock().unwrap().duration(start, end)
    }

    /// Duration of the most recent `<component>.<operation>` bracket.
    pub fn component_duration(&self, component: &str, operation: &str) -> f64 {
        self.duration(
            &format!("{component}.{operation}.start"),
            &format!("{component}.{operation}.end"),
        )
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.state.lock().unwrap().session_start.elapsed().as_secs_f64()
    }

    /// Per-operation avg/min/max/total/count for every tracked component.
    pub fn component_stats(&self) -> Value {
        let state = self.state.lock().unwrap();
        let mut components = serde_json::Map::new();

        for (component, ops) in &state.timings {
            let mut op_map = serde_json::Map::new();
            for (operation, samples) in ops {
                if samples.is_empty() {
                    continue;
                }
                let total: f64 = samples.iter().sum();
                let count = state
                    .counts
                    .get(component)
                    .and_then(|c| c.get(operation))
                    .copied()
                    .unwrap_or(samples.len() as u64);
                op_map.insert(
                    operation.clone(),
                    json!({
                        "avg_seconds": total / samples.len() as f64,
                        "min_seconds": samples.iter().cloned().fold(f64::INFINITY, f64::min),
                        "max_seconds": samples.iter().cloned().fold(0.0_f64, f64::max),
                        "total_seconds": total,
                        "count": count,
                    }),
                );
            }
            components.insert(component.clone(), Value::Object(op_map));
        }

        Value::Object(components)
    }

    /// Assemble the end-to-end trace for the last turn.
    ///
    /// Stage processing times prefer the component brackets (`stt.process`,
    /// `llm.generate_response`, `tts.synthesize`) and fall back to the bare
    /// `<stage>_start`/`<stage>_end` markers; audio lengths come from the
    /// `stt_audio_duration`/`tts_audio_duration` gauges.
    pub fn latency_trace(&self) -> LatencyTracePayload {
        let state = self.state.lock().unwrap();

        let stage = |component: &str, operation: &str, fallback: (&str, &str)| -> f64 {
            let bracketed = state.duration(
                &format!("{component}.{operation}.start"),
                &format!("{component}.{operation}.end"),
            );
            if bracketed > 0.0 {
                bracketed
            } else {
                state.duration(fallback.0, fallback.1)
            }
        };

        let stt_seconds = state
            .gauges
            .get("stt_process_duration")
            .copied()
            .unwrap_or_else(|| stage("stt", "process", ("stt_start", "stt_end")));
        let llm_seconds = stage("llm", "generate_response", ("llm_start", "llm_end"));
        let tts_seconds = state
            .gauges
            .get("tts_synthesis_duration")
            .copied()
            .unwrap_or_else(|| stage("tts", "synthesize", ("tts_start", "tts_end")));
        let tool_seconds = state.duration("tool_start", "tool_end");

        let mut total_processing_seconds = stt_seconds + llm_seconds + tts_seconds;
        if tool_seconds > 0.0 {
            total_processing_seconds += tool_seconds;
        }

        let stt_audio_duration = state.gauges.get("stt_audio_duration").copied().unwrap_or(0.0);
        let tts_audio_duration = state.gauges.get("tts_audio_duration").copied().unwrap_or(0.0);

        LatencyTracePayload {
            stt_seconds,
            llm_seconds,
            tts_seconds,
            tool_seconds: (tool_seconds > 0.0).then_some(tool_seconds),
            total_processing_seconds,
            stt_audio_duration,
            tts_audio_duration,
            total_interaction_seconds: total_processing_seconds
                + stt_audio_duration
                + tts_audio_duration,
        }
    }

    /// Broadcast the current latency trace.
    pub fn emit_latency_trace(&self) {
        let trace = self.latency_trace();
        self.sink.submit(
            EventType::LatencyTrace,
            serde_json::to_value(trace).unwrap_or(Value::Null),
            false,
        );
    }

    /// Broadcast the accumulated component statistics.
    pub fn emit_component_stats(&self) {
        self.sink.submit(
            EventType::ComponentStats,
            json!({ "components": self.component_stats() }),
            false,
        );
    }

    /// Clear markers, gauges, and statistics; restart the session clock.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        *state = TrackerState::new();
    }
}

static GLOBAL: OnceLock<Arc<PerfTracker>> = OnceLock::new();

/// Install the process-wide tracker. Call once at startup, before any
/// `global()` lookup. A second install is ignored with a warning.
pub fn install_global(sink: EventSink) -> Arc<PerfTracker> {
    let tracker = Arc::new(PerfTracker::new(sink));
    if GLOBAL.set(Arc::clone(&tracker)).is_err() {
        warn!("perf tracker already installed, keeping the existing instance");
        return Arc::clone(GLOBAL.get().unwrap());
    }
    tracker
}

/// Fetch the process-wide tracker. Before `install_global` this returns a
/// tracker wired to a disconnected sink, so markers still work in tests
/// and tools.
pub fn global() -> Arc<PerfTracker> {
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(PerfTracker::new(EventSink::disconnected()))))
}
