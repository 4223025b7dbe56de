//! Typed event emitters wrapping the bus and the perf tracker.
//!
//! Every pipeline milestone goes through here, so payload shapes and
//! perf markers stay consistent no matter which task reports them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use coda_core::types::{Session, Turn};
use coda_events::payloads::*;
use coda_events::{EventSink, EventType};
use coda_memory::types::{MemoryRecord, SearchHit};
use coda_perf::PerfTracker;

pub struct Telemetry {
    sink: EventSink,
    perf: Arc<PerfTracker>,
    session: Mutex<Option<Session>>,
    turn_counter: AtomicU64,
}

impl Telemetry {
    pub fn new(sink: EventSink, perf: Arc<PerfTracker>) -> Self {
        Self {
            sink,
            perf,
            session: Mutex::new(None),
            turn_counter: AtomicU64::new(0),
        }
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    pub fn perf(&self) -> &Arc<PerfTracker> {
        &self.perf
    }

    fn emit<T: serde::Serialize>(&self, event_type: EventType, payload: &T, high_priority: bool) {
        self.sink.submit(
            event_type,
            serde_json::to_value(payload).unwrap_or(Value::Null),
            high_priority,
        );
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    pub fn start_session(&self) -> String {
        let session = Session::new();
        let id = session.id.clone();
        *self.session.lock().unwrap() = Some(session);
        self.turn_counter.store(0, Ordering::SeqCst);
        self.sink.submit(
            EventType::ConversationStart,
            json!({ "session_id": id }),
            false,
        );
        info!(session_id = %id, "session started");
        id
    }

    pub fn end_session(&self) {
        let Some(session) = self.session.lock().unwrap().take() else {
            warn!("no active session to end");
            return;
        };
        self.sink.submit(
            EventType::ConversationEnd,
            json!({
                "session_id": session.id,
                "duration_seconds": session.duration_seconds(),
                "turns_count": self.turn_counter.load(Ordering::SeqCst),
            }),
            false,
        );
        info!(session_id = %session.id, "session ended");
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.lock().unwrap().as_ref().map(|s| s.id.clone())
    }

    pub fn conversation_turn(&self, turn: &Turn) {
        if self.session.lock().unwrap().is_none() {
            warn!("conversation turn emitted without an active session");
        }
        self.turn_counter.fetch_add(1, Ordering::SeqCst);
        self.emit(
            EventType::ConversationTurn,
            &ConversationTurnPayload {
                role: turn.role.to_string(),
                content: turn.content.clone(),
                turn_id: turn.turn_id,
            },
            false,
        );
    }

    // ------------------------------------------------------------------
    // STT
    // ------------------------------------------------------------------

    pub fn stt_start(&self, mode: &str) {
        self.perf.mark("stt_start");
        self.emit(EventType::SttStart, &SttStartPayload { mode: mode.into() }, false);
    }

    pub fn stt_interim(&self, text: &str, confidence: f64) {
        self.emit(
            EventType::SttInterim,
            &SttInterimPayload { text: text.into(), confidence },
            false,
        );
    }

    pub fn stt_result(
        &self,
        text: &str,
        confidence: f64,
        processing_seconds: f64,
        audio_seconds: f64,
        language: Option<&str>,
    ) {
        self.perf.mark("stt_end");
        self.perf.set_gauge("stt_process_duration", processing_seconds);
        self.perf.set_gauge("stt_audio_duration", audio_seconds);
        self.emit(
            EventType::SttResult,
            &SttResultPayload {
                text: text.into(),
                confidence,
                duration_seconds: processing_seconds,
                language: language.map(String::from),
            },
            false,
        );
    }

    pub fn stt_error(&self, message: &str) {
        self.emit(EventType::SttError, &json!({ "message": message }), false);
    }

    // ------------------------------------------------------------------
    // LLM
    // ------------------------------------------------------------------

    pub fn llm_start(&self, model: &str, prompt_tokens: u64, system_prompt: &str) {
        self.perf.mark("llm_start");
        self.emit(
            EventType::LlmStart,
            &LlmStartPayload {
                model: model.into(),
                prompt_tokens,
                system_prompt_preview: Some(preview(system_prompt, 100)),
            },
            false,
        );
    }

    pub fn llm_token(&self, token: &str, token_index: u64) {
        self.emit(
            EventType::LlmToken,
            &LlmTokenPayload { token: token.into(), token_index },
            false,
        );
    }

    pub fn llm_result(&self, text: &str, total_tokens: u64, has_tool_calls: bool) {
        self.perf.mark("llm_end");
        let duration_seconds = self.perf.duration("llm_start", "llm_end");
        self.emit(
            EventType::LlmResult,
            &LlmResultPayload {
                text: text.into(),
                total_tokens,
                duration_seconds,
                has_tool_calls,
            },
            false,
        );
    }

    pub fn llm_error(&self, message: &str) {
        self.perf.mark("llm_error");
        self.emit(EventType::LlmError, &json!({ "message": message }), false);
    }

    // ------------------------------------------------------------------
    // TTS
    // ------------------------------------------------------------------

    pub fn tts_start(&self, text: &str, voice: &str, provider: &str) {
        self.perf.mark("tts_start");
        self.emit(
            EventType::TtsStart,
            &TtsStartPayload {
                text: text.into(),
                voice: voice.into(),
                provider: provider.into(),
            },
            false,
        );
    }

    pub fn tts_progress(&self, percent_complete: f64) {
        self.emit(
            EventType::TtsProgress,
            &TtsProgressPayload {
                percent_complete: percent_complete.clamp(0.0, 100.0),
            },
            false,
        );
    }

    pub fn tts_result(&self, synthesis_seconds: f64, audio_seconds: f64, char_count: u64) {
        self.perf.mark("tts_end");
        self.perf.set_gauge("tts_synthesis_duration", synthesis_seconds);
        self.perf.set_gauge("tts_audio_duration", audio_seconds);
        self.emit(
            EventType::TtsResult,
            &TtsResultPayload {
                duration_seconds: synthesis_seconds,
                audio_duration_seconds: audio_seconds,
                char_count,
            },
            false,
        );
    }

    pub fn tts_error(&self, message: &str) {
        self.emit(EventType::TtsError, &json!({ "message": message }), false);
    }

    pub fn tts_status(&self, status: &str) {
        self.emit(EventType::TtsStatus, &json!({ "status": status }), false);
    }

    /// High-priority: late joiners must learn the utterance was cut.
    pub fn tts_stop(&self, reason: &str) {
        self.perf.mark("tts_stop");
        self.emit(EventType::TtsStop, &TtsStopPayload { reason: reason.into() }, true);
    }

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    /// High-priority: stored memories are part of the replay backlog.
    pub fn memory_store(&self, record: &MemoryRecord) {
        self.emit(
            EventType::MemoryStore,
            &MemoryStorePayload {
                content_preview: preview(&record.content, 100),
                memory_type: record.source_type.to_string(),
                importance: record.importance,
                memory_id: record.id.clone(),
            },
            true,
        );
    }

    pub fn memory_retrieve(&self, query: &str, hits: &[SearchHit]) {
        self.emit(
            EventType::MemoryRetrieve,
            &MemoryRetrievePayload {
                query: query.into(),
                results_count: hits.len() as u64,
                top_result_preview: hits.first().map(|h| preview(&h.content, 100)),
            },
            false,
        );
    }

    pub fn memory_update(&self, memory_id: &str, field: &str, old: Value, new: Value) {
        self.emit(
            EventType::MemoryUpdate,
            &json!({
                "memory_id": memory_id,
                "field": field,
                "old_value": old,
                "new_value": new,
            }),
            false,
        );
    }

    pub fn memory_summary(&self, summaries: &std::collections::BTreeMap<String, String>) {
        self.emit(
            EventType::MemorySummary,
            &json!({ "topic_count": summaries.len(), "summaries": summaries }),
            false,
        );
    }

    pub fn memory_snapshot(&self, snapshot_id: &str, path: &str) {
        self.emit(
            EventType::MemorySnapshot,
            &json!({ "snapshot_id": snapshot_id, "path": path }),
            false,
        );
    }

    // ------------------------------------------------------------------
    // Tools
    // ------------------------------------------------------------------

    pub fn tool_call(&self, tool_name: &str, parameters: &serde_json::Map<String, Value>) {
        self.perf.mark("tool_start");
        self.emit(
            EventType::ToolCall,
            &ToolCallPayload {
                tool_name: tool_name.into(),
                parameters: Value::Object(parameters.clone()),
            },
            false,
        );
    }

    pub fn tool_result(&self, tool_name: &str, result: &str) {
        self.perf.mark("tool_end");
        let duration_seconds = self.perf.duration("tool_start", "tool_end");
        self.emit(
            EventType::ToolResult,
            &ToolResultPayload {
                tool_name: tool_name.into(),
                result_preview: preview(result, 100),
                duration_seconds,
            },
            false,
        );
    }

    pub fn tool_error(&self, tool_name: &str, message: &str) {
        self.perf.mark("tool_error");
        self.emit(
            EventType::ToolError,
            &json!({ "tool_name": tool_name, "message": message }),
            false,
        );
    }

    // ------------------------------------------------------------------
    // System
    // ------------------------------------------------------------------

    /// High-priority: errors replay to late joiners.
    pub fn system_error(&self, level: &str, message: &str) {
        self.emit(
            EventType::SystemError,
            &json!({ "level": level, "message": message }),
            true,
        );
    }

    pub fn client_message(&self, msg_type: &str, data: Value) {
        debug!(msg_type, "re-emitting client message");
        self.emit(
            EventType::ClientMessage,
            &json!({ "type": msg_type, "data": data }),
            false,
        );
    }

    /// Publish the end-to-end trace for the turn that just finished.
    pub fn latency_trace(&self) {
        self.perf.emit_latency_trace();
    }

    pub fn component_stats(&self) {
        self.perf.emit_component_stats();
    }
}
