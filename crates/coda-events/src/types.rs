use serde::{Deserialize, Serialize};
use std::fmt;

/// Every event tag the core broadcasts. The serialized (snake_case) names
/// are part of the observer contract and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Lifecycle
    ConversationStart,
    ConversationEnd,
    ConversationTurn,
    SystemInfo,
    SystemError,

    // STT
    SttStart,
    SttInterim,
    SttResult,
    SttError,

    // LLM
    LlmStart,
    LlmToken,
    LlmResult,
    LlmError,

    // TTS
    TtsStart,
    TtsProgress,
    TtsResult,
    TtsError,
    TtsStop,
    TtsStatus,

    // Memory
    MemoryStore,
    MemoryRetrieve,
    MemoryUpdate,
    MemorySnapshot,
    MemorySummary,

    // Tools
    ToolCall,
    ToolResult,
    ToolError,

    // Telemetry
    SystemMetrics,
    ComponentTiming,
    ComponentStats,
    LatencyTrace,

    // Inbound observer messages re-emitted by the gateway
    ClientMessage,
}

impl EventType {
    /// The snake_case wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ConversationStart => "conversation_start",
            EventType::ConversationEnd => "conversation_end",
            EventType::ConversationTurn => "conversation_turn",
            EventType::SystemInfo => "system_info",
            EventType::SystemError => "system_error",
            EventType::SttStart => "stt_start",
            EventType::SttInterim => "stt_interim",
            EventType::SttResult => "stt_result",
            EventType::SttError => "stt_error",
            EventType::LlmStart => "llm_start",
            EventType::LlmToken => "llm_token",
            EventType::LlmResult => "llm_result",
            EventType::LlmError => "llm_error",
            EventType::TtsStart => "tts_start",
            EventType::TtsProgress => "tts_progress",
            EventType::TtsResult => "tts_result",
            EventType::TtsError => "tts_error",
            EventType::TtsStop => "tts_stop",
            EventType::TtsStatus => "tts_status",
            EventType::MemoryStore => "memory_store",
            EventType::MemoryRetrieve => "memory_retrieve",
            EventType::MemoryUpdate => "memory_update",
            EventType::MemorySnapshot => "memory_snapshot",
            EventType::MemorySummary => "memory_summary",
            EventType::ToolCall => "tool_call",
            EventType::ToolResult => "tool_result",
            EventType::ToolError => "tool_error",
            EventType::SystemMetrics => "system_metrics",
            EventType::ComponentTiming => "component_timing",
            EventType::ComponentStats => "component_stats",
            EventType::LatencyTrace => "latency_trace",
            EventType::ClientMessage => "client_message",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
