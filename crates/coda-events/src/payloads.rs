//! Typed payload bodies for the wire contract.
//!
//! Field names here are observable by every connected client and are
//! frozen. Emitters build these structs and serialize them into the
//! envelope's `data` field; anything not covered below travels as a plain
//! `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurnPayload {
    pub role: String,
    pub content: String,
    pub turn_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SttStartPayload {
    /// "push_to_talk", "continuous", or "file".
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SttInterimPayload {
    pub text: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SttResultPayload {
    pub text: String,
    pub confidence: f64,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmStartPayload {
    pub model: String,
    pub prompt_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt_preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmTokenPayload {
    pub token: String,
    pub token_index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResultPayload {
    pub text: String,
    pub total_tokens: u64,
    pub duration_seconds: f64,
    pub has_tool_calls: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsStartPayload {
    pub text: String,
    pub voice: String,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsProgressPayload {
    /// 0.0 to 100.0.
    pub percent_complete: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsResultPayload {
    /// Synthesis time, not playback time.
    pub duration_seconds: f64,
    pub audio_duration_seconds: f64,
    pub char_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsStopPayload {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub tool_name: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    pub tool_name: String,
    pub result_preview: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStorePayload {
    pub content_preview: String,
    pub memory_type: String,
    pub importance: f64,
    pub memory_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRetrievePayload {
    pub query: String,
    pub results_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_result_preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentTimingPayload {
    pub component: String,
    pub operation: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetricsPayload {
    pub memory_mb: f64,
    pub cpu_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_vram_mb: Option<f64>,
    pub uptime_seconds: f64,
}

/// End-to-end pipeline trace. Processing fields measure computation only;
/// `*_audio_duration` measure captured / generated audio length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyTracePayload {
    pub stt_seconds: f64,
    pub llm_seconds: f64,
    pub tts_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_seconds: Option<f64>,
    pub total_processing_seconds: f64,
    pub stt_audio_duration: f64,
    pub tts_audio_duration: f64,
    pub total_interaction_seconds: f64,
}

/// Truncate long free text for *_preview fields.
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_at_char_boundary() {
        assert_eq!(preview("short", 100), "short");
        let long = "x".repeat(150);
        let p = preview(&long, 100);
        assert_eq!(p.len(), 103);
        assert!(p.ends_with("..."));
    }

    #[test]
    fn optional_fields_absent_when_none() {
        let payload = SttResultPayload {
            text: "hello".into(),
            confidence: 0.9,
            duration_seconds: 0.4,
            language: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("language"));
    }
}
