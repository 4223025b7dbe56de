// Verify the broadcast wire format matches what observers expect.
// These tests ensure the observer contract is never broken.

use coda_events::frame::{ClientFrame, EventFrame, ReplayFrame};
use coda_events::payloads::*;
use coda_events::EventType;

fn round_trip<T>(event_type: EventType, payload: &T)
where
    T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + std::fmt::Debug,
{
    let frame = EventFrame::new(
        9,
        1754058000.5,
        event_type,
        serde_json::to_value(payload).unwrap(),
    );
    let json = serde_json::to_string(&frame).unwrap();
    let back: EventFrame = serde_json::from_str(&json).unwrap();
    assert_eq!(back, frame);
    let decoded: T = serde_json::from_value(back.data).unwrap();
    assert_eq!(&decoded, payload);
}

#[test]
fn every_payload_kind_round_trips() {
    round_trip(
        EventType::ConversationTurn,
        &ConversationTurnPayload {
            role: "user".into(),
            content: "What time is it?".into(),
            turn_id: 4,
        },
    );
    round_trip(EventType::SttStart, &SttStartPayload { mode: "push_to_talk".into() });
    round_trip(
        EventType::SttInterim,
        &SttInterimPayload { text: "what ti".into(), confidence: 0.6 },
    );
    round_trip(
        EventType::SttResult,
        &SttResultPayload {
            text: "what time is it".into(),
            confidence: 0.93,
            duration_seconds: 0.42,
            language: Some("en".into()),
        },
    );
    round_trip(
        EventType::LlmStart,
        &LlmStartPayload {
            model: "llama3".into(),
            prompt_tokens: 212,
            system_prompt_preview: Some("You are Coda...".into()),
        },
    );
    round_trip(
        EventType::LlmToken,
        &LlmTokenPayload { token: "It's".into(), token_index: 0 },
    );
    round_trip(
        EventType::LlmResult,
        &LlmResultPayload {
            text: "It's 14:05.".into(),
            total_tokens: 6,
            duration_seconds: 0.8,
            has_tool_calls: true,
        },
    );
    round_trip(
        EventType::TtsStart,
        &TtsStartPayload {
            text: "It's 14:05.".into(),
            voice: "alexandra".into(),
            provider: "mock".into(),
        },
    );
    round_trip(EventType::TtsProgress, &TtsProgressPayload { percent_complete: 50.0 });
    round_trip(
        EventType::TtsResult,
        &TtsResultPayload {
            duration_seconds: 0.2,
            audio_duration_seconds: 1.1,
            char_count: 11,
        },
    );
    round_trip(EventType::TtsStop, &TtsStopPayload { reason: "user_interrupt".into() });
    round_trip(
        EventType::ToolCall,
        &ToolCallPayload {
            tool_name: "get_time".into(),
            parameters: serde_json::json!({}),
        },
    );
    round_trip(
        EventType::ToolResult,
        &ToolResultPayload {
            tool_name: "get_time".into(),
            result_preview: "It's 14:05.".into(),
            duration_seconds: 0.001,
        },
    );
    round_trip(
        EventType::MemoryStore,
        &MemoryStorePayload {
            content_preview: "My name is Ada".into(),
            memory_type: "fact".into(),
            importance: 0.9,
            memory_id: "mem-1".into(),
        },
    );
    round_trip(
        EventType::MemoryRetrieve,
        &MemoryRetrievePayload {
            query: "what is my name".into(),
            results_count: 1,
            top_result_preview: Some("My name is Ada".into()),
        },
    );
    round_trip(
        EventType::ComponentTiming,
        &ComponentTimingPayload {
            component: "llm".into(),
            operation: "generate_response".into(),
            duration_seconds: 0.8,
        },
    );
    round_trip(
        EventType::SystemMetrics,
        &SystemMetricsPayload {
            memory_mb: 812.5,
            cpu_percent: 13.0,
            gpu_vram_mb: None,
            uptime_seconds: 60.0,
        },
    );
    round_trip(
        EventType::LatencyTrace,
        &LatencyTracePayload {
            stt_seconds: 0.4,
            llm_seconds: 0.8,
            tts_seconds: 0.2,
            tool_seconds: Some(0.001),
            total_processing_seconds: 1.401,
            stt_audio_duration: 1.5,
            tts_audio_duration: 1.1,
            total_interaction_seconds: 4.001,
        },
    );
}

#[test]
fn replay_is_delivered_as_a_single_message() {
    let events: Vec<EventFrame> = (0..5)
        .map(|i| {
            EventFrame::new(
                i,
                i as f64,
                EventType::SystemInfo,
                serde_json::json!({"n": i}),
            )
        })
        .collect();
    let replay = ReplayFrame::new(events);
    let json = serde_json::to_string(&replay).unwrap();

    let back: ReplayFrame = serde_json::from_str(&json).unwrap();
    assert_eq!(back.frame_type, "replay");
    assert_eq!(back.events.len(), 5);
    // submission order preserved
    for (i, ev) in back.events.iter().enumerate() {
        assert_eq!(ev.seq, i as u64);
    }
}

#[test]
fn client_frame_parses_user_input() {
    let frame: ClientFrame =
        serde_json::from_str(r#"{"type":"user_input","data":{"text":"Say hi."}}"#).unwrap();
    assert_eq!(frame.msg_type, "user_input");
    assert_eq!(frame.data["text"], "Say hi.");
}
