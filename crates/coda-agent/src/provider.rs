use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use coda_core::types::Role;

use crate::stream::StreamEvent;
use crate::tools::first_json_object;

/// A single message handed to the LLM.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Request to an LLM adapter.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
}

/// Completed (non-streaming) chat result.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub model: String,
    /// Prompt plus generated tokens as reported by the backend.
    pub total_tokens: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("adapter unavailable: {0}")]
    Unavailable(String),

    #[error("stream error: {0}")]
    Stream(String),
}

/// Capability interface for chat completion. The core never implements
/// inference; it consumes this contract.
///
/// Streaming is single-pass: chunks may be empty, and the concatenation
/// of all `TextDelta` chunks equals the non-streaming result for the same
/// inputs and seed.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Adapter name for logging and error events.
    fn name(&self) -> &str;

    /// Model used when the caller does not specify one.
    fn default_model(&self) -> &str;

    /// Send a chat request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatOutcome, LlmError>;

    /// Stream response chunks through a channel.
    /// Default: falls back to non-streaming `chat`, then emits one
    /// `TextDelta` and `Done`.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let outcome = self.chat(req).await?;
        let _ = tx
            .send(StreamEvent::TextDelta {
                text: outcome.content,
            })
            .await;
        let _ = tx
            .send(StreamEvent::Done {
                model: outcome.model,
                total_tokens: outcome.total_tokens,
            })
            .await;
        Ok(())
    }

    /// Ask the model for a JSON object conforming to `schema`.
    ///
    /// Parse failures never raise: the result is a marker object with an
    /// `error` field instead, so callers can branch on absent keys.
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
        temperature: f64,
    ) -> Value {
        let instruction = format!(
            "{prompt}\n\nRespond with ONLY a JSON object matching this schema, no prose:\n{}",
            serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string())
        );
        let req = ChatRequest {
            model: self.default_model().to_string(),
            messages: vec![ChatMessage::new(Role::User, instruction)],
            temperature,
            max_tokens: 512,
            stream: false,
        };

        let text = match self.chat(&req).await {
            Ok(outcome) => outcome.content,
            Err(e) => {
                return serde_json::json!({ "error": format!("llm request failed: {e}") })
            }
        };

        match first_json_object(&text).and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
        {
            Some(value) if value.is_object() => value,
            _ => serde_json::json!({
                "error": "model output did not contain a parseable JSON object",
                "raw": text,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed-response client for exercising the default trait methods.
    struct CannedClient {
        reply: String,
    }

    #[async_trait]
    impl LlmClient for CannedClient {
        fn name(&self) -> &str {
            "canned"
        }
        fn default_model(&self) -> &str {
            "test-model"
        }
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatOutcome, LlmError> {
            Ok(ChatOutcome {
                content: self.reply.clone(),
                model: "test-model".into(),
                total_tokens: 7,
            })
        }
    }

    #[tokio::test]
    async fn default_stream_equals_chat() {
        let client = CannedClient { reply: "Hello there".into() };
        let (tx, mut rx) = mpsc::channel(8);
        client
            .chat_stream(
                &ChatRequest {
                    model: "test-model".into(),
                    messages: vec![],
                    temperature: 0.7,
                    max_tokens: 64,
                    stream: true,
                },
                tx,
            )
            .await
            .unwrap();

        let mut collected = String::new();
        while let Some(ev) = rx.recv().await {
            match ev {
                StreamEvent::TextDelta { text } => collected.push_str(&text),
                StreamEvent::Done { total_tokens, .. } => {
                    assert_eq!(total_tokens, 7);
                }
                StreamEvent::Error { message } => panic!("unexpected error: {message}"),
            }
        }
        assert_eq!(collected, "Hello there");
    }

    #[tokio::test]
    async fn structured_output_parses_embedded_json() {
        let client = CannedClient {
            reply: "Sure! {\"mood\": \"happy\", \"score\": 3} hope that helps".into(),
        };
        let value = client
            .generate_structured("How do you feel?", &serde_json::json!({"type": "object"}), 0.2)
            .await;
        assert_eq!(value["mood"], "happy");
        assert!(value.get("error").is_none());
    }

    #[tokio::test]
    async fn structured_output_failure_returns_marker_object() {
        let client = CannedClient { reply: "no json here at all".into() };
        let value = client
            .generate_structured("?", &serde_json::json!({"type": "object"}), 0.2)
            .await;
        assert!(value["error"].is_string());
    }
}
