use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use coda_core::config::TTS_JOIN_TIMEOUT_SECS;
use coda_core::error::CodaError;
use coda_core::types::{FunctionCall, Role};
use coda_events::ClientFrame;

use crate::pipeline::scrub;
use crate::prompt;
use crate::provider::{ChatMessage, ChatRequest, LlmError};
use crate::services::CoreServices;
use crate::stream::StreamEvent;
use crate::tools::basic::{current_date_reply, current_time_reply};
use crate::tools::{self, ToolCall};

const SPEAK_QUEUE_CAPACITY: usize = 16;
const RETRIEVAL_LIMIT: usize = 3;
pub const LLM_APOLOGY: &str = "I'm sorry, I ran into a problem generating a response.";
pub const TOOL_FALLBACK: &str = "I'm sorry, I ran into a problem using that tool.";

/// Clears the processing gate on every exit path, including panics in
/// the per-turn task.
struct ProcessingGate(Arc<AtomicBool>);

impl Drop for ProcessingGate {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the per-turn pipeline and the TTS speak-queue worker.
///
/// One user input is processed at a time: transcriptions arriving while
/// the gate is set are dropped. Replies flow through a bounded FIFO to
/// the worker, which drains remaining items on shutdown (bounded by the
/// join timeout).
pub struct Orchestrator {
    services: Arc<CoreServices>,
    summarization_prompt: String,
    processing: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    speak_tx: Mutex<Option<mpsc::Sender<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Wire everything up and enter IDLE.
    ///
    /// Order matters: tools register first, their descriptions go into
    /// the detection prompt, the prompt seeds short-term memory, and
    /// only then does the TTS worker start (with the welcome line
    /// already queued).
    pub fn start(services: Arc<CoreServices>) -> Result<Arc<Self>, CodaError> {
        tools::basic::register_basic(
            &services.tools,
            Arc::clone(&services.memory),
            services.layout.snapshots_dir(),
        )
        .map_err(|e| CodaError::Internal(e.to_string()))?;
        tools::memory_tools::register_memory_tools(&services.tools, Arc::clone(&services.memory))
            .map_err(|e| CodaError::Internal(e.to_string()))?;
        info!(tools = services.tools.tool_count(), "tool router ready");

        let system_prompt = prompt::tool_detection_prompt(&services.tools.prompt_descriptions());
        let summarization_prompt = prompt::summarization_prompt();
        services.memory.add_turn(Role::System, &system_prompt);

        services.telemetry.start_session();

        let (speak_tx, speak_rx) = mpsc::channel(SPEAK_QUEUE_CAPACITY);
        let orchestrator = Arc::new(Self {
            services,
            summarization_prompt,
            processing: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(true)),
            speak_tx: Mutex::new(Some(speak_tx)),
            worker: Mutex::new(None),
        });

        let worker = tokio::spawn(Self::tts_worker(Arc::clone(&orchestrator), speak_rx));
        *orchestrator.worker.lock().unwrap() = Some(worker);
        orchestrator.services.telemetry.tts_status("loaded");

        let welcome = prompt::welcome_message();
        orchestrator.try_queue_reply(welcome);
        info!("orchestrator idle, waiting for input");
        Ok(orchestrator)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Entry point for final transcriptions. Drops the input when a turn
    /// is already in flight (the processing gate) and spawns the per-turn
    /// task otherwise.
    pub fn handle_transcription(
        self: &Arc<Self>,
        text: &str,
        confidence: f64,
        processing_seconds: f64,
        audio_seconds: f64,
    ) {
        let services = &self.services;
        services
            .perf
            .mark_component("stt", "handle_transcription", true);

        let trimmed = text.trim();
        if trimmed.is_empty() {
            debug!("empty transcription, ignoring");
            services
                .perf
                .mark_component("stt", "handle_transcription", false);
            return;
        }
        if !self.running.load(Ordering::SeqCst) {
            services
                .perf
                .mark_component("stt", "handle_transcription", false);
            return;
        }
        if self.processing.swap(true, Ordering::SeqCst) {
            info!("already processing a request, dropping input");
            services
                .perf
                .mark_component("stt", "handle_transcription", false);
            return;
        }

        services.telemetry.stt_start(services.stt.mode());
        services.telemetry.stt_result(
            trimmed,
            confidence,
            processing_seconds,
            audio_seconds,
            None,
        );

        let this = Arc::clone(self);
        let input = trimmed.to_string();
        tokio::spawn(async move {
            this.process_turn(input).await;
        });

        services
            .perf
            .mark_component("stt", "handle_transcription", false);
    }

    /// Route an inbound observer frame: every frame is re-emitted as a
    /// `client_message` event; `user_input` and `tts_stop` additionally
    /// drive the pipeline.
    pub fn handle_client_frame(self: &Arc<Self>, frame: ClientFrame) {
        self.services
            .telemetry
            .client_message(&frame.msg_type, frame.data.clone());

        match frame.msg_type.as_str() {
            "user_input" => {
                let text = frame.data["text"].as_str().unwrap_or_default().to_string();
                let confidence = frame.data["confidence"].as_f64().unwrap_or(1.0);
                let audio = frame.data["audio_seconds"].as_f64().unwrap_or(0.0);
                self.handle_transcription(&text, confidence, 0.0, audio);
            }
            "stt_interim" => {
                let text = frame.data["text"].as_str().unwrap_or_default();
                let confidence = frame.data["confidence"].as_f64().unwrap_or(0.0);
                self.services.telemetry.stt_interim(text, confidence);
            }
            "stt_error" => {
                let message = frame.data["message"].as_str().unwrap_or("capture failed");
                self.services.telemetry.stt_error(message);
            }
            "tts_stop" => {
                let reason = frame.data["reason"].as_str().unwrap_or("user_interrupt");
                self.interrupt_speech(reason);
            }
            "memory_snapshot" => self.take_memory_snapshot(),
            "memory_summary" => {
                if let Some(summaries) = self.services.memory.topic_summaries() {
                    self.services.telemetry.memory_summary(&summaries);
                }
            }
            _ => {}
        }
    }

    /// Debug surface: capture the memory subsystem to the snapshot
    /// directory and announce it.
    pub fn take_memory_snapshot(&self) {
        let services = &self.services;
        match services
            .memory
            .save_snapshot(&services.layout.snapshots_dir())
        {
            Ok((id, path)) => {
                services
                    .telemetry
                    .memory_snapshot(&id, &path.display().to_string());
            }
            Err(e) => warn!(error = %e, "memory snapshot failed"),
        }
    }

    /// User interrupt: cancel the current utterance; the worker advances
    /// to the next queued item.
    pub fn interrupt_speech(&self, reason: &str) {
        info!(reason, "speech interrupt");
        self.services.tts.stop();
        self.services.telemetry.tts_stop(reason);
    }

    // ------------------------------------------------------------------
    // Per-turn pipeline
    // ------------------------------------------------------------------

    async fn process_turn(self: Arc<Self>, text: String) {
        let _gate = ProcessingGate(Arc::clone(&self.processing));
        let services = Arc::clone(&self.services);
        services
            .perf
            .mark_component("assistant", "process_input", true);

        // INGEST
        let turn = services.memory.add_turn(Role::User, &text);
        services.telemetry.conversation_turn(&turn);

        // CONTEXT
        services.perf.mark_component("memory", "get_context", true);
        let max_tokens = services.config.memory.max_context_tokens;
        let (context, hits) = services
            .memory
            .enhanced_context(&text, max_tokens, RETRIEVAL_LIMIT);
        services.perf.mark_component("memory", "get_context", false);
        if !hits.is_empty() {
            services.telemetry.memory_retrieve(&text, &hits);
            // Retrieval reinforces what it surfaced: a small importance
            // bump plus the access-count bookkeeping.
            for hit in &hits {
                match services.memory.reinforce(&hit.id, 0.02) {
                    Ok((old, new)) => services.telemetry.memory_update(
                        &hit.id,
                        "importance",
                        serde_json::json!(old),
                        serde_json::json!(new),
                    ),
                    Err(e) => debug!(error = %e, "reinforcement skipped"),
                }
            }
        }

        let messages: Vec<ChatMessage> = context
            .iter()
            .map(|m| ChatMessage::new(m.role, m.content.clone()))
            .collect();

        // LLM pass 1 — tool detection
        let (raw, raw_tokens) = match self.stream_pass(&messages).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "LLM pass 1 failed");
                services.telemetry.llm_error(&e.to_string());
                self.commit_and_queue(LLM_APOLOGY.to_string(), None).await;
                services
                    .perf
                    .mark_component("assistant", "process_input", false);
                return;
            }
        };

        let mut used_tool: Option<ToolCall> = None;
        let response = match services.tools.extract_tool_call(&raw) {
            Some(call) if services.tools.is_registered(&call.name) => {
                services.telemetry.llm_result(&raw, raw_tokens, true);
                let canonical = services
                    .tools
                    .canonical(&call.name)
                    .unwrap_or_else(|| call.name.clone());
                services.telemetry.tool_call(&canonical, &call.args);

                // Time and date answers must be computed at dispatch time,
                // never taken from model output or a cached return.
                let result = match canonical.as_str() {
                    "get_time" => current_time_reply(),
                    "get_date" => current_date_reply(),
                    _ => services.tools.execute(&call.name, &call.args),
                };

                used_tool = Some(ToolCall {
                    name: canonical.clone(),
                    args: call.args,
                });

                if result.starts_with("Error") {
                    services.telemetry.tool_error(&canonical, &result);
                    TOOL_FALLBACK.to_string()
                } else {
                    services.telemetry.tool_result(&canonical, &result);
                    // LLM pass 2 — summarize the tool result
                    match self.summarize_tool_result(&text, &result).await {
                        Ok(summary) => summary,
                        Err(e) => {
                            warn!(error = %e, "pass 2 failed, answering from the tool result");
                            services.telemetry.llm_error(&e.to_string());
                            result
                        }
                    }
                }
            }
            Some(call) => {
                // Extraction hit an unregistered name: the raw text is the
                // reply (the scrubber removes the stray JSON).
                warn!(tool = %call.name, "tool call references unknown tool");
                services.telemetry.llm_result(&raw, raw_tokens, false);
                services
                    .telemetry
                    .tool_error(&call.name, &format!("Error: Unknown tool '{}'", call.name));
                raw.clone()
            }
            None => {
                services.telemetry.llm_result(&raw, raw_tokens, false);
                raw.clone()
            }
        };

        // CLEAN
        let clean = scrub::clean_response(&response, used_tool.as_ref().map(|c| c.name.as_str()));
        debug!(reply = %clean, "turn reply ready");

        // COMMIT + QUEUE
        let function_call = used_tool.map(|c| FunctionCall {
            name: c.name,
            args: c.args,
        });
        self.commit_and_queue(clean, function_call).await;

        services
            .perf
            .mark_component("assistant", "process_input", false);
        services.telemetry.component_stats();
    }

    /// Commit an assistant reply to memory, consolidate, and queue it for
    /// speech.
    async fn commit_and_queue(&self, reply: String, function_call: Option<FunctionCall>) {
        let services = &self.services;
        let turn =
            services
                .memory
                .add_turn_with(Role::Assistant, &reply, function_call, None);
        services.telemetry.conversation_turn(&turn);

        match services.memory.consolidate() {
            Ok(stored) => {
                for record in &stored {
                    services.telemetry.memory_store(record);
                }
            }
            Err(e) => warn!(error = %e, "memory consolidation failed"),
        }

        self.queue_reply(reply).await;
    }

    async fn queue_reply(&self, reply: String) {
        let sender = self.speak_tx.lock().unwrap().clone();
        match sender {
            Some(tx) => {
                if tx.send(reply).await.is_err() {
                    warn!("speak queue closed, dropping reply");
                }
            }
            None => warn!("orchestrator shut down, dropping reply"),
        }
    }

    fn try_queue_reply(&self, reply: String) {
        if let Some(tx) = self.speak_tx.lock().unwrap().as_ref() {
            if tx.try_send(reply).is_err() {
                warn!("speak queue full, dropping reply");
            }
        }
    }

    /// Run one streaming LLM pass: emits `llm_start` and one `llm_token`
    /// per chunk, returns the accumulated text and token count. The
    /// caller emits `llm_result` once it knows whether a tool call is
    /// present.
    async fn stream_pass(&self, messages: &[ChatMessage]) -> Result<(String, u64), LlmError> {
        let services = &self.services;
        let config = &services.config.llm;

        let prompt_tokens: u64 = messages
            .iter()
            .map(|m| (m.content.len() / 4) as u64)
            .sum();
        let preview_src = messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        services
            .telemetry
            .llm_start(&config.model, prompt_tokens, preview_src);
        services
            .perf
            .mark_component("llm", "generate_response", true);

        let request = ChatRequest {
            model: config.model.clone(),
            messages: messages.to_vec(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: true,
        };
        let (tx, mut rx) = mpsc::channel(64);
        let llm = Arc::clone(&services.llm);
        let producer =
            tokio::spawn(async move { llm.chat_stream(&request, tx).await });

        let mut accumulated = String::new();
        let mut token_index: u64 = 0;
        let mut total_tokens: Option<u64> = None;
        let mut stream_error: Option<String> = None;

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta { text } => {
                    services.telemetry.llm_token(&text, token_index);
                    token_index += 1;
                    accumulated.push_str(&text);
                }
                StreamEvent::Done { total_tokens: t, .. } => total_tokens = Some(t),
                StreamEvent::Error { message } => stream_error = Some(message),
            }
        }

        services
            .perf
            .mark_component("llm", "generate_response", false);

        match producer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(join) => return Err(LlmError::Stream(join.to_string())),
        }
        if let Some(message) = stream_error {
            return Err(LlmError::Stream(message));
        }
        Ok((accumulated, total_tokens.unwrap_or(token_index)))
    }

    /// Pass 2: a fresh minimal context — the summarization prompt, the
    /// tool result as a system message, and the original user query.
    async fn summarize_tool_result(
        &self,
        original_query: &str,
        tool_result: &str,
    ) -> Result<String, LlmError> {
        let messages = vec![
            ChatMessage::new(Role::System, self.summarization_prompt.clone()),
            ChatMessage::new(Role::System, format!("[TOOL RESULT] {tool_result}")),
            ChatMessage::new(Role::User, original_query),
        ];
        let (summary, tokens) = self.stream_pass(&messages).await?;
        self.services.telemetry.llm_result(&summary, tokens, false);
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // TTS worker
    // ------------------------------------------------------------------

    async fn tts_worker(self: Arc<Self>, mut rx: mpsc::Receiver<String>) {
        info!("TTS worker started");
        // Shutdown closes the sender; the loop then drains what is left
        // and exits (the join timeout bounds the drain).
        while let Some(text) = rx.recv().await {
            self.speak_one(&text).await;
        }
        info!("TTS worker exited");
    }

    async fn speak_one(&self, text: &str) {
        let services = &self.services;
        services.perf.mark_component("tts", "speak", true);
        services
            .telemetry
            .tts_start(text, services.tts.voice(), services.tts.provider());

        let telemetry = &services.telemetry;
        let result = services
            .tts
            .speak(text, &|percent| telemetry.tts_progress(percent))
            .await;

        match result {
            Ok(utterance) => {
                services.telemetry.tts_result(
                    utterance.synthesis_seconds,
                    utterance.audio_seconds,
                    text.chars().count() as u64,
                );
            }
            Err(e) => {
                warn!(error = %e, "TTS failed, discarding utterance");
                services.telemetry.tts_error(&e.to_string());
            }
        }

        services.perf.mark_component("tts", "speak", false);
        services.telemetry.latency_trace();
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Orderly shutdown: stop STT, close the speak queue and join the
    /// worker (2 s bound), close TTS, flush memory metadata, export the
    /// conversation, end the session. Idempotent.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("orchestrator shutting down");
        let services = &self.services;

        services.stt.stop();

        // Closing the sender lets the worker drain the queue and exit.
        drop(self.speak_tx.lock().unwrap().take());
        let worker = self.worker.lock().unwrap().take();
        if let Some(mut handle) = worker {
            let deadline = Duration::from_secs(TTS_JOIN_TIMEOUT_SECS);
            if tokio::time::timeout(deadline, &mut handle).await.is_err() {
                warn!("TTS worker did not drain in time, aborting");
                handle.abort();
            }
        }

        services.tts.close().await;
        services.telemetry.tts_status("unloaded");

        if let Err(e) = services.memory.save_metadata() {
            error!(error = %e, "failed to flush memory metadata during shutdown");
        }

        let export_path = services.layout.export_file(chrono::Utc::now());
        match services.memory.export_conversation(&export_path) {
            Ok(path) => info!(path = %path.display(), "conversation exported"),
            Err(e) => warn!(error = %e, "conversation export failed"),
        }

        services.telemetry.end_session();
        info!("orchestrator shutdown complete");
    }
}
