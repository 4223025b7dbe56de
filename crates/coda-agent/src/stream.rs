/// Events emitted during a streaming LLM response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text content from the model. May be empty.
    TextDelta { text: String },

    /// Stream completed successfully.
    Done { model: String, total_tokens: u64 },

    /// Error during streaming; terminal.
    Error { message: String },
}
