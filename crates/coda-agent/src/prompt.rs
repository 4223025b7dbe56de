//! System prompt assembly.
//!
//! Two distinct prompts drive the two-pass tool protocol: the detection
//! prompt teaches the tool-call JSON shape, the summarization prompt
//! forbids JSON entirely so pass 2 comes back as plain speech.

use rand::seq::SliceRandom;

pub const ASSISTANT_NAME: &str = "Coda";

/// Pass-1 system prompt: natural answers, or a bare tool-call object.
/// `tool_descriptions` is the router's rendered catalog.
pub fn tool_detection_prompt(tool_descriptions: &str) -> String {
    format!(
        "You are {ASSISTANT_NAME}, a helpful voice assistant running locally on the \
user's computer. Keep answers short and conversational; they will be read aloud.\n\
\n\
If, and only if, the user's request needs one of your tools, respond with ONLY a \
JSON object of this exact shape and nothing else:\n\
{{\"tool_call\": {{\"name\": \"<tool_name>\", \"args\": {{}}}}}}\n\
Otherwise answer naturally in plain text. Never mention tools or JSON in a natural \
answer.\n\
\n\
{tool_descriptions}"
    )
}

/// Pass-2 system prompt: turn a tool result into one spoken sentence.
pub fn summarization_prompt() -> String {
    format!(
        "You are {ASSISTANT_NAME}, a helpful voice assistant. The system message \
marked [TOOL RESULT] contains the factual answer to the user's question. Reply to \
the user with one short, natural spoken sentence based on that result. Do not \
output JSON, code, brackets, or any mention of tools."
    )
}

const WELCOME_MESSAGES: &[&str] = &[
    "Hello, I'm Coda. How can I help you today?",
    "Hi there! I'm Coda, your voice assistant. What can I do for you?",
    "Welcome! I'm Coda. What would you like to know?",
    "Greetings! I'm Coda, ready to help. What can I do for you today?",
];

pub fn welcome_message() -> String {
    WELCOME_MESSAGES
        .choose(&mut rand::thread_rng())
        .unwrap_or(&WELCOME_MESSAGES[0])
        .to_string()
}
