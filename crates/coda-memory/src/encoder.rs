use serde_json::Map;
use tracing::debug;

use coda_core::types::{Role, Turn};

use crate::types::MemorySource;

/// A candidate record produced by the encoder, before the store assigns
/// an id.
#[derive(Debug, Clone)]
pub struct CandidateMemory {
    pub content: String,
    pub source_type: MemorySource,
    pub importance: f64,
    pub topics: Vec<String>,
    pub metadata: Map<String, serde_json::Value>,
}

/// Turns conversation windows into candidate long-term records using
/// lightweight lexical heuristics. No model calls here: the encoder has
/// to be cheap enough to run after every turn.
pub struct MemoryEncoder {
    /// Turns per window.
    window: usize,
    /// Turns shared between adjacent windows.
    overlap: usize,
    /// Candidates below this importance are discarded.
    min_importance: f64,
}

impl Default for MemoryEncoder {
    fn default() -> Self {
        Self {
            window: 4,
            overlap: 1,
            min_importance: 0.45,
        }
    }
}

impl MemoryEncoder {
    pub fn new(window: usize, overlap: usize, min_importance: f64) -> Self {
        Self {
            window: window.max(1),
            overlap: overlap.min(window.saturating_sub(1)),
            min_importance,
        }
    }

    /// Encode a run of conversation turns into candidate records.
    /// System turns are never encoded.
    pub fn encode_turns(&self, turns: &[Turn]) -> Vec<CandidateMemory> {
        let speech: Vec<&Turn> = turns
            .iter()
            .filter(|t| matches!(t.role, Role::User | Role::Assistant))
            .collect();
        if speech.is_empty() {
            return Vec::new();
        }

        let step = self.window - self.overlap;
        let mut out = Vec::new();
        let mut start = 0;
        while start < speech.len() {
            let end = (start + self.window).min(speech.len());
            let window = &speech[start..end];

            let content = window
                .iter()
                .map(|t| format!("{}: {}", t.role, t.content))
                .collect::<Vec<_>>()
                .join("\n");
            let user_text = window
                .iter()
                .filter(|t| t.role == Role::User)
                .map(|t| t.content.as_str())
                .collect::<Vec<_>>()
                .join(" ");

            let (importance, topics, source_type) = score_text(&user_text);
            if importance >= self.min_importance {
                let mut metadata = Map::new();
                metadata.insert(
                    "turn_range".to_string(),
                    serde_json::json!([window[0].turn_id, window[window.len() - 1].turn_id]),
                );
                out.push(CandidateMemory {
                    content,
                    source_type,
                    importance,
                    topics,
                    metadata,
                });
            }

            if end == speech.len() {
                break;
            }
            start += step;
        }

        debug!(candidates = out.len(), "encoded conversation window");
        out
    }

    /// Encode an explicitly asserted fact.
    pub fn encode_fact(&self, fact: &str, importance: Option<f64>) -> CandidateMemory {
        let (scored, mut topics, _) = score_text(fact);
        if topics.is_empty() {
            topics = extract_topics(fact);
        }
        CandidateMemory {
            content: fact.to_string(),
            source_type: MemorySource::Fact,
            importance: importance.unwrap_or_else(|| scored.max(0.7)).clamp(0.0, 1.0),
            topics,
            metadata: Map::new(),
        }
    }

    /// Encode an explicitly asserted preference.
    pub fn encode_preference(&self, preference: &str) -> CandidateMemory {
        let mut topics = extract_topics(preference);
        if !topics.iter().any(|t| t == "preferences") {
            topics.push("preferences".to_string());
        }
        CandidateMemory {
            content: preference.to_string(),
            source_type: MemorySource::Preference,
            importance: 0.7,
            topics,
            metadata: Map::new(),
        }
    }
}

/// Importance + topic heuristics over the user's words.
fn score_text(text: &str) -> (f64, Vec<String>, MemorySource) {
    let lower = text.to_lowercase();
    let mut importance: f64 = 0.35;
    let mut topics = extract_topics(&lower);
    let mut source = MemorySource::Conversation;

    // Self-referential statements are the strongest keep signal.
    if lower.contains("my name is") || lower.contains("call me") {
        importance += 0.4;
        push_unique(&mut topics, "name");
        push_unique(&mut topics, "personal");
    } else if SELF_PATTERNS.iter().any(|p| lower.contains(p)) {
        importance += 0.25;
        push_unique(&mut topics, "personal");
    }

    if PREFERENCE_PATTERNS.iter().any(|p| lower.contains(p)) {
        importance += 0.2;
        push_unique(&mut topics, "preferences");
        source = MemorySource::Preference;
    }

    if lower.contains("remember") || lower.contains("don't forget") {
        importance += 0.2;
    }

    // Bare questions carry little to keep.
    if lower.trim_end().ends_with('?') && importance < 0.5 {
        importance -= 0.1;
    }
    // Very short windows are usually smalltalk.
    if lower.split_whitespace().count() < 4 {
        importance -= 0.1;
    }

    (importance.clamp(0.0, 1.0), topics, source)
}

const SELF_PATTERNS: &[&str] = &[
    "i am ", "i'm ", "i live", "i work", "i was born", "my birthday", "my job",
    "my wife", "my husband", "my partner", "my dog", "my cat", "my kids",
];

const PREFERENCE_PATTERNS: &[&str] =
    &["i prefer", "i like", "i love", "i hate", "favorite", "favourite", "i enjoy"];

const TOPIC_BUCKETS: &[(&str, &[&str])] = &[
    ("work", &["work", "job", "office", "meeting", "project", "boss"]),
    ("family", &["family", "wife", "husband", "partner", "kids", "mother", "father"]),
    ("food", &["food", "eat", "cook", "dinner", "lunch", "coffee", "tea", "restaurant"]),
    ("music", &["music", "song", "band", "album", "concert"]),
    ("travel", &["travel", "trip", "flight", "vacation", "visit", "city"]),
    ("tech", &["computer", "software", "code", "program", "model", "gpu"]),
    ("health", &["health", "doctor", "sleep", "exercise", "run", "gym"]),
    ("pets", &["dog", "cat", "pet"]),
];

fn extract_topics(lower: &str) -> Vec<String> {
    let mut topics = Vec::new();
    for (topic, keywords) in TOPIC_BUCKETS {
        if keywords.iter().any(|k| contains_word(lower, k)) {
            topics.push((*topic).to_string());
        }
    }
    topics
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == word)
}

fn push_unique(topics: &mut Vec<String>, topic: &str) {
    if !topics.iter().any(|t| t == topic) {
        topics.push(topic.to_string());
    }
}
