use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use coda_core::types::Role;

/// Where a long-term record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    /// Encoded from a conversation window.
    Conversation,
    /// Explicitly asserted fact.
    Fact,
    /// User preference.
    Preference,
    /// Seeded by the system itself.
    System,
}

impl fmt::Display for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySource::Conversation => write!(f, "conversation"),
            MemorySource::Fact => write!(f, "fact"),
            MemorySource::Preference => write!(f, "preference"),
            MemorySource::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for MemorySource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(MemorySource::Conversation),
            "fact" => Ok(MemorySource::Fact),
            "preference" => Ok(MemorySource::Preference),
            "system" => Ok(MemorySource::System),
            other => Err(format!("unknown memory source: {}", other)),
        }
    }
}

/// A persistent unit of knowledge.
///
/// `importance` is clamped to [0, 1] on every write path; `access_count`
/// only ever grows. Records are mutated solely through reinforcement,
/// importance updates, or forgetting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub source_type: MemorySource,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MemoryRecord {
    pub fn new(
        id: String,
        content: String,
        source_type: MemorySource,
        importance: f64,
        topics: Vec<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            content,
            source_type,
            importance: importance.clamp(0.0, 1.0),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            topics,
            metadata,
        }
    }
}

/// One retrieval result, similarity-scored against the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub source_type: MemorySource,
    pub importance: f64,
    pub topics: Vec<String>,
    pub metadata: Map<String, Value>,
    /// Raw cosine similarity in [−1, 1].
    pub similarity: f64,
    /// Similarity combined with the time-decay factor; sort key.
    pub adjusted_score: f64,
}

/// Aggregate counters over the long-term store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_memories: u64,
    /// source_type name → record count.
    pub source_types: std::collections::BTreeMap<String, u64>,
    pub topic_count: u64,
    pub avg_importance: f64,
}

/// One `(role, content)` entry of an assembled LLM context window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

impl ContextMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_is_clamped_on_creation() {
        let rec = MemoryRecord::new(
            "a".into(),
            "x".into(),
            MemorySource::Fact,
            7.5,
            vec![],
            Map::new(),
        );
        assert_eq!(rec.importance, 1.0);

        let rec = MemoryRecord::new(
            "b".into(),
            "x".into(),
            MemorySource::Fact,
            -0.5,
            vec![],
            Map::new(),
        );
        assert_eq!(rec.importance, 0.0);
    }

    #[test]
    fn source_round_trip() {
        for src in [
            MemorySource::Conversation,
            MemorySource::Fact,
            MemorySource::Preference,
            MemorySource::System,
        ] {
            assert_eq!(src.to_string().parse::<MemorySource>().unwrap(), src);
        }
    }
}
