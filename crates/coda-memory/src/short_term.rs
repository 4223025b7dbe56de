use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use coda_core::types::{FunctionCall, Role, Turn};

use crate::error::Result;
use crate::types::ContextMessage;

/// Rough token estimate for budget accounting (~4 chars per token).
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Bounded, ordered log of conversation turns.
///
/// Turn ids are dense and strictly increasing within a session. When the
/// log is full, the oldest turn that is not the first system turn is
/// evicted, so the seeded system prompt survives any number of
/// conversation turns.
pub struct ShortTermMemory {
    turns: VecDeque<Turn>,
    max_turns: usize,
    session_start: DateTime<Utc>,
    next_turn_id: u64,
}

/// Disk shape of an exported conversation
/// (`<export_dir>/session_<timestamp>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationExport {
    pub session_start: DateTime<Utc>,
    pub turn_count: u64,
    pub export_time: DateTime<Utc>,
    pub turns: Vec<Turn>,
}

impl ShortTermMemory {
    pub fn new(max_turns: usize) -> Self {
        info!(max_turns, "short-term memory initialized");
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns: max_turns.max(1),
            session_start: Utc::now(),
            next_turn_id: 0,
        }
    }

    /// Append a new turn, evicting if at capacity. Returns the stored turn.
    pub fn add_turn(&mut self, role: Role, content: impl Into<String>) -> Turn {
        self.add_turn_with(role, content, None, None)
    }

    /// Append a turn carrying a function-call payload or a function name.
    pub fn add_turn_with(
        &mut self,
        role: Role,
        content: impl Into<String>,
        function_call: Option<FunctionCall>,
        name: Option<String>,
    ) -> Turn {
        if self.turns.len() >= self.max_turns {
            self.evict_one();
        }

        let mut turn = Turn::new(role, content, self.next_turn_id);
        turn.function_call = function_call;
        turn.name = name;
        self.next_turn_id += 1;

        debug!(turn_id = turn.turn_id, role = %role, "added turn");
        self.turns.push_back(turn.clone());
        turn
    }

    /// Remove the oldest turn that is not the first system turn.
    fn evict_one(&mut self) {
        let first_system = self.turns.iter().position(|t| t.role == Role::System);
        let victim = (0..self.turns.len()).find(|&i| Some(i) != first_system);
        if let Some(i) = victim {
            let evicted = self.turns.remove(i);
            if let Some(t) = evicted {
                debug!(turn_id = t.turn_id, "evicted turn at capacity");
            }
        } else {
            // Log holds only a single protected system turn; drop it so the
            // new turn still fits.
            self.turns.pop_front();
        }
    }

    /// Assemble a context window within `max_tokens`.
    ///
    /// The first system turn, if present, is always seated first; the
    /// remaining budget is filled from the newest turn backward, and the
    /// selected turns are returned in chronological order.
    pub fn context(&self, max_tokens: usize) -> Vec<ContextMessage> {
        let mut budget = 0usize;
        let mut out: Vec<ContextMessage> = Vec::new();

        let first_system = self.turns.iter().find(|t| t.role == Role::System);
        if let Some(system) = first_system {
            budget += estimate_tokens(&system.content);
            out.push(ContextMessage::new(Role::System, system.content.clone()));
        }
        let protected_id = first_system.map(|t| t.turn_id);

        let mut tail: Vec<ContextMessage> = Vec::new();
        for turn in self.turns.iter().rev() {
            if Some(turn.turn_id) == protected_id || turn.role == Role::System {
                continue;
            }
            let cost = estimate_tokens(&turn.content);
            if budget + cost > max_tokens {
                break;
            }
            budget += cost;
            tail.push(ContextMessage::new(turn.role, turn.content.clone()));
        }
        tail.reverse();
        out.extend(tail);

        debug!(messages = out.len(), tokens = budget, "assembled context window");
        out
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Total turns ever added this session (the next turn id).
    pub fn turns_added(&self) -> u64 {
        self.next_turn_id
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }

    pub fn session_duration_seconds(&self) -> f64 {
        (Utc::now() - self.session_start).num_milliseconds() as f64 / 1000.0
    }

    /// Clear the log and restart the turn counter.
    pub fn reset(&mut self) {
        let cleared = self.turns.len();
        self.turns.clear();
        self.next_turn_id = 0;
        info!(cleared, "short-term memory reset");
    }

    pub fn export_data(&self) -> ConversationExport {
        ConversationExport {
            session_start: self.session_start,
            turn_count: self.next_turn_id,
            export_time: Utc::now(),
            turns: self.turns.iter().cloned().collect(),
        }
    }

    /// Write the full log plus session metadata as pretty JSON.
    pub fn export_to(&self, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let doc = self.export_data();
        std::fs::write(path, serde_json::to_vec_pretty(&doc)?)?;
        info!(turns = doc.turns.len(), path = %path.display(), "exported conversation");
        Ok(path.to_path_buf())
    }

    /// Replace the current state with an exported document.
    pub fn import_data(&mut self, doc: ConversationExport) -> usize {
        self.reset();
        self.session_start = doc.session_start;
        self.next_turn_id = doc.turn_count;
        for turn in doc.turns.into_iter().take(self.max_turns) {
            self.turns.push_back(turn);
        }
        info!(turns = self.turns.len(), "imported conversation");
        self.turns.len()
    }

    pub fn import_from(&mut self, path: &Path) -> Result<usize> {
        let doc: ConversationExport = serde_json::from_slice(&std::fs::read(path)?)?;
        Ok(self.import_data(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_ids_are_dense_and_increasing() {
        let mut mem = ShortTermMemory::new(20);
        for i in 0..5 {
            let turn = mem.add_turn(Role::User, format!("msg {i}"));
            assert_eq!(turn.turn_id, i);
        }
    }

    #[test]
    fn eviction_preserves_first_system_turn() {
        let mut mem = ShortTermMemory::new(3);
        mem.add_turn(Role::System, "system prompt");
        mem.add_turn(Role::User, "one");
        mem.add_turn(Role::Assistant, "two");
        // At capacity: the next add must evict "one", not the system turn.
        mem.add_turn(Role::User, "three");

        let roles: Vec<Role> = mem.turns().map(|t| t.role).collect();
        assert_eq!(roles[0], Role::System);
        assert_eq!(mem.turn_count(), 3);
        assert!(mem.turns().all(|t| t.content != "one"));
    }

    #[test]
    fn context_always_includes_system_turn_under_pressure() {
        let mut mem = ShortTermMemory::new(3);
        mem.add_turn(Role::System, "You are Coda.");
        for i in 0..10 {
            mem.add_turn(Role::User, format!("user message number {i}"));
        }
        let ctx = mem.context(usize::MAX / 2);
        assert_eq!(ctx[0].role, Role::System);
        assert_eq!(ctx[0].content, "You are Coda.");
    }

    #[test]
    fn context_respects_token_budget_newest_first() {
        let mut mem = ShortTermMemory::new(20);
        for i in 0..6 {
            // ~10 tokens each
            mem.add_turn(Role::User, format!("{i} {}", "word ".repeat(8)));
        }
        let ctx = mem.context(25);
        // Only the newest turns fit, returned chronologically.
        assert!(ctx.len() < 6);
        let first_kept = &ctx[0].content;
        let last_kept = &ctx[ctx.len() - 1].content;
        assert!(first_kept < last_kept);
        assert!(last_kept.starts_with('5'));
    }

    #[test]
    fn reset_clears_log_and_counter() {
        let mut mem = ShortTermMemory::new(5);
        mem.add_turn(Role::User, "hello");
        mem.reset();
        assert_eq!(mem.turn_count(), 0);
        assert!(mem.context(usize::MAX / 2).is_empty());
        assert_eq!(mem.add_turn(Role::User, "again").turn_id, 0);
    }

    #[test]
    fn export_reset_import_round_trips() {
        let mut mem = ShortTermMemory::new(10);
        mem.add_turn(Role::System, "prompt");
        mem.add_turn(Role::User, "hi");
        mem.add_turn(Role::Assistant, "hello!");
        let before: Vec<Turn> = mem.turns().cloned().collect();

        let doc = mem.export_data();
        mem.reset();
        assert_eq!(mem.turn_count(), 0);

        mem.import_data(doc);
        let after: Vec<Turn> = mem.turns().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn export_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_test.json");

        let mut mem = ShortTermMemory::new(10);
        mem.add_turn(Role::User, "persist me");
        mem.export_to(&path).unwrap();

        let mut other = ShortTermMemory::new(10);
        let imported = other.import_from(&path).unwrap();
        assert_eq!(imported, 1);
        assert_eq!(other.turns().next().unwrap().content, "persist me");
    }
}
