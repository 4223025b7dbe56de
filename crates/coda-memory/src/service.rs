use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use coda_core::types::{FunctionCall, Role, Turn};

use crate::embed::{Embedder, HashEmbedder};
use crate::encoder::MemoryEncoder;
use crate::error::{MemoryError, Result};
use crate::long_term::{LongTermConfig, LongTermMemory};
use crate::short_term::ShortTermMemory;
use crate::snapshot::MemorySnapshot;
use crate::topics::{TopicClusters, TopicConfig};
use crate::types::{ContextMessage, MemoryRecord, MemoryStats, SearchHit};

#[derive(Debug, Clone)]
pub struct MemoryServiceConfig {
    pub max_turns: usize,
    /// `None` disables the long-term tier entirely.
    pub long_term: Option<LongTermConfig>,
    /// Retrieval floor for context enrichment and searches.
    pub min_similarity: f64,
    pub topics: TopicConfig,
}

impl Default for MemoryServiceConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            long_term: Some(LongTermConfig::default()),
            min_similarity: 0.3,
            topics: TopicConfig::default(),
        }
    }
}

/// Thin façade over the two memory tiers.
///
/// Writes are forwarded to both (turns land in the short-term log, and
/// [`MemoryService::consolidate`] distills them into long-term records);
/// reads come from either tier without merging their state. The
/// short-term log is only mutated through this service; retrieval is
/// read-only and callable from any task.
pub struct MemoryService {
    short: Mutex<ShortTermMemory>,
    long: Option<Arc<LongTermMemory>>,
    encoder: MemoryEncoder,
    clusters: TopicClusters,
    /// Highest turn id already fed to the encoder.
    consolidated_up_to: Mutex<Option<u64>>,
    min_similarity: f64,
}

impl MemoryService {
    pub fn open(config: MemoryServiceConfig) -> Result<Self> {
        Self::open_with_embedder(config, Box::new(HashEmbedder::default()))
    }

    pub fn open_with_embedder(
        config: MemoryServiceConfig,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self> {
        let long = match config.long_term {
            Some(lt_config) => Some(Arc::new(LongTermMemory::open(lt_config, embedder)?)),
            None => None,
        };
        info!(
            max_turns = config.max_turns,
            long_term = long.is_some(),
            "memory service ready"
        );
        Ok(Self {
            short: Mutex::new(ShortTermMemory::new(config.max_turns)),
            long,
            encoder: MemoryEncoder::default(),
            clusters: TopicClusters::new(config.topics),
            consolidated_up_to: Mutex::new(None),
            min_similarity: config.min_similarity,
        })
    }

    pub fn long_term_enabled(&self) -> bool {
        self.long.is_some()
    }

    // ------------------------------------------------------------------
    // Short-term writes and reads
    // ------------------------------------------------------------------

    pub fn add_turn(&self, role: Role, content: &str) -> Turn {
        self.short.lock().unwrap().add_turn(role, content)
    }

    pub fn add_turn_with(
        &self,
        role: Role,
        content: &str,
        function_call: Option<FunctionCall>,
        name: Option<String>,
    ) -> Turn {
        self.short
            .lock()
            .unwrap()
            .add_turn_with(role, content, function_call, name)
    }

    pub fn context(&self, max_tokens: usize) -> Vec<ContextMessage> {
        self.short.lock().unwrap().context(max_tokens)
    }

    /// Context window enriched with retrieved long-term memories.
    ///
    /// Retrieval failure degrades to the plain short-term context rather
    /// than aborting the turn. The hits are returned so the caller can
    /// publish a `memory_retrieve` event.
    pub fn enhanced_context(
        &self,
        query: &str,
        max_tokens: usize,
        retrieval_limit: usize,
    ) -> (Vec<ContextMessage>, Vec<SearchHit>) {
        let mut context = self.context(max_tokens);
        let Some(long) = &self.long else {
            return (context, Vec::new());
        };

        let hits = match long.search(query, retrieval_limit, self.min_similarity, None) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "long-term retrieval failed, continuing without it");
                Vec::new()
            }
        };

        if !hits.is_empty() {
            let mut block = String::from("Relevant things you remember about the user:\n");
            for hit in &hits {
                block.push_str(&format!("- {}\n", hit.content));
            }
            let insert_at = usize::from(
                context.first().map(|m| m.role == Role::System).unwrap_or(false),
            );
            context.insert(insert_at, ContextMessage::new(Role::System, block));
        }

        (context, hits)
    }

    pub fn turn_count(&self) -> usize {
        self.short.lock().unwrap().turn_count()
    }

    pub fn session_duration_seconds(&self) -> f64 {
        self.short.lock().unwrap().session_duration_seconds()
    }

    pub fn reset_short_term(&self) {
        self.short.lock().unwrap().reset();
        *self.consolidated_up_to.lock().unwrap() = None;
    }

    pub fn export_conversation(&self, path: &Path) -> Result<PathBuf> {
        self.short.lock().unwrap().export_to(path)
    }

    pub fn import_conversation(&self, path: &Path) -> Result<usize> {
        self.short.lock().unwrap().import_from(path)
    }

    // ------------------------------------------------------------------
    // Long-term writes and reads
    // ------------------------------------------------------------------

    fn long(&self) -> Result<&Arc<LongTermMemory>> {
        self.long.as_ref().ok_or(MemoryError::LongTermDisabled)
    }

    /// Distill turns added since the last consolidation into long-term
    /// records. Cheap to call after every turn; only runs the encoder
    /// once a full window of new speech has accumulated.
    pub fn consolidate(&self) -> Result<Vec<MemoryRecord>> {
        let Some(long) = &self.long else {
            return Ok(Vec::new());
        };

        let pending: Vec<Turn> = {
            let short = self.short.lock().unwrap();
            let mark = *self.consolidated_up_to.lock().unwrap();
            short
                .turns()
                .filter(|t| matches!(t.role, Role::User | Role::Assistant))
                .filter(|t| mark.map_or(true, |m| t.turn_id > m))
                .cloned()
                .collect()
        };
        if pending.len() < 4 {
            return Ok(Vec::new());
        }

        let candidates = self.encoder.encode_turns(&pending);
        let mut stored = Vec::with_capacity(candidates.len());
        for cand in candidates {
            let id = long.add(
                &cand.content,
                cand.source_type,
                cand.importance,
                cand.topics,
                cand.metadata,
            )?;
            if let Some(rec) = long.get(&id) {
                stored.push(rec);
            }
        }

        *self.consolidated_up_to.lock().unwrap() =
            pending.last().map(|t| t.turn_id);
        if !stored.is_empty() {
            self.clusters.invalidate();
            debug!(stored = stored.len(), "consolidated conversation into long-term memory");
        }
        Ok(stored)
    }

    pub fn add_fact(&self, fact: &str, importance: Option<f64>) -> Result<MemoryRecord> {
        let long = self.long()?;
        let cand = self.encoder.encode_fact(fact, importance);
        let id = long.add(
            &cand.content,
            cand.source_type,
            cand.importance,
            cand.topics,
            cand.metadata,
        )?;
        self.clusters.invalidate();
        long.get(&id).ok_or(MemoryError::NotFound { id })
    }

    pub fn add_preference(&self, preference: &str) -> Result<MemoryRecord> {
        let long = self.long()?;
        let cand = self.encoder.encode_preference(preference);
        let id = long.add(
            &cand.content,
            cand.source_type,
            cand.importance,
            cand.topics,
            cand.metadata,
        )?;
        self.clusters.invalidate();
        long.get(&id).ok_or(MemoryError::NotFound { id })
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.long()?.search(query, limit, self.min_similarity, None)
    }

    pub fn get_memory(&self, id: &str) -> Option<MemoryRecord> {
        self.long.as_ref().and_then(|l| l.get(id))
    }

    pub fn delete_memory(&self, id: &str) -> Result<bool> {
        let removed = self.long()?.delete(id)?;
        if removed {
            self.clusters.invalidate();
        }
        Ok(removed)
    }

    pub fn reinforce(&self, id: &str, strength: f64) -> Result<(f64, f64)> {
        self.long()?.reinforce(id, strength)
    }

    pub fn all_memories(&self) -> Vec<MemoryRecord> {
        self.long
            .as_ref()
            .map(|l| l.all_memories())
            .unwrap_or_default()
    }

    pub fn all_topics(&self) -> Vec<String> {
        self.long
            .as_ref()
            .map(|l| l.all_topics())
            .unwrap_or_default()
    }

    /// Flush long-term metadata to disk. Called unconditionally during
    /// shutdown, and harmless when long-term is disabled.
    pub fn save_metadata(&self) -> Result<()> {
        match &self.long {
            Some(long) => long.save_metadata(),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Summaries and stats
    // ------------------------------------------------------------------

    pub fn memory_stats(&self) -> Value {
        let short = {
            let s = self.short.lock().unwrap();
            json!({
                "turn_count": s.turn_count(),
                "turns_added": s.turns_added(),
                "session_duration_seconds": s.session_duration_seconds(),
            })
        };
        let long = self.long.as_ref().map(|l| l.memory_stats());
        json!({ "short_term": short, "long_term": long })
    }

    fn long_stats(&self) -> MemoryStats {
        self.long
            .as_ref()
            .map(|l| l.memory_stats())
            .unwrap_or(MemoryStats {
                total_memories: 0,
                source_types: Default::default(),
                topic_count: 0,
                avg_importance: 0.0,
            })
    }

    pub fn user_summary(&self) -> Option<Value> {
        self.long
            .as_ref()
            .map(|l| self.clusters.user_profile(&l.all_memories()))
    }

    pub fn topic_summaries(&self) -> Option<std::collections::BTreeMap<String, String>> {
        self.long
            .as_ref()
            .map(|l| self.clusters.topic_summaries(&l.all_memories()))
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> MemorySnapshot {
        let export = self.short.lock().unwrap().export_data();
        let (records, topics) = match &self.long {
            Some(l) => (l.all_memories(), l.all_topics()),
            None => (Vec::new(), Vec::new()),
        };
        MemorySnapshot::new(export, records, topics, self.long_stats())
    }

    /// Replace the subsystem state with a snapshot. The long-term swap
    /// happens first and atomically; the short-term log only changes once
    /// that has succeeded, so a failed apply leaves everything untouched.
    pub fn apply_snapshot(&self, snapshot: MemorySnapshot) -> Result<()> {
        if let Some(long) = &self.long {
            long.replace_all(snapshot.long_term.records)?;
            self.clusters.invalidate();
        } else if !snapshot.long_term.records.is_empty() {
            return Err(MemoryError::Snapshot(
                "snapshot contains long-term records but long-term memory is disabled".into(),
            ));
        }
        let imported = self
            .short
            .lock()
            .unwrap()
            .import_data(snapshot.short_term);
        *self.consolidated_up_to.lock().unwrap() = None;
        info!(turns = imported, "applied memory snapshot");
        Ok(())
    }

    pub fn save_snapshot(&self, dir: &Path) -> Result<(String, PathBuf)> {
        let snap = self.snapshot();
        let id = snap.snapshot_id.clone();
        let path = snap.save_to(dir)?;
        Ok((id, path))
    }

    pub fn apply_snapshot_file(&self, path: &Path) -> Result<String> {
        let snap = MemorySnapshot::load_from(path)?;
        let id = snap.snapshot_id.clone();
        self.apply_snapshot(snap)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> MemoryService {
        MemoryService::open(MemoryServiceConfig {
            min_similarity: 0.0,
            ..MemoryServiceConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn writes_reach_both_tiers() {
        let svc = service();
        svc.add_turn(Role::User, "My name is Ada and I love chess");
        svc.add_turn(Role::Assistant, "Nice to meet you, Ada");
        svc.add_turn(Role::User, "I work on compilers at a small company");
        svc.add_turn(Role::Assistant, "Compilers are fascinating");

        let stored = svc.consolidate().unwrap();
        assert!(!stored.is_empty());
        assert!(svc.turn_count() >= 4);

        // A second consolidation with no new turns is a no-op.
        assert!(svc.consolidate().unwrap().is_empty());
    }

    #[test]
    fn enhanced_context_injects_retrieval_after_system() {
        let svc = service();
        svc.add_turn(Role::System, "You are Coda.");
        svc.add_fact("The user's name is Ada", None).unwrap();

        let (ctx, hits) = svc.enhanced_context("what is my name", 800, 3);
        assert!(!hits.is_empty());
        assert_eq!(ctx[0].role, Role::System);
        assert_eq!(ctx[0].content, "You are Coda.");
        assert!(ctx[1].content.contains("Relevant things you remember"));
        assert!(ctx[1].content.contains("Ada"));
    }

    #[test]
    fn disabled_long_term_degrades_gracefully() {
        let svc = MemoryService::open(MemoryServiceConfig {
            long_term: None,
            ..MemoryServiceConfig::default()
        })
        .unwrap();
        svc.add_turn(Role::User, "hello");
        let (ctx, hits) = svc.enhanced_context("hello", 800, 3);
        assert!(hits.is_empty());
        assert_eq!(ctx.len(), 1);
        assert!(matches!(
            svc.add_fact("x", None),
            Err(MemoryError::LongTermDisabled)
        ));
        assert!(svc.consolidate().unwrap().is_empty());
        svc.save_metadata().unwrap();
    }

    #[test]
    fn snapshot_apply_same_is_noop() {
        let svc = service();
        svc.add_turn(Role::System, "prompt");
        svc.add_turn(Role::User, "remember that I play the violin");
        svc.add_fact("The user plays the violin", Some(0.8)).unwrap();

        let before = svc.memory_stats();
        let snap = svc.snapshot();
        svc.apply_snapshot(snap).unwrap();
        let after = svc.memory_stats();

        assert_eq!(
            before["long_term"]["total_memories"],
            after["long_term"]["total_memories"]
        );
        assert_eq!(
            before["short_term"]["turn_count"],
            after["short_term"]["turn_count"]
        );
    }

    #[test]
    fn snapshot_restores_searchable_records() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service();
        svc.add_fact("The user's cat is called Turing", None).unwrap();
        let (_, path) = svc.save_snapshot(dir.path()).unwrap();

        let other = service();
        other.apply_snapshot_file(&path).unwrap();
        let hits = other.search("what is my cat called", 3).unwrap();
        assert!(hits.iter().any(|h| h.content.contains("Turing")));
    }
}
