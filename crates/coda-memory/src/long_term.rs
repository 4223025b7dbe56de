use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db;
use crate::embed::{cosine, Embedder};
use crate::error::{MemoryError, Result};
use crate::types::{MemoryRecord, MemorySource, MemoryStats, SearchHit};

#[derive(Debug, Clone)]
pub struct LongTermConfig {
    /// Store directory (vector index + metadata.json). `None` keeps the
    /// whole store in memory.
    pub path: Option<PathBuf>,
    /// Tried when the primary metadata write fails.
    pub backup_path: Option<PathBuf>,
    /// Forgetting starts evicting above this record count.
    pub max_memories: usize,
    /// Time-decay scale for retrieval scoring and forgetting.
    pub decay_days: f64,
}

impl Default for LongTermConfig {
    fn default() -> Self {
        Self {
            path: None,
            backup_path: None,
            max_memories: 1000,
            decay_days: 30.0,
        }
    }
}

/// Disk shape of `metadata.json`.
#[derive(Debug, Serialize, Deserialize)]
struct MetadataDoc {
    memory_count: u64,
    memories: HashMap<String, MemoryRecord>,
    topics: Vec<String>,
    last_updated: DateTime<Utc>,
}

/// Content-addressed long-term store with vector retrieval.
///
/// Record metadata lives in an in-memory map mirrored to `metadata.json`
/// on every mutation (a crash never loses more than the current write);
/// embeddings live in a SQLite table keyed by record id. The write path
/// is serialized; reads only clone.
pub struct LongTermMemory {
    conn: Mutex<Connection>,
    records: Mutex<HashMap<String, MemoryRecord>>,
    embedder: Box<dyn Embedder>,
    config: LongTermConfig,
}

impl LongTermMemory {
    pub fn open(config: LongTermConfig, embedder: Box<dyn Embedder>) -> Result<Self> {
        let conn = match &config.path {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Connection::open(dir.join("memories.db"))?
            }
            None => Connection::open_in_memory()?,
        };
        db::init_db(&conn)?;

        let mut records = HashMap::new();
        if let Some(dir) = &config.path {
            let meta_path = dir.join("metadata.json");
            if meta_path.exists() {
                let doc: MetadataDoc = serde_json::from_slice(&std::fs::read(&meta_path)?)?;
                records = doc.memories;
                info!(
                    memories = records.len(),
                    path = %meta_path.display(),
                    "loaded long-term memory metadata"
                );
            }
        }

        let store = Self {
            conn: Mutex::new(conn),
            records: Mutex::new(records),
            embedder,
            config,
        };
        store.ensure_embeddings()?;
        Ok(store)
    }

    /// Re-embed any record whose vector row is missing (fresh import,
    /// restored snapshot, or a metadata file that outlived the index).
    fn ensure_embeddings(&self) -> Result<()> {
        let records = self.records.lock().unwrap();
        let conn = self.conn.lock().unwrap();
        let mut missing = 0usize;
        for rec in records.values() {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM embeddings WHERE id = ?1",
                    rusqlite::params![rec.id],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if !exists {
                let blob = db::embedding_to_blob(&self.embedder.embed(&rec.content));
                conn.execute(
                    "INSERT OR REPLACE INTO embeddings (id, embedding) VALUES (?1, ?2)",
                    rusqlite::params![rec.id, blob],
                )?;
                missing += 1;
            }
        }
        if missing > 0 {
            info!(reindexed = missing, "rebuilt missing embedding rows");
        }
        Ok(())
    }

    /// Persist a new record. Metadata is flushed before returning.
    pub fn add(
        &self,
        content: &str,
        source_type: MemorySource,
        importance: f64,
        topics: Vec<String>,
        metadata: Map<String, Value>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let record = MemoryRecord::new(
            id.clone(),
            content.to_string(),
            source_type,
            importance,
            topics,
            metadata,
        );

        {
            let conn = self.conn.lock().unwrap();
            let blob = db::embedding_to_blob(&self.embedder.embed(content));
            conn.execute(
                "INSERT OR REPLACE INTO embeddings (id, embedding) VALUES (?1, ?2)",
                rusqlite::params![id, blob],
            )?;
        }
        self.records.lock().unwrap().insert(id.clone(), record);

        self.prune_if_needed()?;
        self.save_metadata()?;
        debug!(id = %id, source = %source_type, "stored long-term memory");
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<MemoryRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.records.lock().unwrap().remove(id).is_some();
        if removed {
            self.conn
                .lock()
                .unwrap()
                .execute("DELETE FROM embeddings WHERE id = ?1", rusqlite::params![id])?;
            self.save_metadata()?;
        }
        Ok(removed)
    }

    /// Retrieve records by semantic similarity to `query`.
    ///
    /// `min_similarity` filters on the raw cosine score; ranking uses the
    /// score softened by a recency factor so fresh records win ties
    /// without burying old high-similarity ones.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        min_similarity: f64,
        metadata_filter: Option<&Map<String, Value>>,
    ) -> Result<Vec<SearchHit>> {
        let query_vec = self.embedder.embed(query);

        let rows: Vec<(String, Vec<f32>)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare("SELECT id, embedding FROM embeddings")?;
            let mapped = stmt.query_map([], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((id, db::blob_to_embedding(&blob)))
            })?;
            mapped.filter_map(|r| r.ok()).collect()
        };

        let records = self.records.lock().unwrap();
        let now = Utc::now();
        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .filter_map(|(id, embedding)| {
                let rec = records.get(&id)?;
                let similarity = cosine(&query_vec, &embedding);
                if similarity < min_similarity {
                    return None;
                }
                if let Some(filter) = metadata_filter {
                    if !matches_filter(rec, filter) {
                        return None;
                    }
                }
                let age_days =
                    (now - rec.created_at).num_seconds().max(0) as f64 / 86_400.0;
                let decay = (-age_days / self.config.decay_days).exp();
                Some(SearchHit {
                    id: rec.id.clone(),
                    content: rec.content.clone(),
                    source_type: rec.source_type,
                    importance: rec.importance,
                    topics: rec.topics.clone(),
                    metadata: rec.metadata.clone(),
                    similarity,
                    adjusted_score: similarity * (0.6 + 0.4 * decay),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.adjusted_score
                .partial_cmp(&a.adjusted_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        debug!(query, results = hits.len(), "long-term search");
        Ok(hits)
    }

    /// Raise a record's importance (bounded by 1.0) and bump its access
    /// bookkeeping. Returns `(old_importance, new_importance)`.
    pub fn reinforce(&self, id: &str, strength: f64) -> Result<(f64, f64)> {
        let updated = {
            let mut records = self.records.lock().unwrap();
            let rec = records
                .get_mut(id)
                .ok_or_else(|| MemoryError::NotFound { id: id.to_string() })?;
            let old = rec.importance;
            rec.importance = (rec.importance + strength).clamp(0.0, 1.0);
            rec.last_accessed = Utc::now();
            rec.access_count += 1;
            (old, rec.importance)
        };
        self.save_metadata()?;
        Ok(updated)
    }

    pub fn all_memories(&self) -> Vec<MemoryRecord> {
        let mut all: Vec<MemoryRecord> = self.records.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        all
    }

    pub fn all_topics(&self) -> Vec<String> {
        let records = self.records.lock().unwrap();
        let mut topics: Vec<String> = records
            .values()
            .flat_map(|r| r.topics.iter().cloned())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let records = self.records.lock().unwrap();
        let mut source_types = std::collections::BTreeMap::new();
        let mut importance_sum = 0.0;
        for rec in records.values() {
            *source_types.entry(rec.source_type.to_string()).or_insert(0) += 1;
            importance_sum += rec.importance;
        }
        let total = records.len() as u64;
        let topic_count = {
            let mut topics: Vec<&String> =
                records.values().flat_map(|r| r.topics.iter()).collect();
            topics.sort();
            topics.dedup();
            topics.len() as u64
        };
        MemoryStats {
            total_memories: total,
            source_types,
            topic_count,
            avg_importance: if total > 0 {
                importance_sum / total as f64
            } else {
                0.0
            },
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the entire record set (snapshot restore). Embeddings are
    /// rebuilt from content; the swap happens only after every row is in.
    pub fn replace_all(&self, new_records: Vec<MemoryRecord>) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM embeddings", [])?;
            for rec in &new_records {
                let blob = db::embedding_to_blob(&self.embedder.embed(&rec.content));
                conn.execute(
                    "INSERT INTO embeddings (id, embedding) VALUES (?1, ?2)",
                    rusqlite::params![rec.id, blob],
                )?;
            }
        }
        let mut map = HashMap::with_capacity(new_records.len());
        for rec in new_records {
            map.insert(rec.id.clone(), rec);
        }
        *self.records.lock().unwrap() = map;
        self.save_metadata()
    }

    /// Evict lowest-scoring records while over capacity.
    /// Score = importance × recency decay × access weight.
    fn prune_if_needed(&self) -> Result<()> {
        let victims: Vec<String> = {
            let records = self.records.lock().unwrap();
            if records.len() <= self.config.max_memories {
                return Ok(());
            }
            let now = Utc::now();
            let mut scored: Vec<(f64, String)> = records
                .values()
                .map(|r| (self.forget_score(r, now), r.id.clone()))
                .collect();
            scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            let excess = records.len() - self.config.max_memories;
            scored.into_iter().take(excess).map(|(_, id)| id).collect()
        };

        if !victims.is_empty() {
            info!(evicted = victims.len(), "forgetting low-value memories");
            let mut records = self.records.lock().unwrap();
            let conn = self.conn.lock().unwrap();
            for id in &victims {
                records.remove(id);
                conn.execute("DELETE FROM embeddings WHERE id = ?1", rusqlite::params![id])?;
            }
        }
        Ok(())
    }

    fn forget_score(&self, rec: &MemoryRecord, now: DateTime<Utc>) -> f64 {
        let age_days = (now - rec.last_accessed).num_seconds().max(0) as f64 / 86_400.0;
        let recency = (-age_days / self.config.decay_days).exp();
        let access_weight = 1.0 + ((1.0 + rec.access_count as f64).ln() / 4.0);
        rec.importance * recency * access_weight
    }

    /// Atomic write of the metadata document (temp file + rename). A
    /// backup path is tried when the primary write fails. No-op in
    /// in-memory mode.
    pub fn save_metadata(&self) -> Result<()> {
        let Some(dir) = &self.config.path else {
            return Ok(());
        };

        let doc = {
            let records = self.records.lock().unwrap();
            MetadataDoc {
                memory_count: records.len() as u64,
                memories: records.clone(),
                topics: {
                    let mut t: Vec<String> = records
                        .values()
                        .flat_map(|r| r.topics.iter().cloned())
                        .collect();
                    t.sort();
                    t.dedup();
                    t
                },
                last_updated: Utc::now(),
            }
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        match write_atomic(&dir.join("metadata.json"), &bytes) {
            Ok(()) => Ok(()),
            Err(primary_err) => {
                warn!(error = %primary_err, "primary metadata write failed");
                if let Some(backup) = &self.config.backup_path {
                    std::fs::create_dir_all(backup)?;
                    write_atomic(&backup.join("metadata.json"), &bytes)?;
                    warn!(path = %backup.display(), "metadata written to backup path");
                    Ok(())
                } else {
                    Err(primary_err.into())
                }
            }
        }
    }
}

impl Drop for LongTermMemory {
    fn drop(&mut self) {
        // Unconditional flush on shutdown; errors are logged, not raised.
        if let Err(e) = self.save_metadata() {
            warn!(error = %e, "failed to flush memory metadata on shutdown");
        }
    }
}

fn matches_filter(rec: &MemoryRecord, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(key, expected)| {
        if key == "source_type" {
            return expected.as_str() == Some(&rec.source_type.to_string());
        }
        rec.metadata.get(key) == Some(expected)
    })
}

fn write_atomic(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;

    fn in_memory() -> LongTermMemory {
        LongTermMemory::open(LongTermConfig::default(), Box::new(HashEmbedder::default()))
            .unwrap()
    }

    #[test]
    fn add_get_delete() {
        let store = in_memory();
        let id = store
            .add("I have two cats", MemorySource::Fact, 0.8, vec!["pets".into()], Map::new())
            .unwrap();
        let rec = store.get(&id).unwrap();
        assert_eq!(rec.content, "I have two cats");
        assert_eq!(rec.source_type, MemorySource::Fact);
        assert!(store.delete(&id).unwrap());
        assert!(store.get(&id).is_none());
        assert!(!store.delete(&id).unwrap());
    }

    #[test]
    fn importance_clamped_and_reinforce_monotone() {
        let store = in_memory();
        let id = store
            .add("fact", MemorySource::Fact, 3.0, vec![], Map::new())
            .unwrap();
        assert_eq!(store.get(&id).unwrap().importance, 1.0);

        let id2 = store
            .add("other", MemorySource::Fact, 0.5, vec![], Map::new())
            .unwrap();
        let before = store.get(&id2).unwrap();
        let (old, new) = store.reinforce(&id2, 0.9).unwrap();
        assert_eq!(old, 0.5);
        assert_eq!(new, 1.0);
        let after = store.get(&id2).unwrap();
        assert!(after.access_count > before.access_count);
        assert!(after.last_accessed >= before.last_accessed);
    }

    #[test]
    fn search_finds_relevant_record() {
        let store = in_memory();
        store
            .add("My name is Ada Lovelace", MemorySource::Fact, 0.9, vec!["name".into()], Map::new())
            .unwrap();
        store
            .add("The weather in Lisbon is sunny", MemorySource::Conversation, 0.4, vec![], Map::new())
            .unwrap();

        let hits = store.search("What is my name?", 5, 0.0, None).unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].content.contains("Ada"));
    }

    #[test]
    fn metadata_filter_restricts_results() {
        let store = in_memory();
        let mut meta = Map::new();
        meta.insert("category".into(), serde_json::json!("personal"));
        store
            .add("I prefer tea over coffee", MemorySource::Preference, 0.7, vec![], meta)
            .unwrap();
        store
            .add("I prefer window seats", MemorySource::Preference, 0.7, vec![], Map::new())
            .unwrap();

        let mut filter = Map::new();
        filter.insert("category".into(), serde_json::json!("personal"));
        let hits = store.search("what do I prefer", 10, 0.0, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("tea"));

        let mut type_filter = Map::new();
        type_filter.insert("source_type".into(), serde_json::json!("preference"));
        let hits = store.search("prefer", 10, 0.0, Some(&type_filter)).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn forgetting_evicts_down_to_capacity() {
        let config = LongTermConfig {
            max_memories: 5,
            ..LongTermConfig::default()
        };
        let store =
            LongTermMemory::open(config, Box::new(HashEmbedder::default())).unwrap();
        for i in 0..10 {
            store
                .add(&format!("memory number {i}"), MemorySource::Conversation, 0.5, vec![], Map::new())
                .unwrap();
        }
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = LongTermConfig {
            path: Some(dir.path().to_path_buf()),
            ..LongTermConfig::default()
        };

        {
            let store = LongTermMemory::open(config.clone(), Box::new(HashEmbedder::default()))
                .unwrap();
            store
                .add("My name is Xavier", MemorySource::Fact, 0.9, vec!["name".into()], Map::new())
                .unwrap();
        } // drop flushes

        let store =
            LongTermMemory::open(config, Box::new(HashEmbedder::default())).unwrap();
        let hits = store.search("What is my name?", 3, 0.0, None).unwrap();
        assert!(hits.iter().any(|h| h.content.contains("Xavier")));
    }

    #[test]
    fn metadata_backup_path_used_when_primary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        let store = LongTermMemory::open(
            LongTermConfig {
                path: Some(dir.path().to_path_buf()),
                backup_path: Some(backup.path().to_path_buf()),
                ..LongTermConfig::default()
            },
            Box::new(HashEmbedder::default()),
        )
        .unwrap();
        store
            .add("resilient", MemorySource::Fact, 0.5, vec![], Map::new())
            .unwrap();

        // Remove the primary directory so its write fails.
        std::fs::remove_dir_all(dir.path()).unwrap();

        store.save_metadata().unwrap();
        assert!(backup.path().join("metadata.json").exists());
    }

    #[test]
    fn stats_reflect_contents() {
        let store = in_memory();
        store.add("a", MemorySource::Fact, 0.4, vec!["x".into()], Map::new()).unwrap();
        store.add("b", MemorySource::Preference, 0.6, vec!["x".into(), "y".into()], Map::new()).unwrap();
        let stats = store.memory_stats();
        assert_eq!(stats.total_memories, 2);
        assert_eq!(stats.source_types.get("fact"), Some(&1));
        assert_eq!(stats.topic_count, 2);
        assert!((stats.avg_importance - 0.5).abs() < 1e-9);
    }
}
