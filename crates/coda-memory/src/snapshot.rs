use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::short_term::ConversationExport;
use crate::types::{MemoryRecord, MemoryStats};

/// Full point-in-time capture of the memory subsystem: the short-term
/// log, every long-term record, and the aggregate stats at capture time.
/// Saved as `<snapshot_dir>/<snapshot_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub snapshot_id: String,
    pub timestamp: DateTime<Utc>,
    pub short_term: ConversationExport,
    pub long_term: LongTermSnapshot,
    pub memory_stats: MemoryStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermSnapshot {
    pub records: Vec<MemoryRecord>,
    pub topics: Vec<String>,
}

impl MemorySnapshot {
    pub fn new(
        short_term: ConversationExport,
        records: Vec<MemoryRecord>,
        topics: Vec<String>,
        memory_stats: MemoryStats,
    ) -> Self {
        Self {
            snapshot_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            short_term,
            long_term: LongTermSnapshot { records, topics },
            memory_stats,
        }
    }

    pub fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.snapshot_id));
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        info!(
            snapshot_id = %self.snapshot_id,
            records = self.long_term.records.len(),
            path = %path.display(),
            "saved memory snapshot"
        );
        Ok(path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let snap: MemorySnapshot = serde_json::from_slice(&std::fs::read(path)?)?;
        info!(snapshot_id = %snap.snapshot_id, "loaded memory snapshot");
        Ok(snap)
    }
}
