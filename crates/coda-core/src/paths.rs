//! On-disk data layout.
//!
//! ```text
//! <data>/logs/coda_<timestamp>.log      session logs
//! <data>/exports/session_<ts>.json      conversation exports
//! <data>/memory/long_term/              vector index + metadata.json
//! <data>/memory/snapshots/<id>.json     memory snapshots
//! ```

use std::path::{Path, PathBuf};

pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("memory").join("snapshots")
    }

    /// Fallback location for the long-term metadata document when the
    /// primary write fails.
    pub fn memory_backup_dir(&self) -> PathBuf {
        self.root.join("memory").join("backups")
    }

    /// Create every directory in the layout. Idempotent.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [
            self.logs_dir(),
            self.exports_dir(),
            self.memory_dir(),
            self.snapshots_dir(),
            self.memory_backup_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Log file name for this run, e.g. `coda_20260801_143000.log`.
    pub fn log_file_name(now: chrono::DateTime<chrono::Utc>) -> String {
        format!("coda_{}.log", now.format("%Y%m%d_%H%M%S"))
    }

    /// Conversation export path for this run.
    pub fn export_file(&self, now: chrono::DateTime<chrono::Utc>) -> PathBuf {
        self.exports_dir()
            .join(format!("session_{}.json", now.format("%Y%m%d_%H%M%S")))
    }
}
