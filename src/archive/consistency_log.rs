//! Append-only consistency log.
//!
//! Every migration state transition is recorded here before it becomes
//! visible in the tracker map. The log is the durable source of truth:
//! after a crash the tracker is rebuilt by replaying it in write order.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::error::{ArchiveError, ArchiveResult};
use super::types::ConsistencyLogEntry;

/// Durable, replayable transition log.
#[async_trait]
pub trait ConsistencyLog: Send + Sync {
    /// Append one entry. Must be durable before returning.
    async fn append(&self, entry: &ConsistencyLogEntry) -> ArchiveResult<()>;

    /// All entries in write order.
    async fn replay(&self) -> ArchiveResult<Vec<ConsistencyLogEntry>>;
}

/// File-backed log: one JSON object per line, fsynced per append.
pub struct FileConsistencyLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileConsistencyLog {
    /// Open (or create) the log at `path`, creating parent directories
    /// as needed.
    pub async fn open(path: impl AsRef<Path>) -> ArchiveResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!("Opened consistency log at {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl ConsistencyLog for FileConsistencyLog {
    async fn append(&self, entry: &ConsistencyLogEntry) -> ArchiveResult<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.sync_data().await?;

        debug!(
            "Logged transition {} -> {} for record {}",
            entry.from_state, entry.to_state, entry.record_id
        );
        Ok(())
    }

    async fn replay(&self) -> ArchiveResult<Vec<ConsistencyLogEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ArchiveError::from(e)),
        };

        let mut entries = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ConsistencyLogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    // A torn final line after a crash is expected; the
                    // transition it described never became visible.
                    warn!(
                        "Skipping unparseable log line {} in {}: {}",
                        line_no + 1,
                        self.path.display(),
                        e
                    );
                }
            }
        }

        Ok(entries)
    }
}

/// In-memory log for tests and embedders that manage durability
/// themselves.
#[derive(Default)]
pub struct MemoryConsistencyLog {
    entries: RwLock<Vec<ConsistencyLogEntry>>,
}

impl MemoryConsistencyLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with a prior history, e.g. to simulate recovery from a log
    /// truncated mid-migration.
    pub fn with_entries(entries: Vec<ConsistencyLogEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[async_trait]
impl ConsistencyLog for MemoryConsistencyLog {
    async fn append(&self, entry: &ConsistencyLogEntry) -> ArchiveResult<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn replay(&self) -> ArchiveResult<Vec<ConsistencyLogEntry>> {
        Ok(self.entries.read().await.clone())
    }
}
