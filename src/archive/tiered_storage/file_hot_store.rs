//! File-backed hot store.
//!
//! One JSON file per record under a base directory. This is the hot
//! adapter the CLI wires up, so a scan pass started from the command
//! line operates on data that survives the process.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::traits::{HotStore, ScanPage};
use crate::archive::error::ArchiveResult;
use crate::archive::types::BillingRecord;

/// Hot store keeping each record as `<id>.json` under `base_path`.
pub struct FileHotStore {
    base_path: PathBuf,
}

impl FileHotStore {
    pub async fn open(base_path: impl AsRef<Path>) -> ArchiveResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_path).await?;
        info!("Opened file hot store at {}", base_path.display());
        Ok(Self { base_path })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", id))
    }

    /// All record ids in lexical order.
    async fn list_ids(&self) -> ArchiveResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }

        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl HotStore for FileHotStore {
    async fn get(&self, id: &str) -> ArchiveResult<Option<BillingRecord>> {
        match tokio::fs::read(self.record_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, record: &BillingRecord) -> ArchiveResult<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(self.record_path(&record.id), bytes).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> ArchiveResult<bool> {
        match tokio::fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn scan_older_than(
        &self,
        cutoff: u64,
        cursor: Option<String>,
        limit: usize,
    ) -> ArchiveResult<ScanPage> {
        let all_ids = self.list_ids().await?;

        let mut ids = Vec::with_capacity(limit);
        for id in all_ids {
            if let Some(ref after) = cursor {
                if id.as_str() <= after.as_str() {
                    continue;
                }
            }
            let Some(record) = self.get(&id).await? else {
                continue;
            };
            if record.created_at < cutoff {
                ids.push(id);
                if ids.len() == limit {
                    break;
                }
            }
        }

        let next_cursor = if ids.len() == limit {
            ids.last().cloned()
        } else {
            None
        };

        debug!(
            "File hot scan: {} ids older than {} under {}",
            ids.len(),
            cutoff,
            self.base_path.display()
        );

        Ok(ScanPage { ids, next_cursor })
    }
}
