//! In-memory hot store.
//!
//! Reference implementation of [`HotStore`] for tests and embedders
//! that bring their own durability. Records live in an ordered map so
//! age scans can page deterministically.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::traits::{HotStore, ScanPage};
use crate::archive::error::ArchiveResult;
use crate::archive::types::BillingRecord;

/// Hot store backed by an in-memory ordered map.
#[derive(Default)]
pub struct MemoryHotStore {
    records: RwLock<BTreeMap<String, BillingRecord>>,
}

impl MemoryHotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn get(&self, id: &str) -> ArchiveResult<Option<BillingRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn put(&self, record: &BillingRecord) -> ArchiveResult<()> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> ArchiveResult<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn scan_older_than(
        &self,
        cutoff: u64,
        cursor: Option<String>,
        limit: usize,
    ) -> ArchiveResult<ScanPage> {
        let records = self.records.read().await;

        let mut ids = Vec::with_capacity(limit);
        for (id, record) in records.iter() {
            if let Some(ref after) = cursor {
                if id <= after {
                    continue;
                }
            }
            if record.created_at < cutoff {
                ids.push(id.clone());
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
            "Hot scan: {} ids older than {} (cursor {:?})",
            ids.len(),
            cutoff,
            next_cursor
        );

        Ok(ScanPage { ids, next_cursor })
    }
}
