//! Read-through record cache backed by moka.
//!
//! Sits in front of the cold store only; hot reads never touch it.
//! TTL is per entry, carried with the cached value.

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::traits::RecordCache;
use crate::archive::types::BillingRecord;

#[derive(Clone)]
struct CachedRecord {
    record: Arc<BillingRecord>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CachedRecord> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedRecord,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Moka-backed cache adapter with per-entry TTL.
pub struct MokaRecordCache {
    cache: Cache<String, CachedRecord>,
}

impl MokaRecordCache {
    /// Create a cache bounded to `max_capacity` records.
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    /// Create with default capacity (10,000 records).
    pub fn with_default_capacity() -> Self {
        Self::new(10_000)
    }

    /// Run pending cache maintenance tasks. Useful after batch
    /// operations in tests.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub async fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl RecordCache for MokaRecordCache {
    async fn get(&self, id: &str) -> Option<BillingRecord> {
        let hit = self.cache.get(id).await;
        if hit.is_some() {
            debug!("Cache hit for record {}", id);
        }
        hit.map(|c| (*c.record).clone())
    }

    async fn set(&self, record: &BillingRecord, ttl: Duration) {
        self.cache
            .insert(
                record.id.clone(),
                CachedRecord {
                    record: Arc::new(record.clone()),
                    ttl,
                },
            )
            .await;
    }

    async fn invalidate(&self, id: &str) {
        self.cache.invalidate(id).await;
    }
}
