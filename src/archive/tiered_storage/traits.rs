//! Store adapter traits - the narrow interfaces the archival core
//! consumes.
//!
//! The physical drivers behind these traits are external collaborators.
//! The core never assumes more than the operations declared here; the
//! file- and memory-backed implementations in this module exist so the
//! engine, router, and CLI are exercisable end to end.

use async_trait::async_trait;
use std::time::Duration;

use crate::archive::error::ArchiveResult;
use crate::archive::types::BillingRecord;

/// One page of an age-bounded hot-store scan.
#[derive(Debug, Clone)]
pub struct ScanPage {
    /// Record ids older than the requested cutoff, in stable order.
    pub ids: Vec<String>,

    /// Opaque cursor for the next page; `None` when exhausted.
    pub next_cursor: Option<String>,
}

/// Mutable store holding recent records.
#[async_trait]
pub trait HotStore: Send + Sync {
    /// Fetch a record by id. Returns `None` if this store has no copy.
    async fn get(&self, id: &str) -> ArchiveResult<Option<BillingRecord>>;

    /// Insert or overwrite a record.
    async fn put(&self, record: &BillingRecord) -> ArchiveResult<()>;

    /// Remove a record. Returns whether a copy existed.
    async fn delete(&self, id: &str) -> ArchiveResult<bool>;

    /// Page through ids of records created before `cutoff` (epoch
    /// seconds). `cursor` is the `next_cursor` of the previous page.
    async fn scan_older_than(
        &self,
        cutoff: u64,
        cursor: Option<String>,
        limit: usize,
    ) -> ArchiveResult<ScanPage>;
}

/// Immutable archive store. Holds canonical bytes plus a content
/// digest so copies can be verified without a full read on the caller
/// side.
#[async_trait]
pub trait ColdStore: Send + Sync {
    /// Write the canonical bytes for a record. Overwriting an existing
    /// copy with identical content must succeed (replay case).
    async fn put(&self, id: &str, bytes: &[u8]) -> ArchiveResult<()>;

    /// Fetch the canonical bytes. Returns `None` if never archived.
    async fn get(&self, id: &str) -> ArchiveResult<Option<Vec<u8>>>;

    /// Check the stored copy against an expected SHA-256 hex digest.
    /// Returns `false` when absent or mismatched.
    async fn verify(&self, id: &str, expected_digest: &str) -> ArchiveResult<bool>;
}

/// Optional read-through cache in front of the cold store. Cache
/// operations are best-effort and infallible; a miss is never an
/// error.
#[async_trait]
pub trait RecordCache: Send + Sync {
    async fn get(&self, id: &str) -> Option<BillingRecord>;

    async fn set(&self, record: &BillingRecord, ttl: Duration);

    /// Drop a cached copy. Required before a record is mutated or
    /// reverse-migrated so no stale cold read can be served.
    async fn invalidate(&self, id: &str);
}
