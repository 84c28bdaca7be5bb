//! Unified access router.
//!
//! The single entry point for client reads and writes. The router
//! consults the migration tracker to resolve which tier is canonical
//! for a record right now, and uses the tracker's compare-and-set as
//! its only coordination with in-flight migrations - it never talks to
//! the migration engine.
//!
//! Write policy against an in-flight migration: the write invalidates
//! the attempt (CAS to `Failed`) and lands in the hot store; the
//! migration is reattempted by a later scan. Records that already went
//! cold-canonical are reverse-migrated back to the hot tier first.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

use super::error::{ArchiveError, ArchiveResult};
use super::state_tracker::MigrationTracker;
use super::tiered_storage::{ColdStore, HotStore, RecordCache};
use super::types::{BillingRecord, MigrationState, StatePoint};
use crate::utils::retry::{backoff_with_jitter, call_store_with_retry, RetryPolicy};

/// Tuning for the router's bounded retries and cache behavior.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Attempts against a concurrently-advancing migration before
    /// surfacing `TemporarilyUnavailable`.
    pub max_retries: usize,

    /// Base backoff between conflict retries (ms).
    pub retry_base_delay_ms: u64,

    /// Backoff cap (ms).
    pub retry_max_delay_ms: u64,

    /// Per-call timeout for store adapter I/O.
    pub op_timeout: Duration,

    /// TTL for cache entries populated on cold-store hits.
    pub cache_ttl: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 1_000,
            op_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Tier-transparent read/write front end.
pub struct AccessRouter {
    hot: Arc<dyn HotStore>,
    cold: Arc<dyn ColdStore>,
    cache: Option<Arc<dyn RecordCache>>,
    tracker: Arc<MigrationTracker>,
    config: RouterConfig,
}

impl AccessRouter {
    pub fn new(
        hot: Arc<dyn HotStore>,
        cold: Arc<dyn ColdStore>,
        tracker: Arc<MigrationTracker>,
        config: RouterConfig,
    ) -> Self {
        Self {
            hot,
            cold,
            cache: None,
            tracker,
            config,
        }
    }

    /// Wire an optional read-through cache in front of the cold store.
    pub fn with_cache(mut self, cache: Arc<dyn RecordCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.max_retries,
            attempt_timeout: self.config.op_timeout,
            base_delay_ms: self.config.retry_base_delay_ms,
            max_delay_ms: self.config.retry_max_delay_ms,
        }
    }

    /// Clamp internal errors to the client-facing surface: everything
    /// that is not `NotFound` becomes `TemporarilyUnavailable`.
    fn client_error(id: &str, err: ArchiveError) -> ArchiveError {
        match err {
            ArchiveError::NotFound(_) | ArchiveError::TemporarilyUnavailable(_) => err,
            other => {
                error!("Internal error serving record {}: {}", id, other);
                ArchiveError::TemporarilyUnavailable(id.to_string())
            }
        }
    }

    /// Read a record from whichever tier is canonical for it.
    pub async fn read(&self, id: &str) -> ArchiveResult<BillingRecord> {
        self.read_inner(id)
            .await
            .map_err(|e| Self::client_error(id, e))
    }

    async fn read_inner(&self, id: &str) -> ArchiveResult<BillingRecord> {
        match self.tracker.get(id).await {
            // Cold tier is canonical once soft-flagged.
            StatePoint::Active(state) if state.cold_canonical() => self.read_cold(id).await,

            // Mid-migration (or failed attempt): the hot copy is still
            // the record of truth.
            StatePoint::Active(_) => match self.read_hot(id).await? {
                Some(record) => Ok(record),
                None => Err(ArchiveError::NotFound(id.to_string())),
            },

            // No entry: hot first; a miss falls back to cold, which
            // covers records whose tracker entry was cleared after a
            // completed deletion.
            StatePoint::None | StatePoint::Deleted => {
                if let Some(record) = self.read_hot(id).await? {
                    return Ok(record);
                }
                self.read_cold(id).await
            }
        }
    }

    async fn read_hot(&self, id: &str) -> ArchiveResult<Option<BillingRecord>> {
        call_store_with_retry(&self.retry_policy(), || async { self.hot.get(id).await }).await
    }

    async fn read_cold(&self, id: &str) -> ArchiveResult<BillingRecord> {
        if let Some(cache) = &self.cache {
            if let Some(record) = cache.get(id).await {
                debug!("Record {} served from cache", id);
                return Ok(record);
            }
        }

        let bytes =
            call_store_with_retry(&self.retry_policy(), || async { self.cold.get(id).await })
                .await?;

        match bytes {
            Some(bytes) => {
                let record = BillingRecord::from_canonical_bytes(&bytes)?;
                if let Some(cache) = &self.cache {
                    cache.set(&record, self.config.cache_ttl).await;
                }
                Ok(record)
            }
            None => Err(ArchiveError::NotFound(id.to_string())),
        }
    }

    /// Create or update a record. Routes around any in-flight
    /// migration so the write can never race a cross-tier copy.
    pub async fn write(
        &self,
        id: &str,
        payload: serde_json::Value,
        schema_version: u32,
    ) -> ArchiveResult<()> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let step = match self.tracker.get(id).await {
                // No migration (or an aborted one): plain hot write.
                StatePoint::None
                | StatePoint::Deleted
                | StatePoint::Active(MigrationState::Failed) => {
                    return self
                        .apply_hot_write(id, payload, schema_version)
                        .await
                        .map_err(|e| Self::client_error(id, e));
                }

                // Pre-flag migration in flight: invalidate the attempt
                // so it cannot flag a copy that misses this write.
                StatePoint::Active(
                    state @ (MigrationState::CopyPending | MigrationState::Verified),
                ) => {
                    self.tracker
                        .transition(
                            id,
                            StatePoint::Active(state),
                            StatePoint::Active(MigrationState::Failed),
                        )
                        .await
                }

                // Already cold-canonical: bring the record back to the
                // hot tier, then apply the write there.
                StatePoint::Active(
                    state @ (MigrationState::ArchivedSoftFlagged | MigrationState::PendingDelete),
                ) => self.reverse_migrate(id, state).await,
            };

            match step {
                Ok(()) => continue, // state changed; re-resolve and write
                Err(ArchiveError::Conflict { .. }) => {
                    // The migration advanced between our read and the
                    // CAS. Back off and retry a bounded number of
                    // times.
                    if attempt >= self.config.max_retries {
                        debug!(
                            "Record {} still contended after {} attempts",
                            id, attempt
                        );
                        return Err(ArchiveError::TemporarilyUnavailable(id.to_string()));
                    }
                    let backoff_ms = backoff_with_jitter(
                        attempt,
                        self.config.retry_base_delay_ms,
                        self.config.retry_max_delay_ms,
                    );
                    sleep(Duration::from_millis(backoff_ms)).await;
                }
                Err(e) => return Err(Self::client_error(id, e)),
            }
        }
    }

    async fn apply_hot_write(
        &self,
        id: &str,
        payload: serde_json::Value,
        schema_version: u32,
    ) -> ArchiveResult<()> {
        let now = chrono::Utc::now().timestamp() as u64;

        let record = match self.read_hot(id).await? {
            Some(mut existing) => {
                existing.payload = payload;
                existing.schema_version = schema_version;
                existing.last_modified_at = now;
                existing
            }
            None => BillingRecord::new(id, payload, schema_version, now),
        };

        call_store_with_retry(&self.retry_policy(), || async {
            self.hot.put(&record).await
        })
        .await?;

        // A cached cold copy must never shadow the fresh write.
        if let Some(cache) = &self.cache {
            cache.invalidate(id).await;
        }

        debug!("Record {} written to hot store", id);
        Ok(())
    }

    /// Copy the cold payload back into the hot store and reset the
    /// record to `NONE`. Mirrors forward migration without a delete
    /// phase; safe to re-execute at any point.
    async fn reverse_migrate(&self, id: &str, from_state: MigrationState) -> ArchiveResult<()> {
        let bytes =
            call_store_with_retry(&self.retry_policy(), || async { self.cold.get(id).await })
                .await?;

        let Some(bytes) = bytes else {
            // The tracker says cold-canonical but the archive has no
            // copy. Surfaced, never papered over.
            return Err(ArchiveError::StaleState {
                id: id.to_string(),
                detail: format!("state {} but cold store holds no copy", from_state),
            });
        };

        let record = BillingRecord::from_canonical_bytes(&bytes)?;

        // The hot store usually still holds this exact copy (soft-flag
        // keeps it); the put is an idempotent overwrite either way.
        call_store_with_retry(&self.retry_policy(), || async {
            self.hot.put(&record).await
        })
        .await?;

        self.tracker
            .transition(id, StatePoint::Active(from_state), StatePoint::None)
            .await?;

        if let Some(cache) = &self.cache {
            cache.invalidate(id).await;
        }

        info!("Record {} reverse-migrated to hot store", id);
        Ok(())
    }
}
