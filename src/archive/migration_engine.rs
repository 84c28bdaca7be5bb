//! Archival migration engine.
//!
//! Moves age-eligible records from the hot store to the cold store
//! with a two-phase copy-verify-flag-delete protocol. Every step is
//! idempotent and serialized per record through the tracker's
//! compare-and-set, so crashes, retries, and concurrent writes cannot
//! lose or duplicate data.
//!
//! The engine owns no timer: `run_scan_pass` and `run_cleanup_pass`
//! are idempotent passes an external scheduler (or the CLI) triggers
//! on its own cadence.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::{ArchiveError, ArchiveResult};
use super::state_tracker::MigrationTracker;
use super::tiered_storage::{ColdStore, HotStore};
use super::types::{digest_bytes, MigrationState, StatePoint};

/// Tuning for scan and cleanup passes.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Records older than this are eligible for archival (seconds).
    pub age_threshold_secs: u64,

    /// Time a record stays soft-flagged before its hot copy may be
    /// scheduled for deletion (seconds). Rollback is cheap within this
    /// window.
    pub delete_grace_secs: u64,

    /// Page size for the hot-store eligibility scan.
    pub scan_batch_size: usize,

    /// Per-step timeout for store I/O; exceeding it counts as a
    /// transient failure.
    pub step_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            age_threshold_secs: 90 * 86_400, // 3 months
            delete_grace_secs: 7 * 86_400,   // 7 days
            scan_batch_size: 100,
            step_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of one per-record migration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateOutcome {
    /// Record reached `ArchivedSoftFlagged`.
    Migrated,
    /// Another actor owns the record, or the attempt was invalidated
    /// by a concurrent write; nothing to do here.
    Skipped,
    /// Attempt aborted; record left in `Failed` for the next scan.
    Failed,
}

/// Summary of one scan-and-migrate pass.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub scanned: usize,
    pub migrated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Summary of one deferred-delete cleanup pass.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// `PendingDelete` entries examined.
    pub examined: usize,
    /// Hot copies removed; migrations completed.
    pub deleted: usize,
    /// Cold copies that failed re-verification (hot copy kept).
    pub verification_failures: usize,
    /// Entries left for a later pass (transient failures).
    pub skipped: usize,
    /// Soft-flagged entries promoted to `PendingDelete` after grace.
    pub scheduled: usize,
}

/// Background mover of records between tiers. The only writer of
/// cross-tier data movement in the system.
pub struct MigrationEngine {
    hot: Arc<dyn HotStore>,
    cold: Arc<dyn ColdStore>,
    tracker: Arc<MigrationTracker>,
    config: EngineConfig,
}

impl MigrationEngine {
    pub fn new(
        hot: Arc<dyn HotStore>,
        cold: Arc<dyn ColdStore>,
        tracker: Arc<MigrationTracker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            hot,
            cold,
            tracker,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply the per-step timeout to one store operation.
    async fn step<T, F>(&self, what: &str, fut: F) -> ArchiveResult<T>
    where
        F: Future<Output = ArchiveResult<T>>,
    {
        match tokio::time::timeout(self.config.step_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ArchiveError::TransientIo(format!(
                "{} timed out after {:?}",
                what, self.config.step_timeout
            ))),
        }
    }

    /// Demote in-flight attempts (`CopyPending`, `Verified`) left over
    /// from a previous process to `Failed` so the next scan can reclaim
    /// them. Call once after tracker recovery, before serving traffic.
    pub async fn recover_interrupted(&self) -> ArchiveResult<usize> {
        let mut demoted = 0;

        for state in [MigrationState::CopyPending, MigrationState::Verified] {
            for id in self.tracker.list(state).await {
                match self
                    .tracker
                    .transition(&id, StatePoint::Active(state), StatePoint::Active(MigrationState::Failed))
                    .await
                {
                    Ok(()) => {
                        warn!("Record {} had an interrupted attempt in {}; marked failed", id, state);
                        demoted += 1;
                    }
                    Err(ArchiveError::Conflict { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        if demoted > 0 {
            info!("Recovered {} interrupted migration attempts", demoted);
        }
        Ok(demoted)
    }

    /// One scan-and-migrate pass: page through age-eligible hot
    /// records and run the migration protocol on each.
    pub async fn run_scan_pass(&self) -> ArchiveResult<ScanReport> {
        let now = chrono::Utc::now().timestamp() as u64;
        let cutoff = now.saturating_sub(self.config.age_threshold_secs);

        let mut report = ScanReport::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .step(
                    "hot scan",
                    self.hot
                        .scan_older_than(cutoff, cursor.clone(), self.config.scan_batch_size),
                )
                .await?;

            for id in &page.ids {
                report.scanned += 1;
                match self.migrate_record(id).await {
                    Ok(MigrateOutcome::Migrated) => report.migrated += 1,
                    Ok(MigrateOutcome::Skipped) => report.skipped += 1,
                    Ok(MigrateOutcome::Failed) => report.failed += 1,
                    Err(e) => {
                        warn!("Migration of record {} errored: {}", id, e);
                        report.failed += 1;
                    }
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(
            "Scan pass complete: {} scanned, {} migrated, {} skipped, {} failed",
            report.scanned, report.migrated, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Run the per-record migration protocol: claim, copy, verify,
    /// soft-flag. Safe to re-execute at any point; a replayed cold
    /// write with a matching digest is treated as success.
    pub async fn migrate_record(&self, id: &str) -> ArchiveResult<MigrateOutcome> {
        // Step 1: claim via CAS. Only NONE and FAILED are claimable.
        let claim_from = match self.tracker.get(id).await {
            StatePoint::None => StatePoint::None,
            StatePoint::Active(MigrationState::Failed) => {
                StatePoint::Active(MigrationState::Failed)
            }
            other => {
                debug!("Record {} already in {}; skipping", id, other);
                return Ok(MigrateOutcome::Skipped);
            }
        };

        match self
            .tracker
            .transition(id, claim_from, StatePoint::Active(MigrationState::CopyPending))
            .await
        {
            Ok(()) => {}
            Err(ArchiveError::Conflict { .. }) => {
                debug!("Record {} claimed by another worker; skipping", id);
                return Ok(MigrateOutcome::Skipped);
            }
            Err(e) => return Err(e),
        }

        match self.copy_and_flag(id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                match &e {
                    ArchiveError::VerificationFailed(_) => {
                        error!("Cold copy of record {} failed verification; attempt aborted", id)
                    }
                    other => warn!("Migration attempt for record {} aborted: {}", id, other),
                }
                self.abort_attempt(id).await;
                Ok(MigrateOutcome::Failed)
            }
        }
    }

    /// Steps 2-5: copy to cold, verify, mark verified, soft-flag.
    async fn copy_and_flag(&self, id: &str) -> ArchiveResult<MigrateOutcome> {
        // Step 2: read the full record from the hot store.
        let record = match self.step("hot get", self.hot.get(id)).await? {
            Some(record) => record,
            None => {
                // The hot copy vanished under our claim. Release it;
                // the record is either already archived or gone.
                self.tracker
                    .transition(
                        id,
                        StatePoint::Active(MigrationState::CopyPending),
                        StatePoint::None,
                    )
                    .await?;
                debug!("Record {} disappeared from hot store during claim", id);
                return Ok(MigrateOutcome::Skipped);
            }
        };

        let bytes = record.canonical_bytes()?;
        let digest = digest_bytes(&bytes);

        // Write to cold storage unless an identical copy already
        // exists (crash replay).
        let replayed = self.step("cold verify", self.cold.verify(id, &digest)).await?;
        if replayed {
            debug!("Record {} already has a matching cold copy", id);
        } else {
            self.step("cold put", self.cold.put(id, &bytes)).await?;
        }

        // Step 3: verify the written copy against the source digest.
        if !self.step("cold verify", self.cold.verify(id, &digest)).await? {
            return Err(ArchiveError::VerificationFailed(id.to_string()));
        }

        // Step 4: record the verified copy. A conflict here means a
        // concurrent write invalidated the attempt; stand down.
        match self
            .tracker
            .transition(
                id,
                StatePoint::Active(MigrationState::CopyPending),
                StatePoint::Active(MigrationState::Verified),
            )
            .await
        {
            Ok(()) => {}
            Err(ArchiveError::Conflict { .. }) => {
                debug!("Record {} was written during migration; attempt abandoned", id);
                return Ok(MigrateOutcome::Skipped);
            }
            Err(e) => return Err(e),
        }

        // Step 5: the cold copy becomes canonical. The hot copy stays
        // behind, read-only, until the cleanup pass removes it.
        match self
            .tracker
            .transition(
                id,
                StatePoint::Active(MigrationState::Verified),
                StatePoint::Active(MigrationState::ArchivedSoftFlagged),
            )
            .await
        {
            Ok(()) => {}
            Err(ArchiveError::Conflict { .. }) => {
                debug!("Record {} was written after verification; attempt abandoned", id);
                return Ok(MigrateOutcome::Skipped);
            }
            Err(e) => return Err(e),
        }

        info!("Record {} archived to cold storage (digest {})", id, digest);
        Ok(MigrateOutcome::Migrated)
    }

    /// Best-effort demotion of an aborted attempt to `Failed`. The
    /// attempt may sit in `CopyPending` or `Verified` depending on how
    /// far it got; a conflict on both means another actor took over.
    async fn abort_attempt(&self, id: &str) {
        for state in [MigrationState::CopyPending, MigrationState::Verified] {
            match self
                .tracker
                .transition(
                    id,
                    StatePoint::Active(state),
                    StatePoint::Active(MigrationState::Failed),
                )
                .await
            {
                Ok(()) => return,
                Err(ArchiveError::Conflict { .. }) => continue,
                Err(e) => {
                    warn!("Could not record failed attempt for record {}: {}", id, e);
                    return;
                }
            }
        }
    }

    /// One cleanup pass: complete deletions already scheduled, then
    /// schedule soft-flagged records whose grace period has elapsed.
    pub async fn run_cleanup_pass(&self) -> ArchiveResult<CleanupReport> {
        let now = chrono::Utc::now().timestamp() as u64;
        let mut report = CleanupReport::default();

        // Entries scheduled by an earlier pass: re-verify and delete.
        for id in self.tracker.list(MigrationState::PendingDelete).await {
            report.examined += 1;
            match self.cleanup_record(&id).await {
                Ok(()) => report.deleted += 1,
                Err(ArchiveError::VerificationFailed(_)) => report.verification_failures += 1,
                Err(e) => {
                    warn!("Cleanup of record {} deferred: {}", id, e);
                    report.skipped += 1;
                }
            }
        }

        // Soft-flagged entries past the grace window move into the
        // delete pipeline for the NEXT pass; rollback stays cheap for
        // the whole grace period.
        for id in self.tracker.list(MigrationState::ArchivedSoftFlagged).await {
            let Some(entry) = self.tracker.get_entry(&id).await else {
                continue;
            };
            if now.saturating_sub(entry.since) >= self.config.delete_grace_secs {
                match self
                    .tracker
                    .transition(
                        &id,
                        StatePoint::Active(MigrationState::ArchivedSoftFlagged),
                        StatePoint::Active(MigrationState::PendingDelete),
                    )
                    .await
                {
                    Ok(()) => report.scheduled += 1,
                    Err(ArchiveError::Conflict { .. }) => {} // reverse migration raced us
                    Err(e) => return Err(e),
                }
            }
        }

        info!(
            "Cleanup pass complete: {} deleted, {} scheduled, {} verification failures, {} deferred",
            report.deleted, report.scheduled, report.verification_failures, report.skipped
        );
        Ok(report)
    }

    /// Finish one scheduled deletion: re-verify cold integrity,
    /// delete the hot copy, record the terminal transition.
    async fn cleanup_record(&self, id: &str) -> ArchiveResult<()> {
        let digest = match self.step("hot get", self.hot.get(id)).await? {
            Some(record) => record.payload_digest()?,
            None => {
                // Crash happened after the hot delete but before the
                // terminal transition; finish the bookkeeping.
                self.tracker
                    .transition(
                        id,
                        StatePoint::Active(MigrationState::PendingDelete),
                        StatePoint::Deleted,
                    )
                    .await?;
                debug!("Record {} hot copy already gone; completing migration", id);
                return Ok(());
            }
        };

        if !self.step("cold verify", self.cold.verify(id, &digest)).await? {
            error!(
                "Cold copy of record {} failed re-verification; keeping hot copy",
                id
            );
            self.tracker
                .transition(
                    id,
                    StatePoint::Active(MigrationState::PendingDelete),
                    StatePoint::Active(MigrationState::Failed),
                )
                .await?;
            return Err(ArchiveError::VerificationFailed(id.to_string()));
        }

        self.step("hot delete", self.hot.delete(id)).await?;
        self.tracker
            .transition(
                id,
                StatePoint::Active(MigrationState::PendingDelete),
                StatePoint::Deleted,
            )
            .await?;

        info!("Record {} hot copy deleted; migration complete", id);
        Ok(())
    }
}
