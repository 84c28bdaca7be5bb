//! Migration state tracker.
//!
//! Single source of truth for "who may act on this record now". All
//! per-record serialization in the system goes through the
//! compare-and-set `transition` here; neither the engine nor the
//! router holds any other lock.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::consistency_log::ConsistencyLog;
use super::error::{ArchiveError, ArchiveResult};
use super::types::{ConsistencyLogEntry, MigrationState, StatePoint, TrackedState};

/// Replay anomaly: a logged transition whose `from` did not match the
/// state reconstructed so far. Surfaced for operator review, never
/// silently resolved.
#[derive(Debug, Clone)]
pub struct StaleStateReport {
    pub record_id: String,
    pub detail: String,
}

/// Per-record migration state map, backed by the consistency log.
///
/// Holds one entry per record with a migration in flight; absence of
/// an entry means `NONE`. Mutated through [`transition`] only.
///
/// [`transition`]: MigrationTracker::transition
pub struct MigrationTracker {
    entries: RwLock<HashMap<String, TrackedState>>,
    log: Arc<dyn ConsistencyLog>,
}

impl MigrationTracker {
    /// Create an empty tracker over a fresh log.
    pub fn new(log: Arc<dyn ConsistencyLog>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            log,
        }
    }

    /// Rebuild the tracker by replaying the log in write order. The
    /// last entry per record determines its current state; transitions
    /// to `none` or `deleted` clear the entry. Returns the tracker
    /// together with any replay anomalies.
    pub async fn recover(
        log: Arc<dyn ConsistencyLog>,
    ) -> ArchiveResult<(Self, Vec<StaleStateReport>)> {
        let replayed = log.replay().await?;
        let mut entries: HashMap<String, TrackedState> = HashMap::new();
        let mut anomalies = Vec::new();

        for entry in &replayed {
            let current = entries
                .get(&entry.record_id)
                .map(|t| StatePoint::Active(t.state))
                .unwrap_or(StatePoint::None);

            if current != entry.from_state {
                anomalies.push(StaleStateReport {
                    record_id: entry.record_id.clone(),
                    detail: format!(
                        "log transition {} -> {} found record in state {}",
                        entry.from_state, entry.to_state, current
                    ),
                });
            }

            match entry.to_state {
                StatePoint::Active(state) => {
                    entries.insert(
                        entry.record_id.clone(),
                        TrackedState {
                            state,
                            since: entry.timestamp,
                            attempt_id: entry.attempt_id.clone(),
                        },
                    );
                }
                StatePoint::None | StatePoint::Deleted => {
                    entries.remove(&entry.record_id);
                }
            }
        }

        info!(
            "Recovered migration tracker: {} entries from {} log records, {} anomalies",
            entries.len(),
            replayed.len(),
            anomalies.len()
        );

        Ok((
            Self {
                entries: RwLock::new(entries),
                log,
            },
            anomalies,
        ))
    }

    /// Current state point for a record.
    pub async fn get(&self, id: &str) -> StatePoint {
        self.entries
            .read()
            .await
            .get(id)
            .map(|t| StatePoint::Active(t.state))
            .unwrap_or(StatePoint::None)
    }

    /// Full tracker entry, if one exists.
    pub async fn get_entry(&self, id: &str) -> Option<TrackedState> {
        self.entries.read().await.get(id).cloned()
    }

    /// Compare-and-set transition. Fails with `Conflict` when the
    /// current state does not match `expected_from`; the log append
    /// and the map update happen inside one exclusive critical
    /// section, so a successful return means both took effect.
    pub async fn transition(
        &self,
        id: &str,
        expected_from: StatePoint,
        to: StatePoint,
    ) -> ArchiveResult<()> {
        let mut entries = self.entries.write().await;

        let current_entry = entries.get(id);
        let current = current_entry
            .map(|t| StatePoint::Active(t.state))
            .unwrap_or(StatePoint::None);

        if current != expected_from {
            debug!(
                "Transition conflict for record {}: expected {}, found {}",
                id, expected_from, current
            );
            return Err(ArchiveError::Conflict {
                id: id.to_string(),
                expected: expected_from.to_string(),
                found: current.to_string(),
            });
        }

        // A fresh claim starts a new attempt; every later step of the
        // same attempt carries its id forward.
        let attempt_id = match current_entry {
            Some(entry) => entry.attempt_id.clone(),
            None => format!("{:016x}", rand::random::<u64>()),
        };

        let now = chrono::Utc::now().timestamp() as u64;
        let log_entry = ConsistencyLogEntry {
            record_id: id.to_string(),
            from_state: expected_from,
            to_state: to,
            timestamp: now,
            attempt_id: attempt_id.clone(),
        };

        // Durable first; the map only changes once the log holds the
        // transition.
        self.log.append(&log_entry).await?;

        match to {
            StatePoint::Active(state) => {
                entries.insert(
                    id.to_string(),
                    TrackedState {
                        state,
                        since: now,
                        attempt_id,
                    },
                );
            }
            StatePoint::None | StatePoint::Deleted => {
                entries.remove(id);
            }
        }

        debug!("Record {} transitioned {} -> {}", id, expected_from, to);
        Ok(())
    }

    /// Ids currently in the given state.
    pub async fn list(&self, state: MigrationState) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, t)| t.state == state)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Entries that have sat in a non-terminal state beyond the grace
    /// window. These are surfaced for operator review, not advanced.
    pub async fn stuck(&self, grace_secs: u64, now: u64) -> Vec<(String, TrackedState)> {
        let mut found: Vec<(String, TrackedState)> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, t)| now.saturating_sub(t.since) > grace_secs)
            .map(|(id, t)| (id.clone(), t.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));

        for (id, entry) in &found {
            warn!(
                "Record {} stuck in {} since {} (attempt {})",
                id, entry.state, entry.since, entry.attempt_id
            );
        }
        found
    }

    /// Number of tracked (in-flight) records.
    pub async fn tracked_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::consistency_log::MemoryConsistencyLog;

    fn tracker() -> MigrationTracker {
        MigrationTracker::new(Arc::new(MemoryConsistencyLog::new()))
    }

    #[tokio::test]
    async fn test_transition_and_get() {
        let tracker = tracker();

        assert_eq!(tracker.get("inv-1").await, StatePoint::None);

        tracker
            .transition(
                "inv-1",
                StatePoint::None,
                StatePoint::Active(MigrationState::CopyPending),
            )
            .await
            .unwrap();

        assert_eq!(
            tracker.get("inv-1").await,
            StatePoint::Active(MigrationState::CopyPending)
        );
    }

    #[tokio::test]
    async fn test_cas_conflict_on_wrong_expectation() {
        let tracker = tracker();

        tracker
            .transition(
                "inv-1",
                StatePoint::None,
                StatePoint::Active(MigrationState::CopyPending),
            )
            .await
            .unwrap();

        let err = tracker
            .transition(
                "inv-1",
                StatePoint::None,
                StatePoint::Active(MigrationState::CopyPending),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ArchiveError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_claim_exactly_one_wins() {
        let tracker = Arc::new(tracker());

        let a = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                tracker
                    .transition(
                        "inv-1",
                        StatePoint::None,
                        StatePoint::Active(MigrationState::CopyPending),
                    )
                    .await
            })
        };
        let b = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                tracker
                    .transition(
                        "inv-1",
                        StatePoint::None,
                        StatePoint::Active(MigrationState::CopyPending),
                    )
                    .await
            })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(ArchiveError::Conflict { .. })))
            .count();

        assert_eq!(wins, 1);
        assert_eq!(conflicts, 1);
    }

    #[tokio::test]
    async fn test_attempt_id_carried_through_attempt() {
        let tracker = tracker();

        tracker
            .transition(
                "inv-1",
                StatePoint::None,
                StatePoint::Active(MigrationState::CopyPending),
            )
            .await
            .unwrap();
        let claim_attempt = tracker.get_entry("inv-1").await.unwrap().attempt_id;

        tracker
            .transition(
                "inv-1",
                StatePoint::Active(MigrationState::CopyPending),
                StatePoint::Active(MigrationState::Verified),
            )
            .await
            .unwrap();
        let verify_attempt = tracker.get_entry("inv-1").await.unwrap().attempt_id;

        assert_eq!(claim_attempt, verify_attempt);
    }

    #[tokio::test]
    async fn test_deleted_clears_entry() {
        let tracker = tracker();

        tracker
            .transition(
                "inv-1",
                StatePoint::None,
                StatePoint::Active(MigrationState::PendingDelete),
            )
            .await
            .unwrap();
        tracker
            .transition(
                "inv-1",
                StatePoint::Active(MigrationState::PendingDelete),
                StatePoint::Deleted,
            )
            .await
            .unwrap();

        assert_eq!(tracker.get("inv-1").await, StatePoint::None);
        assert_eq!(tracker.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn test_recovery_last_entry_wins() {
        let log = Arc::new(MemoryConsistencyLog::new());
        let tracker = MigrationTracker::new(Arc::clone(&log) as Arc<dyn ConsistencyLog>);

        tracker
            .transition(
                "inv-1",
                StatePoint::None,
                StatePoint::Active(MigrationState::CopyPending),
            )
            .await
            .unwrap();
        tracker
            .transition(
                "inv-1",
                StatePoint::Active(MigrationState::CopyPending),
                StatePoint::Active(MigrationState::Verified),
            )
            .await
            .unwrap();

        let (recovered, anomalies) =
            MigrationTracker::recover(log as Arc<dyn ConsistencyLog>).await.unwrap();

        assert!(anomalies.is_empty());
        assert_eq!(
            recovered.get("inv-1").await,
            StatePoint::Active(MigrationState::Verified)
        );
    }

    #[tokio::test]
    async fn test_recovery_surfaces_stale_state() {
        use crate::archive::types::ConsistencyLogEntry;

        // Log claims Verified -> ArchivedSoftFlagged for a record the
        // replay never saw reach Verified.
        let log = Arc::new(MemoryConsistencyLog::with_entries(vec![ConsistencyLogEntry {
            record_id: "inv-1".to_string(),
            from_state: StatePoint::Active(MigrationState::Verified),
            to_state: StatePoint::Active(MigrationState::ArchivedSoftFlagged),
            timestamp: 100,
            attempt_id: "a1".to_string(),
        }]));

        let (recovered, anomalies) =
            MigrationTracker::recover(log as Arc<dyn ConsistencyLog>).await.unwrap();

        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].record_id, "inv-1");
        // Last entry still wins for the reconstructed map.
        assert_eq!(
            recovered.get("inv-1").await,
            StatePoint::Active(MigrationState::ArchivedSoftFlagged)
        );
    }

    #[tokio::test]
    async fn test_stuck_detection_respects_grace() {
        use crate::archive::types::ConsistencyLogEntry;

        let log = Arc::new(MemoryConsistencyLog::with_entries(vec![ConsistencyLogEntry {
            record_id: "inv-old".to_string(),
            from_state: StatePoint::None,
            to_state: StatePoint::Active(MigrationState::CopyPending),
            timestamp: 1_000,
            attempt_id: "a1".to_string(),
        }]));
        let (tracker, _) =
            MigrationTracker::recover(log as Arc<dyn ConsistencyLog>).await.unwrap();

        // Within grace: nothing stuck.
        assert!(tracker.stuck(3_600, 2_000).await.is_empty());

        // Past grace: surfaced.
        let stuck = tracker.stuck(3_600, 10_000).await;
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].0, "inv-old");
    }

    #[tokio::test]
    async fn test_list_by_state() {
        let tracker = tracker();

        tracker
            .transition(
                "inv-b",
                StatePoint::None,
                StatePoint::Active(MigrationState::CopyPending),
            )
            .await
            .unwrap();
        tracker
            .transition(
                "inv-a",
                StatePoint::None,
                StatePoint::Active(MigrationState::CopyPending),
            )
            .await
            .unwrap();

        assert_eq!(
            tracker.list(MigrationState::CopyPending).await,
            vec!["inv-a".to_string(), "inv-b".to_string()]
        );
        assert!(tracker.list(MigrationState::Verified).await.is_empty());
    }
}
