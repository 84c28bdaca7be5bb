//! Core data model: billing records, migration states, and
//! consistency-log entries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::error::ArchiveResult;

/// A billing record. Mutable while young and hot; immutable once its
/// canonical copy moves to the cold tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRecord {
    /// Immutable primary key.
    pub id: String,

    /// Versioned schema blob.
    pub payload: serde_json::Value,

    /// Schema version of the payload.
    pub schema_version: u32,

    /// Creation time (epoch seconds). Age tier derives from this.
    pub created_at: u64,

    /// Last mutation time (epoch seconds).
    pub last_modified_at: u64,
}

impl BillingRecord {
    pub fn new(id: &str, payload: serde_json::Value, schema_version: u32, now: u64) -> Self {
        Self {
            id: id.to_string(),
            payload,
            schema_version,
            created_at: now,
            last_modified_at: now,
        }
    }

    /// Age in seconds relative to `now`. Not stored, always computed.
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    /// Whether the record is old enough to be archived.
    pub fn archive_eligible(&self, now: u64, threshold_secs: u64) -> bool {
        self.age_secs(now) > threshold_secs
    }

    /// Canonical byte representation used for cold storage and hashing.
    pub fn canonical_bytes(&self) -> ArchiveResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// SHA-256 hex digest of the canonical bytes.
    pub fn payload_digest(&self) -> ArchiveResult<String> {
        Ok(digest_bytes(&self.canonical_bytes()?))
    }

    /// Decode a record from its canonical cold-store bytes.
    pub fn from_canonical_bytes(bytes: &[u8]) -> ArchiveResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// SHA-256 hex digest of arbitrary bytes.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Active (non-terminal) migration states. `NONE` and `DELETED` are
/// modeled as the absence of a tracker entry; see [`StatePoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Claimed for migration; copy and verify not yet confirmed.
    CopyPending,
    /// Cold copy verified against the hot-store digest.
    Verified,
    /// Cold tier is now canonical; hot copy retained but read-only.
    ArchivedSoftFlagged,
    /// Scheduled for hot-copy deletion once the grace period elapses.
    PendingDelete,
    /// Attempt aborted; eligible for a fresh claim on the next scan.
    Failed,
}

impl MigrationState {
    /// True once the cold store holds the canonical copy.
    pub fn cold_canonical(&self) -> bool {
        matches!(
            self,
            MigrationState::ArchivedSoftFlagged | MigrationState::PendingDelete
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::CopyPending => "copy_pending",
            MigrationState::Verified => "verified",
            MigrationState::ArchivedSoftFlagged => "archived_soft_flagged",
            MigrationState::PendingDelete => "pending_delete",
            MigrationState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "copy_pending" => Some(MigrationState::CopyPending),
            "verified" => Some(MigrationState::Verified),
            "archived_soft_flagged" => Some(MigrationState::ArchivedSoftFlagged),
            "pending_delete" => Some(MigrationState::PendingDelete),
            "failed" => Some(MigrationState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point in a record's migration lifecycle, including the two
/// states that carry no tracker entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatePoint {
    /// No migration in progress (no tracker entry).
    None,
    /// Migration in progress.
    Active(MigrationState),
    /// Hot copy deleted, migration complete (entry removed).
    Deleted,
}

impl StatePoint {
    /// Whether this point keeps an entry in the tracker map.
    pub fn is_tracked(&self) -> bool {
        matches!(self, StatePoint::Active(_))
    }
}

impl fmt::Display for StatePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatePoint::None => f.write_str("none"),
            StatePoint::Active(s) => f.write_str(s.as_str()),
            StatePoint::Deleted => f.write_str("deleted"),
        }
    }
}

/// Tracker entry for a record with a migration in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedState {
    pub state: MigrationState,

    /// Epoch seconds the state was entered. Anchors grace-period and
    /// stuck-migration checks.
    pub since: u64,

    /// Identifier shared by all transitions of one migration attempt.
    pub attempt_id: String,
}

/// Append-only, immutable record of one state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyLogEntry {
    pub record_id: String,
    pub from_state: StatePoint,
    pub to_state: StatePoint,
    pub timestamp: u64,
    pub attempt_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_record(id: &str, created_at: u64) -> BillingRecord {
        BillingRecord {
            id: id.to_string(),
            payload: json!({"amount_cents": 1250, "currency": "USD"}),
            schema_version: 2,
            created_at,
            last_modified_at: created_at,
        }
    }

    #[test]
    fn test_age_and_eligibility() {
        let record = create_test_record("inv-1", 1_000);
        assert_eq!(record.age_secs(4_000), 3_000);
        assert!(record.archive_eligible(4_000, 2_000));
        assert!(!record.archive_eligible(2_500, 2_000));
        // Age exactly at the threshold is not eligible.
        assert!(!record.archive_eligible(3_000, 2_000));
    }

    #[test]
    fn test_digest_is_stable_and_content_sensitive() {
        let a = create_test_record("inv-1", 1_000);
        let b = create_test_record("inv-1", 1_000);
        assert_eq!(a.payload_digest().unwrap(), b.payload_digest().unwrap());

        let mut c = create_test_record("inv-1", 1_000);
        c.payload = json!({"amount_cents": 9999, "currency": "USD"});
        assert_ne!(a.payload_digest().unwrap(), c.payload_digest().unwrap());
    }

    #[test]
    fn test_canonical_round_trip() {
        let record = create_test_record("inv-7", 5_000);
        let bytes = record.canonical_bytes().unwrap();
        let decoded = BillingRecord::from_canonical_bytes(&bytes).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn test_state_parse_round_trip() {
        for state in [
            MigrationState::CopyPending,
            MigrationState::Verified,
            MigrationState::ArchivedSoftFlagged,
            MigrationState::PendingDelete,
            MigrationState::Failed,
        ] {
            assert_eq!(MigrationState::parse(state.as_str()), Some(state));
        }
        assert_eq!(MigrationState::parse("nonsense"), None);
    }

    #[test]
    fn test_cold_canonical_boundary() {
        assert!(!MigrationState::CopyPending.cold_canonical());
        assert!(!MigrationState::Verified.cold_canonical());
        assert!(MigrationState::ArchivedSoftFlagged.cold_canonical());
        assert!(MigrationState::PendingDelete.cold_canonical());
        assert!(!MigrationState::Failed.cold_canonical());
    }
}
