//! Archival core - record lifecycle across hot and cold storage tiers.
//!
//! The access router is the only client-facing surface; the migration
//! engine is the only mover of cross-tier data. Both serialize
//! per-record actions through the state tracker's compare-and-set,
//! which pairs every transition with a durable consistency-log append.

pub mod access_router;
pub mod consistency_log;
pub mod error;
pub mod migration_engine;
pub mod state_tracker;
pub mod tiered_storage;
pub mod types;

// Re-export main types
pub use access_router::{AccessRouter, RouterConfig};
pub use consistency_log::{ConsistencyLog, FileConsistencyLog, MemoryConsistencyLog};
pub use error::{ArchiveError, ArchiveResult};
pub use migration_engine::{
    CleanupReport, EngineConfig, MigrateOutcome, MigrationEngine, ScanReport,
};
pub use state_tracker::{MigrationTracker, StaleStateReport};
pub use tiered_storage::{
    ColdStore, FileColdStore, FileHotStore, HotStore, MemoryHotStore, MokaRecordCache,
    RecordCache, ScanPage,
};
pub use types::{BillingRecord, ConsistencyLogEntry, MigrationState, StatePoint, TrackedState};
