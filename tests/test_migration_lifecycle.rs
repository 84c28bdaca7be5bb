//! End-to-end lifecycle tests: scan, grace period, cleanup.

use std::sync::Arc;
use std::time::Duration;

use frostline::archive::{
    ColdStore, EngineConfig, FileColdStore, HotStore, MemoryConsistencyLog, MemoryHotStore,
    MigrationEngine, MigrationState, MigrationTracker, StatePoint,
};
use frostline::BillingRecord;
use serde_json::json;

fn now() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

const THREE_MONTHS: u64 = 90 * 86_400;
const FOUR_MONTHS: u64 = 120 * 86_400;

fn create_test_record(id: &str, age_secs: u64) -> BillingRecord {
    BillingRecord::new(
        id,
        json!({"invoice": id, "amount_cents": 15_000, "currency": "EUR"}),
        3,
        now().saturating_sub(age_secs),
    )
}

struct Fixture {
    hot: Arc<MemoryHotStore>,
    cold: Arc<FileColdStore>,
    tracker: Arc<MigrationTracker>,
    engine: MigrationEngine,
}

async fn fixture(config: EngineConfig) -> Fixture {
    let hot = Arc::new(MemoryHotStore::new());
    let cold_path = format!("/tmp/frostline_lifecycle_{}", rand::random::<u64>());
    let cold = Arc::new(FileColdStore::open(&cold_path).await.unwrap());
    let tracker = Arc::new(MigrationTracker::new(Arc::new(MemoryConsistencyLog::new())));
    let engine = MigrationEngine::new(
        Arc::clone(&hot) as Arc<dyn HotStore>,
        Arc::clone(&cold) as Arc<dyn ColdStore>,
        Arc::clone(&tracker),
        config,
    );
    Fixture {
        hot,
        cold,
        tracker,
        engine,
    }
}

fn no_grace_config() -> EngineConfig {
    EngineConfig {
        age_threshold_secs: THREE_MONTHS,
        delete_grace_secs: 0,
        scan_batch_size: 50,
        step_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_four_month_old_record_completes_full_lifecycle() {
    let fx = fixture(no_grace_config()).await;

    let record = create_test_record("inv-2024-001", FOUR_MONTHS);
    let original_bytes = record.canonical_bytes().unwrap();
    fx.hot.put(&record).await.unwrap();

    // Migration pass: the record is age-eligible and gets archived.
    let scan = fx.engine.run_scan_pass().await.unwrap();
    assert_eq!(scan.migrated, 1);
    assert_eq!(
        fx.tracker.get("inv-2024-001").await,
        StatePoint::Active(MigrationState::ArchivedSoftFlagged)
    );

    // Grace period elapsed (zero here): first cleanup pass schedules
    // the delete, the next one executes it.
    fx.engine.run_cleanup_pass().await.unwrap();
    let cleanup = fx.engine.run_cleanup_pass().await.unwrap();
    assert_eq!(cleanup.deleted, 1);

    // Hot store no longer holds a copy; tracker entry is gone.
    assert!(fx.hot.get("inv-2024-001").await.unwrap().is_none());
    assert_eq!(fx.tracker.get("inv-2024-001").await, StatePoint::None);

    // Cold store returns the original payload unchanged.
    let archived = fx.cold.get("inv-2024-001").await.unwrap().unwrap();
    assert_eq!(archived, original_bytes);
}

#[tokio::test]
async fn test_young_records_are_never_touched() {
    let fx = fixture(no_grace_config()).await;

    let record = create_test_record("inv-recent", 86_400);
    fx.hot.put(&record).await.unwrap();

    let scan = fx.engine.run_scan_pass().await.unwrap();
    assert_eq!(scan.scanned, 0);

    fx.engine.run_cleanup_pass().await.unwrap();

    assert_eq!(fx.tracker.get("inv-recent").await, StatePoint::None);
    assert_eq!(fx.hot.get("inv-recent").await.unwrap(), Some(record));
    assert!(fx.cold.get("inv-recent").await.unwrap().is_none());
}

#[tokio::test]
async fn test_repeated_scan_passes_are_idempotent() {
    let fx = fixture(no_grace_config()).await;

    fx.hot
        .put(&create_test_record("inv-1", FOUR_MONTHS))
        .await
        .unwrap();

    let first = fx.engine.run_scan_pass().await.unwrap();
    assert_eq!(first.migrated, 1);

    // A second pass sees the record still in the hot store (cleanup
    // has not run) but already owned by a completed attempt.
    let second = fx.engine.run_scan_pass().await.unwrap();
    assert_eq!(second.migrated, 0);
    assert_eq!(second.skipped, 1);

    assert_eq!(
        fx.tracker.get("inv-1").await,
        StatePoint::Active(MigrationState::ArchivedSoftFlagged)
    );
}

#[tokio::test]
async fn test_grace_period_blocks_deletion() {
    let mut config = no_grace_config();
    config.delete_grace_secs = 7 * 86_400;
    let fx = fixture(config).await;

    fx.hot
        .put(&create_test_record("inv-1", FOUR_MONTHS))
        .await
        .unwrap();

    fx.engine.run_scan_pass().await.unwrap();
    let cleanup = fx.engine.run_cleanup_pass().await.unwrap();

    assert_eq!(cleanup.scheduled, 0);
    assert_eq!(cleanup.deleted, 0);
    // Hot copy survives for the whole grace window.
    assert!(fx.hot.get("inv-1").await.unwrap().is_some());
    assert_eq!(
        fx.tracker.get("inv-1").await,
        StatePoint::Active(MigrationState::ArchivedSoftFlagged)
    );
}

#[tokio::test]
async fn test_batched_scan_covers_all_pages() {
    let mut config = no_grace_config();
    config.scan_batch_size = 2;
    let fx = fixture(config).await;

    for i in 0..7 {
        fx.hot
            .put(&create_test_record(&format!("inv-{}", i), FOUR_MONTHS))
            .await
            .unwrap();
    }

    let scan = fx.engine.run_scan_pass().await.unwrap();
    assert_eq!(scan.scanned, 7);
    assert_eq!(scan.migrated, 7);

    for i in 0..7 {
        assert_eq!(
            fx.tracker.get(&format!("inv-{}", i)).await,
            StatePoint::Active(MigrationState::ArchivedSoftFlagged)
        );
    }
}
