//! Frostline CLI - external trigger surface for the archival core.
//!
//! The core owns no timer; an external scheduler (cron, a systemd
//! timer, an orchestrator) invokes these subcommands on its own
//! cadence.

use anyhow::Result;
use std::sync::Arc;

use frostline::archive::{
    AccessRouter, ColdStore, FileColdStore, FileConsistencyLog, FileHotStore, HotStore,
    MigrationEngine, MigrationState, MigrationTracker, MokaRecordCache, RecordCache, StatePoint,
};
use frostline::config::ArchiveConfig;

const CONFIG_PATH: &str = "frostline.toml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        return Ok(());
    }

    let config = match ArchiveConfig::from_toml_file(CONFIG_PATH) {
        Ok(c) => {
            tracing::info!("Loaded config from {}", CONFIG_PATH);
            c
        }
        Err(_) => {
            tracing::info!("Using default config");
            ArchiveConfig::default()
        }
    };

    match args[1].as_str() {
        "scan" => {
            let system = System::build(&config).await?;
            let report = system.engine.run_scan_pass().await?;
            println!(
                "Scan pass: {} scanned, {} migrated, {} skipped, {} failed",
                report.scanned, report.migrated, report.skipped, report.failed
            );
        }
        "cleanup" => {
            let system = System::build(&config).await?;
            let report = system.engine.run_cleanup_pass().await?;
            println!(
                "Cleanup pass: {} examined, {} deleted, {} scheduled, {} verification failures, {} deferred",
                report.examined,
                report.deleted,
                report.scheduled,
                report.verification_failures,
                report.skipped
            );
        }
        "status" => {
            if args.len() < 3 {
                eprintln!("Usage: {} status <record_id>", args[0]);
                return Ok(());
            }
            let system = System::build(&config).await?;
            print_status(&system, &args[2]).await?;
        }
        "list" => {
            if args.len() < 3 {
                eprintln!(
                    "Usage: {} list <copy_pending|verified|archived_soft_flagged|pending_delete|failed>",
                    args[0]
                );
                return Ok(());
            }
            let Some(state) = MigrationState::parse(&args[2]) else {
                eprintln!("Unknown state '{}'", args[2]);
                return Ok(());
            };
            let system = System::build(&config).await?;
            let ids = system.tracker.list(state).await;
            println!("{} record(s) in {}:", ids.len(), state);
            for id in ids {
                println!("  {}", id);
            }
        }
        "stuck" => {
            let system = System::build(&config).await?;
            let now = chrono::Utc::now().timestamp() as u64;
            let stuck = system.tracker.stuck(config.stuck_grace_secs(), now).await;
            if stuck.is_empty() {
                println!("No stuck migrations");
            } else {
                println!("{} stuck migration(s):", stuck.len());
                for (id, entry) in stuck {
                    println!(
                        "  {} in {} since {} (attempt {})",
                        id, entry.state, entry.since, entry.attempt_id
                    );
                }
            }
        }
        "init-config" => {
            config.to_toml_file(CONFIG_PATH)?;
            println!("Wrote {}", CONFIG_PATH);
        }
        other => {
            eprintln!("Unknown command '{}'", other);
            print_usage(&args[0]);
        }
    }

    Ok(())
}

struct System {
    engine: MigrationEngine,
    router: AccessRouter,
    tracker: Arc<MigrationTracker>,
}

impl System {
    /// Wire the file-backed stores, recover the tracker from the
    /// consistency log, and demote attempts interrupted by a previous
    /// process.
    async fn build(config: &ArchiveConfig) -> Result<Self> {
        let hot: Arc<dyn HotStore> = Arc::new(FileHotStore::open(&config.hot_path).await?);
        let cold: Arc<dyn ColdStore> = Arc::new(FileColdStore::open(&config.cold_path).await?);
        let log = Arc::new(FileConsistencyLog::open(&config.log_path).await?);

        let (tracker, anomalies) = MigrationTracker::recover(log).await?;
        for anomaly in &anomalies {
            tracing::error!(
                "Stale state for record {}: {}",
                anomaly.record_id,
                anomaly.detail
            );
        }
        let tracker = Arc::new(tracker);

        let engine = MigrationEngine::new(
            Arc::clone(&hot),
            Arc::clone(&cold),
            Arc::clone(&tracker),
            config.engine_config(),
        );
        engine.recover_interrupted().await?;

        let cache: Arc<dyn RecordCache> = Arc::new(MokaRecordCache::new(config.cache_capacity));
        let router = AccessRouter::new(hot, cold, Arc::clone(&tracker), config.router_config())
            .with_cache(cache);

        Ok(Self {
            engine,
            router,
            tracker,
        })
    }
}

async fn print_status(system: &System, id: &str) -> Result<()> {
    match system.tracker.get_entry(id).await {
        Some(entry) => println!(
            "{}: {} since {} (attempt {})",
            id, entry.state, entry.since, entry.attempt_id
        ),
        None => println!("{}: no migration in flight", id),
    }

    match system.tracker.get(id).await {
        StatePoint::Active(state) if state.cold_canonical() => {
            println!("  canonical tier: cold");
        }
        StatePoint::Active(_) => println!("  canonical tier: hot"),
        StatePoint::None | StatePoint::Deleted => match system.router.read(id).await {
            Ok(record) => println!(
                "  readable (created_at {}, schema v{})",
                record.created_at, record.schema_version
            ),
            Err(e) => println!("  not readable: {}", e),
        },
    }

    Ok(())
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <command>", program);
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  scan              Run one scan-and-migrate pass");
    eprintln!("  cleanup           Run one deferred-delete cleanup pass");
    eprintln!("  status <id>       Show migration state for a record");
    eprintln!("  list <state>      List record ids in a migration state");
    eprintln!("  stuck             List migrations past the stuck grace window");
    eprintln!("  init-config       Write a default {}", CONFIG_PATH);
}
