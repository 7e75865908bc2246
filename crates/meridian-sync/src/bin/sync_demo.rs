//! # Sync Engine Demo
//!
//! Walks the offline-first sync flow end to end against a scripted remote:
//! local writes, a sync cycle, a version conflict, an offline spell, and an
//! encrypted backup round trip.
//!
//! ## Usage
//! ```bash
//! # Run with the default data directory
//! cargo run -p meridian-sync --bin sync-demo
//!
//! # Keep demo state somewhere specific
//! cargo run -p meridian-sync --bin sync-demo -- --data-dir ./demo-data
//!
//! # Engine internals at debug level
//! RUST_LOG=meridian_sync=debug cargo run -p meridian-sync --bin sync-demo
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use meridian_core::{BackupKind, CloudSettings, ConnectionType, DeviceKind, DeviceRecord};
use meridian_store::OfflineStore;
use meridian_sync::config::{BACKUP_DIR_NAME, STORE_DOCUMENT_FILE};
use meridian_sync::{
    RuntimeConfig, ScriptedOutcome, ScriptedTransport, StaticProbe, SyncEngineBuilder,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut data_dir_arg: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" | "-d" => {
                if i + 1 < args.len() {
                    data_dir_arg = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Meridian POS Sync Demo");
                println!();
                println!("Usage: sync-demo [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --data-dir <PATH>  Where to keep the store and backups");
                println!("  -h, --help             Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = RuntimeConfig::load_or_default(None);
    if let Some(dir) = data_dir_arg {
        config.storage.data_dir = Some(dir);
    }
    let data_dir = config
        .data_dir()
        .unwrap_or_else(|| PathBuf::from("./meridian-data"));
    // Fixed fallback key so the backup scene runs without setup
    let key = config
        .key_bytes()?
        .unwrap_or(*b"meridian-demo-key-32-bytes-long!");

    println!("Meridian POS Sync Demo");
    println!("======================");
    println!("Device:   {} ({})", config.device.name, config.device.id);
    println!("Data dir: {}", data_dir.display());
    println!();

    // The remote is scripted and the link is simulated, so the demo runs
    // anywhere without a server.
    let store = Arc::new(
        OfflineStore::open(
            data_dir.join(STORE_DOCUMENT_FILE),
            config.device.id.clone(),
            CloudSettings::default(),
        )
        .await?,
    );
    let probe = Arc::new(StaticProbe::online(45));
    let transport = Arc::new(ScriptedTransport::new());
    let engine = SyncEngineBuilder::new(store, transport.clone(), probe.clone())
        .backups(data_dir.join(BACKUP_DIR_NAME), Some(key))
        .build()
        .await?;
    engine.connectivity().set_connection(ConnectionType::Wifi).await;

    engine
        .register_device(DeviceRecord::new(
            config.device.id.clone(),
            config.device.name.clone(),
            DeviceKind::Desktop,
            env::consts::OS,
            env!("CARGO_PKG_VERSION"),
            Utc::now(),
        ))
        .await;
    println!("✓ Engine assembled, link up over wifi");
    println!();

    // ----- Offline-first writes -------------------------------------------
    println!("[1] Local writes while the register is busy");
    engine
        .store()
        .save(
            "sale",
            "s-1001",
            json!({"total_cents": 1499, "lines": 2, "tender": "card"}),
            true,
        )
        .await?;
    engine
        .store()
        .save(
            "product",
            "p-204",
            json!({"sku": "BEV-204", "name": "Sparkling Water", "price_cents": 199}),
            true,
        )
        .await?;
    engine
        .store()
        .save(
            "customer",
            "c-88",
            json!({"name": "Dana Reyes", "loyalty_points": 320}),
            true,
        )
        .await?;
    let status = engine.status().await;
    println!("    {} uploads waiting in the queue", status.pending_uploads);
    println!();

    // ----- First sync cycle ------------------------------------------------
    println!("[2] Sync cycle drains the queue");
    let report = engine.start_sync().await?;
    println!(
        "    ✓ {} uploaded, {} failed",
        report.uploads_completed, report.failures
    );
    println!();

    // ----- A conflicting edit ----------------------------------------------
    println!("[3] Another terminal changed p-204 behind our back");
    transport.push_upload_outcome(
        "product",
        "p-204",
        ScriptedOutcome::Conflict {
            server_snapshot: json!({
                "sku": "BEV-204",
                "name": "Sparkling Water 6-pack",
                "price_cents": 549
            }),
            server_version: 7,
        },
    );
    engine
        .store()
        .save(
            "product",
            "p-204",
            json!({"sku": "BEV-204", "name": "Sparkling Water", "price_cents": 249}),
            true,
        )
        .await?;
    let report = engine.start_sync().await?;
    println!("    {} conflict detected", report.conflicts_detected);
    for conflict in engine.conflicts().await {
        match conflict.resolution {
            Some(choice) => println!(
                "    ✓ {}/{} resolved as {} by {}",
                conflict.entity_type,
                conflict.entity_id,
                choice,
                conflict.resolved_by.as_deref().unwrap_or("unknown")
            ),
            None => println!(
                "    ⚠ {}/{} still waiting for resolution",
                conflict.entity_type, conflict.entity_id
            ),
        }
    }
    if let Some(record) = engine.store().get("product", "p-204").await {
        println!(
            "    p-204 is now: {} (version {})",
            record.payload["name"], record.version
        );
    }
    println!();

    // ----- Losing the link -------------------------------------------------
    println!("[4] The uplink drops mid-shift");
    probe.set_online(false);
    engine
        .store()
        .save(
            "sale",
            "s-1002",
            json!({"total_cents": 825, "lines": 1, "tender": "cash"}),
            true,
        )
        .await?;
    match engine.start_sync().await {
        Ok(_) => println!("    unexpected: cycle ran while offline"),
        Err(e) => println!("    ✗ sync refused: {e}"),
    }
    let status = engine.status().await;
    println!(
        "    sale kept safe locally, {} upload still queued",
        status.pending_uploads
    );
    println!();

    // ----- Recovery --------------------------------------------------------
    println!("[5] Link restored");
    probe.set_online(true);
    let report = engine.start_sync().await?;
    println!(
        "    ✓ {} uploaded, queue is {}",
        report.uploads_completed,
        if engine.status().await.pending_uploads == 0 {
            "empty"
        } else {
            "not empty"
        }
    );
    println!();

    // ----- Backup round trip -----------------------------------------------
    println!("[6] Encrypted backup");
    let record = engine
        .create_backup(BackupKind::Full, Some("demo-checkpoint".into()))
        .await?;
    println!(
        "    ✓ {} -> {} bytes on disk, checksum {}...",
        record.name,
        record.stored_size_bytes,
        &record.checksum[..12]
    );
    let restored = engine.restore_backup(&record.id).await?;
    println!("    ✓ restore verified, {restored} records back in the store");
    println!();

    // ----- Wrap up ---------------------------------------------------------
    let status = engine.status().await;
    let window_start = Utc::now() - chrono::Duration::hours(1);
    let analytics = engine.analytics(window_start, Utc::now()).await;
    println!("Demo complete");
    println!(
        "  online: {}, last sync: {}",
        status.is_online,
        status
            .last_sync
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".into())
    );
    println!(
        "  operations: {} total, {} successful, {} conflicts",
        analytics.total_operations, analytics.successful_operations, analytics.conflicts_detected
    );
    println!("  notifications: {} unread", engine.unread_notifications().await);

    Ok(())
}
