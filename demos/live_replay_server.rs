//! Live Replay Server - relays and archives game command streams
//!
//! Run with: cargo run --example live_replay_server -- [vault_dir] [live_delay_steps]
//!
//! Submitters connect and send `P/<game_id>/<name>.fafreplay\0` followed by
//! the replay stream; viewers send `G/<game_id>/<name>\0` and receive the
//! stream with the live delay applied. Finished games are archived under
//! `<vault_dir>/replay_vault`.
//!
//! ```text
//!   game client ──P──►┌──────────────────┐──G──► viewer
//!   game client ──P──►│  ReplayServer    │──G──► viewer
//!                     │   aggregator     │
//!                     │     │            │
//!                     │     ▼            │
//!                     │  ArchiveWriter   │
//!                     +──────│───────────+
//!                            ▼
//!                     vault/replay_vault/d4/d3/d2/d1/<id>.fafreplay
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use live_replay_server::storage::VaultLayout;
use live_replay_server::{MemoryMetadataStore, ReplayServer, ReplayServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("live_replay_server=info".parse()?),
        )
        .init();

    let vault_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("vault"));

    let mut config = ReplayServerConfig::default().vault(VaultLayout::under(&vault_dir));
    if let Some(delay) = std::env::args().nth(2) {
        config = config.live_delay_steps(delay.parse()?);
    }

    println!("Live Replay Server");
    println!("==================");
    println!("Listening on: {}", config.bind_addr);
    println!("Vault:        {}", vault_dir.display());
    println!("Live delay:   {} steps", config.aggregator.live_delay_steps);
    println!();
    println!("Press Ctrl+C to stop the server...");
    println!();

    let server = Arc::new(ReplayServer::new(config, MemoryMetadataStore::new()));

    // Print active games periodically
    let stats_server = Arc::clone(&server);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            ticker.tick().await;
            for stats in stats_server.stats() {
                println!(
                    "game {}: tick {} submitters {} viewers {}{}",
                    stats.game_id,
                    stats.current_tick,
                    stats.ingestion_count,
                    stats.delivery_count,
                    if stats.desynced { " (desynced)" } else { "" }
                );
            }
        }
    });

    // Run until Ctrl+C
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nShutting down...");
        }
    };
    if let Err(e) = server.run_until(shutdown).await {
        eprintln!("Server error: {}", e);
    }

    Ok(())
}
