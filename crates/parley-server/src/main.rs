//! # parley-server
//!
//! Standalone host for the chat persistence service.  Opens the database and
//! attachment tree, repairs them with an immediate maintenance sweep and keeps
//! sweeping on schedule until Ctrl+C.  Transports embed [`ChatService`]
//! through the library crate.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_server::directory::MemoryDirectory;
use parley_server::maintenance::spawn_maintenance;
use parley_server::{ChatService, ServerConfig};
use parley_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let database = Database::open_at(&config.database_path)?;

    // No accounts are known without an embedding transport.
    let directory = Arc::new(MemoryDirectory::new());
    let service =
        Arc::new(ChatService::new(&config, database, directory.clone(), directory).await?);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let maintenance = spawn_maintenance(service.clone(), config.maintenance_interval);
    info!(
        interval_secs = config.maintenance_interval.as_secs(),
        "Maintenance sweep scheduled"
    );

    // -----------------------------------------------------------------------
    // 5. Run until shutdown
    // -----------------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");
    maintenance.abort();

    Ok(())
}
