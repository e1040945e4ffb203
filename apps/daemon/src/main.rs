//! # mapcache
//!
//! Daemon and administration tool for the map cache.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           mapcache                                      │
//! │                                                                         │
//! │  mapcache.toml + MAPCACHE_* ───► MapCacheConfig                        │
//! │                                       │                                 │
//! │                                       ▼                                 │
//! │                                 Database (SQLite)                       │
//! │                                       │                                 │
//! │        ┌──────────────────────────────┼──────────────────────┐          │
//! │        ▼                              ▼                      ▼          │
//! │  run: MapCacheService          populate: trigger     map/enable/...    │
//! │  until Ctrl-C / SIGTERM        exit 1 on failure     repository        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod cli;
mod commands;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mapcache_db::{migrations::migration_status, Database, DbConfig, MapCacheRepository};
use mapcache_sync::{CacheSynchronizer, MapCacheConfig, MapCacheService};

use crate::cli::{Cli, Commands};

const DEFAULT_LOG_FILTER: &str = "info,mapcache=debug,sqlx=warn";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = MapCacheConfig::load(cli.config.clone())?;
    let db = open_database(&config).await?;
    let migrations = migration_status(db.pool()).await?;
    info!(total = migrations.0, applied = migrations.1, "Database ready");

    let repo = MapCacheRepository::new(Arc::new(db.clone()));

    let result = match cli.command {
        Commands::Run => run(config, db.clone()).await,
        Commands::Populate { key, value, device } => {
            let synchronizer = CacheSynchronizer::new(Arc::new(db.clone()));
            commands::populate(synchronizer, &key, &value, &device).await
        }
        Commands::Map(command) => commands::map(&repo, command).await,
        Commands::Enable => commands::set_enabled(&repo, true).await,
        Commands::Disable => commands::set_enabled(&repo, false).await,
        Commands::Workers { count } => commands::set_workers(&repo, count).await,
        Commands::Status { json } => commands::status(&repo, migrations, json).await,
    };

    db.close().await;
    result
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn open_database(config: &MapCacheConfig) -> Result<Database> {
    let db_config = if config.database.is_in_memory() {
        DbConfig::in_memory()
    } else {
        let path = std::path::Path::new(&config.database.path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        DbConfig::new(path).max_connections(config.database.max_connections)
    };

    Ok(Database::new(db_config).await?)
}

async fn run(config: MapCacheConfig, db: Database) -> Result<()> {
    let mut service = MapCacheService::builder(Arc::new(db))
        .with_config(config)
        .build()?;

    service.start().await?;
    info!("mapcache running, press Ctrl-C to stop");

    shutdown_signal().await;

    service.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
