use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use fictracker_lib::config::{self, StoreKind};

/// Sync backend for the archive tracker userscripts.
///
/// Settings come from `<config_dir>/server.json`; flags and environment
/// variables override them for this run.
#[derive(Parser, Debug)]
#[command(name = "fictracker", version, about)]
struct Args {
    /// Address to bind.
    #[arg(long, env = "FICTRACKER_BIND")]
    bind: Option<String>,

    #[arg(long, short, env = "FICTRACKER_PORT")]
    port: Option<u16>,

    /// SQLite database file.
    #[arg(long, env = "FICTRACKER_DB", conflicts_with = "memory")]
    db: Option<PathBuf>,

    /// Keep everything in memory (nothing survives a restart).
    #[arg(long)]
    memory: bool,

    /// How long a write waits for the store lock before giving up.
    #[arg(long, env = "FICTRACKER_LOCK_WAIT_MS")]
    lock_wait_ms: Option<u64>,

    /// Restrict CORS to these origins (repeatable). Default allows any.
    #[arg(long = "allowed-origin", env = "FICTRACKER_ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,

    /// Enable tag compression on a fresh store.
    #[arg(long)]
    compression: bool,

    /// Write the effective settings back to server.json and continue.
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fictracker_lib::init_logging();
    let args = Args::parse();

    let mut server_config = config::load_server_config();
    if let Some(bind) = args.bind {
        server_config.bind = bind;
    }
    if let Some(port) = args.port {
        server_config.port = port;
    }
    if let Some(db) = args.db {
        server_config.store = StoreKind::Sqlite;
        server_config.db_path = Some(db);
    }
    if args.memory {
        server_config.store = StoreKind::Memory;
    }
    if let Some(ms) = args.lock_wait_ms {
        server_config.lock_wait_ms = ms;
    }
    if !args.allowed_origins.is_empty() {
        server_config.allowed_origins = args.allowed_origins;
    }
    if args.compression {
        server_config.compression = true;
    }

    if args.save_config {
        config::save_server_config(&server_config).context("saving server config")?;
        tracing::info!("saved config to {}", config::config_dir().join(config::SERVER_CONFIG_FILE).display());
    }

    let state = fictracker_lib::build_state(server_config).context("opening tracker store")?;
    fictracker_lib::sync_http::start_server(state)
        .await
        .context("tracker API server failed")?;
    Ok(())
}
