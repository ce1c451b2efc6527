pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod notes;
pub mod protocol;
pub(crate) mod state;
pub mod store;
pub mod sync_http;
pub mod tags;

use std::sync::Arc;

use crate::config::{ServerConfig, StoreKind};
use crate::engine::Tracker;
use crate::store::{MemoryStore, SqliteStore, TrackerStore};

pub use state::AppState;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fictracker=info,fictracker_lib=info,tower_http=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Open the backing store named by the config.
pub fn open_store(config: &ServerConfig) -> error::Result<Arc<dyn TrackerStore>> {
    Ok(match config.store {
        StoreKind::Memory => {
            tracing::warn!("using in-memory store; data is lost on exit");
            Arc::new(MemoryStore::new())
        }
        StoreKind::Sqlite => {
            let path = config.db_path();
            tracing::info!("opening store at {}", path.display());
            Arc::new(SqliteStore::open(&path)?)
        }
    })
}

/// Open the store, wrap it in a tracker and seed the compression setting
/// on a fresh store.
pub fn build_state(config: ServerConfig) -> error::Result<Arc<AppState>> {
    let store = open_store(&config)?;
    let tracker = Arc::new(Tracker::new(store, config.tracker_options()));
    if config.compression && !tracker.settings()?.contains_key(store::SETTING_COMPRESSION) {
        tracker.set_compression(true)?;
    }
    Ok(Arc::new(AppState::new(tracker, config)))
}
