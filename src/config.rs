use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::TrackerOptions;
use crate::lock::DEFAULT_LOCK_WAIT;
use crate::notes::DEFAULT_MAX_CHUNK_BYTES;

/// Environment override for the config directory (used by tests and
/// containerised deployments).
pub const CONFIG_DIR_ENV: &str = "FICTRACKER_CONFIG_DIR";

pub const SERVER_CONFIG_FILE: &str = "server.json";

/// Get the config directory using platform-appropriate location.
///
/// - macOS: `~/Library/Application Support/fictracker/`
/// - Linux: `~/.config/fictracker/` (or `$XDG_CONFIG_HOME`)
/// - Windows: `%APPDATA%/fictracker/`
///
/// `FICTRACKER_CONFIG_DIR` wins when set. Falls back to `~/.fictracker/`
/// if no platform dir is available.
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .map(|d| d.join("fictracker"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".fictracker")
        })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError {
    let path = path.to_path_buf();
    move |source| ConfigError::Io { action, path, source }
}

/// Read `<config_dir>/<filename>`. A missing file yields `T::default()`
/// quietly; an unreadable or corrupt one is logged and also falls back, so a
/// bad edit never keeps the server from starting.
pub fn load_json_config<T: DeserializeOwned + Default>(filename: &str) -> T {
    let path = config_dir().join(filename);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), "config unreadable, using defaults: {e}");
            return T::default();
        }
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        tracing::error!(path = %path.display(), "config corrupt, using defaults: {e}");
        T::default()
    })
}

/// Write `<config_dir>/<filename>` through a sibling temp file and a rename,
/// so readers never observe a half-written file. Owner-only on Unix.
pub fn save_json_config<T: Serialize>(filename: &str, config: &T) -> Result<(), ConfigError> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir).map_err(io_error("Failed to create", &dir))?;

    let json = serde_json::to_vec_pretty(config)?;
    let target = dir.join(filename);
    let temp = dir.join(format!(".{filename}.{}.tmp", std::process::id()));

    let written = std::fs::write(&temp, &json)
        .map_err(io_error("Failed to write", &temp))
        .and_then(|()| restrict_permissions(&temp))
        .and_then(|()| std::fs::rename(&temp, &target).map_err(io_error("Failed to replace", &target)));
    if written.is_err() {
        let _ = std::fs::remove_file(&temp);
    }
    written
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(io_error("Failed to set permissions on", path))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Which backing store the server opens.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub store: StoreKind,
    /// SQLite file; `None` means `<config_dir>/tracker.db`.
    pub db_path: Option<PathBuf>,
    pub lock_wait_ms: u64,
    pub note_chunk_max: usize,
    pub status_cache_ttl_secs: u64,
    pub settings_cache_ttl_secs: u64,
    /// Origins allowed by CORS. Empty allows any origin, which is what
    /// userscripts running on the archive's own domain need.
    pub allowed_origins: Vec<String>,
    /// Initial value of the `compression_enabled` setting for a fresh store.
    pub compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let defaults = TrackerOptions::default();
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
            store: StoreKind::Sqlite,
            db_path: None,
            lock_wait_ms: DEFAULT_LOCK_WAIT.as_millis() as u64,
            note_chunk_max: DEFAULT_MAX_CHUNK_BYTES,
            status_cache_ttl_secs: defaults.status_ttl.as_secs(),
            settings_cache_ttl_secs: defaults.settings_ttl.as_secs(),
            allowed_origins: Vec::new(),
            compression: false,
        }
    }
}

impl ServerConfig {
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| config_dir().join("tracker.db"))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn tracker_options(&self) -> TrackerOptions {
        TrackerOptions {
            lock_wait: Duration::from_millis(self.lock_wait_ms),
            note_chunk_max: self.note_chunk_max.max(64),
            status_ttl: Duration::from_secs(self.status_cache_ttl_secs),
            settings_ttl: Duration::from_secs(self.settings_cache_ttl_secs),
        }
    }
}

pub fn load_server_config() -> ServerConfig {
    load_json_config(SERVER_CONFIG_FILE)
}

pub fn save_server_config(config: &ServerConfig) -> Result<(), ConfigError> {
    save_json_config(SERVER_CONFIG_FILE, config)
}
