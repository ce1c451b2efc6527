use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ServerConfig;
use crate::engine::Tracker;

/// Request counters for the `/health` endpoint.
pub(crate) struct RequestMetrics {
    pub(crate) reads: AtomicUsize,
    pub(crate) writes: AtomicUsize,
    pub(crate) errors: AtomicUsize,
}

impl RequestMetrics {
    pub(crate) const fn new() -> Self {
        Self {
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        }
    }

    pub(crate) fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "reads": self.reads.load(Ordering::Relaxed),
            "writes": self.writes.load(Ordering::Relaxed),
            "errors": self.errors.load(Ordering::Relaxed),
        })
    }
}

/// Shared state handed to every HTTP handler.
pub struct AppState {
    pub tracker: Arc<Tracker>,
    pub config: ServerConfig,
    pub(crate) metrics: RequestMetrics,
    /// Shutdown sender for the HTTP server. Send () to stop it gracefully.
    pub(crate) server_shutdown: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl AppState {
    pub fn new(tracker: Arc<Tracker>, config: ServerConfig) -> Self {
        Self {
            tracker,
            config,
            metrics: RequestMetrics::new(),
            server_shutdown: Mutex::new(None),
        }
    }

    /// Stop a running server started with [`crate::sync_http::start_server`].
    pub fn shutdown(&self) {
        if let Some(tx) = self.server_shutdown.lock().take() {
            let _ = tx.send(());
        }
    }
}
