//! Shared runtime state for atl-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The workflow engine
//! owns all business state; this module only holds handles to it and to the
//! realtime bus the SSE endpoint reads from.

use std::sync::Arc;
use std::time::Duration;

use atl_notify::{BroadcastRealtime, RealtimeEvent};
use atl_workflow::Workflow;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<Workflow>,
    /// Bus shared with the outbox dispatcher; SSE subscribers read from it.
    pub realtime: Arc<BroadcastRealtime>,
    pub build: BuildInfo,
    /// Hash of the configuration the daemon booted with, when loaded from files.
    pub config_hash: Option<String>,
}

impl AppState {
    pub fn new(workflow: Arc<Workflow>, realtime: Arc<BroadcastRealtime>) -> Self {
        Self {
            workflow,
            realtime,
            build: BuildInfo {
                service: "atl-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            config_hash: None,
        }
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE to every subscriber.
pub fn spawn_heartbeat(realtime: Arc<BroadcastRealtime>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            realtime.broadcast(RealtimeEvent::Heartbeat { ts_millis: ts });
        }
    });
}
