//! Server state management.
//!
//! Holds the two shared registries (rooms and live connections) plus the
//! server configuration. `RelayState` is cheap to clone into handlers; the
//! registries are Arc-backed and internally concurrent.

use std::sync::Arc;
use std::time::Instant;

use crate::connections::ConnectionDirectory;
use crate::rooms::RoomRegistry;

/// Maximum pending messages stored per (room, device).
const DEFAULT_MAX_PENDING_PER_DEVICE: usize = 50;

/// Window in which a peer counts as active (10 minutes).
const DEFAULT_PEER_ACTIVE_WINDOW_SECS: i64 = 600;

/// Inactivity threshold before a membership is evicted (1 hour).
const DEFAULT_DEVICE_TTL_SECS: i64 = 3600;

/// Grace period an empty room survives past creation (24 hours).
const DEFAULT_ROOM_GRACE_SECS: i64 = 24 * 3600;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub max_pending_per_device: usize,
    pub peer_active_window_secs: i64,
    pub device_ttl_secs: i64,
    pub room_grace_secs: i64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_pending_per_device: DEFAULT_MAX_PENDING_PER_DEVICE,
            peer_active_window_secs: DEFAULT_PEER_ACTIVE_WINDOW_SECS,
            device_ttl_secs: DEFAULT_DEVICE_TTL_SECS,
            room_grace_secs: DEFAULT_ROOM_GRACE_SECS,
        }
    }
}

/// Shared server state.
#[derive(Clone)]
pub struct RelayState {
    /// Room registry: rosters, counters, pending queues.
    pub rooms: Arc<RoomRegistry>,

    /// Connection directory: at most one live channel per device.
    pub connections: Arc<ConnectionDirectory>,

    /// Server configuration.
    pub config: RelayConfig,

    /// Process start time, for the admin uptime counter.
    started_at: Instant,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            rooms: Arc::new(RoomRegistry::new(config.clone())),
            connections: Arc::new(ConnectionDirectory::new()),
            config,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
