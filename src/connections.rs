//! Connection directory: at most one live channel per device.
//!
//! Registering a new channel for a device supersedes the old one — dropping
//! the superseded sender ends that channel task's loop, which closes its
//! socket. Unregistration is guarded by a per-connection id so a stale
//! cleanup can never evict a newer connection.

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerFrame;

/// Sender half of a device's persistent channel.
pub type ChannelSender = mpsc::UnboundedSender<ServerFrame>;

/// A registered live connection.
#[derive(Clone)]
pub struct LiveConnection {
    pub conn_id: Uuid,
    pub sender: ChannelSender,
}

impl LiveConnection {
    pub fn new(sender: ChannelSender) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            sender,
        }
    }
}

#[derive(Default)]
pub struct ConnectionDirectory {
    inner: DashMap<String, LiveConnection>,
}

impl ConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a device's live channel, returning any superseded entry.
    pub fn register(&self, device_id: &str, conn: LiveConnection) -> Option<LiveConnection> {
        tracing::info!(device = device_id, "Channel registered");
        self.inner.insert(device_id.to_string(), conn)
    }

    /// Remove the device's entry only if it still belongs to `conn_id`.
    pub fn unregister(&self, device_id: &str, conn_id: Uuid) {
        let removed = self
            .inner
            .remove_if(device_id, |_, conn| conn.conn_id == conn_id);
        if removed.is_some() {
            tracing::info!(device = device_id, "Channel unregistered");
        }
    }

    /// Push a frame to a device's live channel. Returns false when the
    /// device has no channel or the channel is closed; a closed channel is
    /// dropped from the directory on the spot.
    pub fn try_send(&self, device_id: &str, frame: ServerFrame) -> bool {
        let Some(conn) = self.inner.get(device_id).map(|c| c.value().clone()) else {
            return false;
        };

        if conn.sender.send(frame).is_ok() {
            true
        } else {
            tracing::warn!(device = device_id, "Live channel closed, dropping stale entry");
            self.unregister(device_id, conn.conn_id);
            false
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.len()
    }
}
