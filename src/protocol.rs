//! Wire types for the relay protocol.
//!
//! The relay speaks JSON over HTTP and over the per-device WebSocket
//! channel. All payloads are opaque to the relay — E2E encryption happens
//! client-side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Relayed envelope ──────────────────────────────────────────────────────────

/// An encrypted envelope relayed between devices. The relay never inspects
/// `encrypted_payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub from_device: String,
    pub encrypted_payload: String,
    pub timestamp: DateTime<Utc>,
    /// Derived from sender and creation time. Informally unique —
    /// diagnostics only, not a dedup key.
    pub message_id: String,
}

impl RelayMessage {
    pub fn new(from_device: &str, encrypted_payload: &str) -> Self {
        let now = Utc::now();
        Self {
            message_id: format!("{}_{}", from_device, now.timestamp()),
            from_device: from_device.to_string(),
            encrypted_payload: encrypted_payload.to_string(),
            timestamp: now,
        }
    }
}

// ── Channel frames ────────────────────────────────────────────────────────────

/// Application-level keepalive frames exchanged on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Keepalive {
    Ping,
    Pong,
}

/// Frames pushed to a device over its persistent channel. Untagged: a relay
/// envelope serializes as the message object itself, a keepalive as
/// `{"type":"pong"}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Relay(RelayMessage),
    Keepalive(Keepalive),
}

// ── HTTP request/response bodies ──────────────────────────────────────────────

/// Body of `POST /room/{room_id}/join`.
#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub success: bool,
    pub room_id: String,
    pub peer_count: usize,
}

/// Query string carrying the requesting device id (`?device_id=`).
#[derive(Debug, Deserialize)]
pub struct DeviceQuery {
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub device_id: String,
    pub device_name: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

/// Body of `POST /room/{room_id}/sync`. An empty `to_devices` list means
/// broadcast to every other room member.
#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub from_device: Option<String>,
    #[serde(default)]
    pub to_devices: Vec<String>,
    pub encrypted_payload: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub delivered_to: Vec<String>,
    pub stored_for_offline: usize,
}

/// One room's entry in the `GET /admin/rooms` listing.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub created_at: DateTime<Utc>,
    pub device_count: usize,
    pub message_count: u64,
    pub has_pending_messages: bool,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
