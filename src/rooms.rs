//! Room registry: device rosters, pending queues, and the liveness sweep.
//!
//! Rooms are keyed by an opaque client-supplied id. Each room tracks its
//! member devices, a relay counter, and a bounded pending queue per offline
//! device. One DashMap entry per room gives room-level atomicity for every
//! mutation and snapshot; cross-room consistency is not promised.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::protocol::{PeerInfo, RelayMessage, RoomSummary};
use crate::state::RelayConfig;

/// Per-(room, device) membership record.
#[derive(Debug, Clone)]
pub struct DeviceMembership {
    pub device_name: String,
    /// Refreshed on join, rejoin, and any outgoing relay. Monotonically
    /// non-decreasing while the membership exists.
    pub last_seen: DateTime<Utc>,
    pub ip_address: String,
}

/// A sync room: roster plus bounded per-device pending queues.
#[derive(Debug)]
struct Room {
    created_at: DateTime<Utc>,
    devices: HashMap<String, DeviceMembership>,
    message_count: u64,
    pending: HashMap<String, Vec<RelayMessage>>,
}

impl Room {
    fn new() -> Self {
        Self {
            created_at: Utc::now(),
            devices: HashMap::new(),
            message_count: 0,
            pending: HashMap::new(),
        }
    }
}

/// Aggregate counts across the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStats {
    pub total_rooms: usize,
    pub total_devices: usize,
    pub total_messages_relayed: u64,
}

/// Process-wide room state. Owns rooms, memberships, and pending queues
/// exclusively; live connections are the directory's concern and are only
/// ever referenced by device id.
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
    config: RelayConfig,
}

impl RoomRegistry {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            config,
        }
    }

    /// Join a room, creating it if absent. Upserts the membership with a
    /// fresh last-seen and returns the number of *other* devices currently
    /// in the room (raw membership, no liveness filter).
    pub fn join(
        &self,
        room_id: &str,
        device_id: &str,
        device_name: &str,
        ip_address: &str,
    ) -> usize {
        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(Room::new);

        room.devices.insert(
            device_id.to_string(),
            DeviceMembership {
                device_name: device_name.to_string(),
                last_seen: Utc::now(),
                ip_address: ip_address.to_string(),
            },
        );

        tracing::info!(
            room = room_id,
            device = device_id,
            name = device_name,
            "Device joined room"
        );

        room.devices.len() - 1
    }

    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// List members other than the requester whose last activity falls
    /// within the peer-active window. Unknown room yields an empty list,
    /// not an error.
    pub fn peers(&self, room_id: &str, requesting_device_id: &str) -> Vec<PeerInfo> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - Duration::seconds(self.config.peer_active_window_secs);

        room.devices
            .iter()
            .filter(|(id, _)| id.as_str() != requesting_device_id)
            .filter(|(_, m)| m.last_seen > cutoff)
            .map(|(id, m)| PeerInfo {
                device_id: id.clone(),
                device_name: m.device_name.clone(),
                last_seen: m.last_seen,
            })
            .collect()
    }

    /// Current member ids minus the sender, for broadcast target
    /// resolution. Liveness is not required here.
    pub fn members_except(&self, room_id: &str, device_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|room| {
                room.devices
                    .keys()
                    .filter(|id| id.as_str() != device_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Refresh a membership's last-seen. No-op when the membership is gone.
    pub fn touch_device(&self, room_id: &str, device_id: &str) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            if let Some(membership) = room.devices.get_mut(device_id) {
                membership.last_seen = Utc::now();
            }
        }
    }

    /// Queue a message for an offline device, keeping only the most recent
    /// `max_pending_per_device` entries (overflow truncates from the
    /// front). Silently does nothing if the room vanished in a race with
    /// the sweeper — the caller already counts the message as stored.
    pub fn enqueue_pending(&self, room_id: &str, target_device_id: &str, message: RelayMessage) {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            tracing::debug!(
                room = room_id,
                device = target_device_id,
                "Room gone before enqueue, message dropped"
            );
            return;
        };

        let cap = self.config.max_pending_per_device;
        let queue = room.pending.entry(target_device_id.to_string()).or_default();
        queue.push(message);

        if queue.len() > cap {
            let excess = queue.len() - cap;
            queue.drain(..excess);
            tracing::warn!(
                room = room_id,
                device = target_device_id,
                dropped = excess,
                "Pending queue full, dropped oldest messages"
            );
        }
    }

    /// Remove and return every pending message for a device, in enqueue
    /// order. The queue is cleared whole, not message-by-message.
    pub fn drain_pending(&self, room_id: &str, device_id: &str) -> Vec<RelayMessage> {
        self.rooms
            .get_mut(room_id)
            .and_then(|mut room| room.pending.remove(device_id))
            .unwrap_or_default()
    }

    /// Bump the room's relay counter. Called once per relay call, not once
    /// per target.
    pub fn record_relay(&self, room_id: &str) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.message_count += 1;
        }
    }

    /// Per-room summaries for the admin listing. Each summary is a
    /// consistent view of one room.
    pub fn room_summaries(&self) -> Vec<RoomSummary> {
        self.rooms
            .iter()
            .map(|entry| RoomSummary {
                room_id: entry.key().clone(),
                created_at: entry.created_at,
                device_count: entry.devices.len(),
                message_count: entry.message_count,
                has_pending_messages: entry.pending.values().any(|q| !q.is_empty()),
            })
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total_rooms: self.rooms.len(),
            ..Default::default()
        };
        for room in self.rooms.iter() {
            stats.total_devices += room.devices.len();
            stats.total_messages_relayed += room.message_count;
        }
        stats
    }

    /// One liveness pass: evict memberships idle past the device TTL, then
    /// remove rooms that are empty and past the creation grace period.
    /// Candidates are collected during the scan and deleted afterwards;
    /// emptiness is re-checked atomically at delete time so a join racing
    /// the scan keeps its room.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let device_cutoff = now - Duration::seconds(self.config.device_ttl_secs);
        let room_cutoff = now - Duration::seconds(self.config.room_grace_secs);

        let mut stale_rooms = Vec::new();

        for mut entry in self.rooms.iter_mut() {
            let room_id = entry.key().clone();
            let room = entry.value_mut();

            let stale: Vec<String> = room
                .devices
                .iter()
                .filter(|(_, m)| m.last_seen < device_cutoff)
                .map(|(id, _)| id.clone())
                .collect();

            for device_id in stale {
                room.devices.remove(&device_id);
                tracing::info!(
                    room = room_id.as_str(),
                    device = device_id.as_str(),
                    "Evicted inactive device"
                );
            }

            if room.devices.is_empty() && room.created_at < room_cutoff {
                stale_rooms.push(room_id);
            }
        }

        for room_id in stale_rooms {
            let removed = self
                .rooms
                .remove_if(&room_id, |_, room| room.devices.is_empty());
            if removed.is_some() {
                tracing::info!(room = room_id.as_str(), "Removed stale empty room");
            }
        }
    }

    /// Test hook: rewind a membership's last-seen.
    #[cfg(test)]
    pub fn backdate_device(&self, room_id: &str, device_id: &str, age: Duration) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            if let Some(membership) = room.devices.get_mut(device_id) {
                membership.last_seen = Utc::now() - age;
            }
        }
    }

    /// Test hook: rewind a room's creation time.
    #[cfg(test)]
    pub fn backdate_room(&self, room_id: &str, age: Duration) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.created_at = Utc::now() - age;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(RelayConfig::default())
    }

    fn message(from: &str, payload: &str) -> RelayMessage {
        RelayMessage::new(from, payload)
    }

    #[test]
    fn join_creates_room_and_counts_others() {
        let rooms = registry();

        assert_eq!(rooms.join("r1", "alice", "Laptop", "10.0.0.1"), 0);
        assert_eq!(rooms.join("r1", "bob", "Phone", "10.0.0.2"), 1);
        assert!(rooms.room_exists("r1"));
        assert_eq!(rooms.room_count(), 1);
    }

    #[test]
    fn join_is_idempotent() {
        let rooms = registry();

        rooms.join("r1", "alice", "Laptop", "10.0.0.1");
        let peer_count = rooms.join("r1", "alice", "Laptop Renamed", "10.0.0.1");

        // Rejoin upserts, never duplicates.
        assert_eq!(peer_count, 0);
        assert_eq!(rooms.stats().total_devices, 1);

        let peers = rooms.peers("r1", "someone-else");
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].device_name, "Laptop Renamed");
    }

    #[test]
    fn peers_excludes_requester() {
        let rooms = registry();
        rooms.join("r1", "alice", "Laptop", "10.0.0.1");
        rooms.join("r1", "bob", "Phone", "10.0.0.2");

        let peers = rooms.peers("r1", "alice");
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].device_id, "bob");
    }

    #[test]
    fn peers_filters_inactive_devices() {
        let rooms = registry();
        rooms.join("r1", "alice", "Laptop", "10.0.0.1");
        rooms.join("r1", "recent", "Phone", "10.0.0.2");
        rooms.join("r1", "stale", "Tablet", "10.0.0.3");

        rooms.backdate_device("r1", "recent", Duration::minutes(9));
        rooms.backdate_device("r1", "stale", Duration::minutes(11));

        let peers = rooms.peers("r1", "alice");
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].device_id, "recent");
    }

    #[test]
    fn peers_unknown_room_is_empty_not_error() {
        let rooms = registry();
        assert!(rooms.peers("nope", "alice").is_empty());
    }

    #[test]
    fn touch_refreshes_last_seen() {
        let rooms = registry();
        rooms.join("r1", "alice", "Laptop", "10.0.0.1");
        rooms.join("r1", "bob", "Phone", "10.0.0.2");

        rooms.backdate_device("r1", "bob", Duration::minutes(11));
        assert!(rooms.peers("r1", "alice").is_empty());

        rooms.touch_device("r1", "bob");
        assert_eq!(rooms.peers("r1", "alice").len(), 1);
    }

    #[test]
    fn touch_unknown_membership_is_noop() {
        let rooms = registry();
        rooms.touch_device("nope", "alice");
        rooms.join("r1", "alice", "Laptop", "10.0.0.1");
        rooms.touch_device("r1", "ghost");
    }

    #[test]
    fn pending_queue_is_bounded_and_fifo() {
        let rooms = registry();
        rooms.join("r1", "alice", "Laptop", "10.0.0.1");

        for i in 0..55 {
            rooms.enqueue_pending("r1", "bob", message("alice", &format!("msg-{}", i)));
        }

        let drained = rooms.drain_pending("r1", "bob");
        assert_eq!(drained.len(), 50);
        // The 5 oldest were truncated; order is preserved.
        assert_eq!(drained[0].encrypted_payload, "msg-5");
        assert_eq!(drained[49].encrypted_payload, "msg-54");
    }

    #[test]
    fn drain_clears_the_whole_queue() {
        let rooms = registry();
        rooms.join("r1", "alice", "Laptop", "10.0.0.1");
        rooms.join("r1", "bob", "Phone", "10.0.0.2");

        rooms.enqueue_pending("r1", "bob", message("alice", "ct1"));
        assert_eq!(rooms.drain_pending("r1", "bob").len(), 1);

        // Bob is still a member, but a second drain yields nothing.
        assert!(rooms.drain_pending("r1", "bob").is_empty());
        assert_eq!(rooms.members_except("r1", "alice"), vec!["bob".to_string()]);
    }

    #[test]
    fn enqueue_to_missing_room_is_silent() {
        let rooms = registry();
        rooms.enqueue_pending("nope", "bob", message("alice", "ct"));
        assert!(rooms.drain_pending("nope", "bob").is_empty());
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn sweep_evicts_inactive_memberships() {
        let rooms = registry();
        rooms.join("r1", "active", "Laptop", "10.0.0.1");
        rooms.join("r1", "idle", "Phone", "10.0.0.2");

        rooms.backdate_device("r1", "active", Duration::minutes(59));
        rooms.backdate_device("r1", "idle", Duration::minutes(61));

        rooms.sweep(Utc::now());

        let stats = rooms.stats();
        assert_eq!(stats.total_devices, 1);
        assert!(rooms.members_except("r1", "").contains(&"active".to_string()));
    }

    #[test]
    fn sweep_removes_only_stale_empty_rooms() {
        let rooms = registry();

        rooms.join("young", "alice", "Laptop", "10.0.0.1");
        rooms.join("old", "alice", "Laptop", "10.0.0.1");

        // Both rooms empty out via eviction; only the 25h-old room goes.
        rooms.backdate_device("young", "alice", Duration::hours(2));
        rooms.backdate_device("old", "alice", Duration::hours(2));
        rooms.backdate_room("young", Duration::hours(23));
        rooms.backdate_room("old", Duration::hours(25));

        rooms.sweep(Utc::now());

        assert!(rooms.room_exists("young"));
        assert!(!rooms.room_exists("old"));
    }

    #[test]
    fn sweep_keeps_stale_room_with_members() {
        let rooms = registry();
        rooms.join("r1", "alice", "Laptop", "10.0.0.1");
        rooms.backdate_room("r1", Duration::hours(48));

        rooms.sweep(Utc::now());
        assert!(rooms.room_exists("r1"));
    }

    #[test]
    fn counter_and_summaries() {
        let rooms = registry();
        rooms.join("r1", "alice", "Laptop", "10.0.0.1");
        rooms.record_relay("r1");
        rooms.record_relay("r1");
        rooms.enqueue_pending("r1", "bob", message("alice", "ct"));

        let summaries = rooms.room_summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].room_id, "r1");
        assert_eq!(summaries[0].device_count, 1);
        assert_eq!(summaries[0].message_count, 2);
        assert!(summaries[0].has_pending_messages);

        let stats = rooms.stats();
        assert_eq!(stats.total_rooms, 1);
        assert_eq!(stats.total_messages_relayed, 2);
    }

    #[test]
    fn drained_room_reports_no_pending() {
        let rooms = registry();
        rooms.join("r1", "alice", "Laptop", "10.0.0.1");
        rooms.enqueue_pending("r1", "bob", message("alice", "ct"));
        rooms.drain_pending("r1", "bob");

        let summaries = rooms.room_summaries();
        assert!(!summaries[0].has_pending_messages);
    }
}
