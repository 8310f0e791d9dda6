//! Delivery engine: live-first relay with bounded store-and-forward
//! fallback.
//!
//! Live delivery and enqueue-fallback give at-least-once, best-effort
//! semantics without acknowledgements; the bounded pending queue trades
//! completeness for bounded memory under a permanently-offline peer.

use crate::error::ApiError;
use crate::protocol::{RelayMessage, ServerFrame};
use crate::state::RelayState;

/// Outcome of a relay call.
#[derive(Debug)]
pub struct RelayReceipt {
    pub delivered_to: Vec<String>,
    pub stored_for_offline: usize,
}

/// Relay an encrypted payload to its targets.
///
/// Validates before any side effect, refreshes the sender's last-seen,
/// resolves the target set (an explicit list is taken verbatim, otherwise
/// every other current member), then per target attempts live delivery and
/// falls back to the pending queue. The room counter is bumped once per
/// call. No room entry guard is held across a channel send: membership is
/// cloned out of the registry before the directory is touched.
pub fn relay(
    state: &RelayState,
    room_id: &str,
    from_device: &str,
    to_devices: &[String],
    encrypted_payload: &str,
) -> Result<RelayReceipt, ApiError> {
    if from_device.is_empty() || encrypted_payload.is_empty() {
        return Err(ApiError::Validation("Missing required fields".to_string()));
    }
    if !state.rooms.room_exists(room_id) {
        return Err(ApiError::NotFound("Room not found".to_string()));
    }

    state.rooms.touch_device(room_id, from_device);

    let targets: Vec<String> = if to_devices.is_empty() {
        state.rooms.members_except(room_id, from_device)
    } else {
        to_devices.to_vec()
    };

    let message = RelayMessage::new(from_device, encrypted_payload);

    let mut delivered_to = Vec::new();
    let mut stored_for_offline = 0;

    for target in &targets {
        if state
            .connections
            .try_send(target, ServerFrame::Relay(message.clone()))
        {
            delivered_to.push(target.clone());
        } else {
            state.rooms.enqueue_pending(room_id, target, message.clone());
            stored_for_offline += 1;
        }
    }

    state.rooms.record_relay(room_id);

    tracing::debug!(
        room = room_id,
        from = from_device,
        live = delivered_to.len(),
        stored = stored_for_offline,
        "Relayed payload"
    );

    Ok(RelayReceipt {
        delivered_to,
        stored_for_offline,
    })
}
