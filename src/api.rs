//! HTTP route handlers.
//!
//! Thin boundary layer: extract and validate, call into the registries or
//! the delivery engine, shape the JSON response.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::delivery;
use crate::error::ApiError;
use crate::handler;
use crate::protocol::{
    DeviceQuery, JoinRequest, JoinResponse, PeersResponse, SyncRequest, SyncResponse,
};
use crate::state::RelayState;

/// `GET /` and `GET /health`.
pub async fn health(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
        "active_rooms": state.rooms.room_count(),
        "active_connections": state.connections.active_count(),
    }))
}

/// `POST /room/{room_id}/join`.
pub async fn join_room(
    State(state): State<RelayState>,
    Path(room_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, ApiError> {
    let device_id = req
        .device_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::Validation("device_id required".to_string()))?;
    let device_name = req.device_name.unwrap_or_else(|| "unknown".to_string());

    let peer_count = state
        .rooms
        .join(&room_id, &device_id, &device_name, &addr.ip().to_string());

    Ok(Json(JoinResponse {
        success: true,
        room_id,
        peer_count,
    }))
}

/// `GET /room/{room_id}/peers?device_id=`.
pub async fn get_peers(
    State(state): State<RelayState>,
    Path(room_id): Path<String>,
    Query(query): Query<DeviceQuery>,
) -> Json<PeersResponse> {
    let device_id = query.device_id.unwrap_or_default();
    Json(PeersResponse {
        peers: state.rooms.peers(&room_id, &device_id),
    })
}

/// `POST /room/{room_id}/sync`.
pub async fn relay_sync(
    State(state): State<RelayState>,
    Path(room_id): Path<String>,
    Json(req): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, ApiError> {
    let from_device = req.from_device.unwrap_or_default();
    let encrypted_payload = req.encrypted_payload.unwrap_or_default();

    let receipt = delivery::relay(
        &state,
        &room_id,
        &from_device,
        &req.to_devices,
        &encrypted_payload,
    )?;

    Ok(Json(SyncResponse {
        success: true,
        delivered_to: receipt.delivered_to,
        stored_for_offline: receipt.stored_for_offline,
    }))
}

/// `GET /room/{room_id}/ws?device_id=` — upgrade to the persistent channel.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
    Path(room_id): Path<String>,
    Query(query): Query<DeviceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let device_id = query
        .device_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::Validation("device_id required".to_string()))?;

    Ok(ws.on_upgrade(move |socket| handler::handle_channel(socket, state, room_id, device_id)))
}

/// `GET /admin/rooms`.
pub async fn admin_rooms(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({ "rooms": state.rooms.room_summaries() }))
}

/// `GET /admin/stats`.
pub async fn admin_stats(State(state): State<RelayState>) -> impl IntoResponse {
    let stats = state.rooms.stats();
    Json(json!({
        "total_rooms": stats.total_rooms,
        "total_devices": stats.total_devices,
        "active_connections": state.connections.active_count(),
        "total_messages_relayed": stats.total_messages_relayed,
        "uptime_seconds": state.uptime_seconds(),
    }))
}
