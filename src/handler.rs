//! Per-device persistent channel task.
//!
//! On open: register with the connection directory (superseding any prior
//! channel for the device), push the pending backlog in enqueue order, then
//! serve keepalives until the socket closes, errors, or the channel is
//! superseded. Every exit path deregisters, guarded by the connection id.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::connections::LiveConnection;
use crate::protocol::{Keepalive, ServerFrame};
use crate::state::RelayState;

pub async fn handle_channel(socket: WebSocket, state: RelayState, room_id: String, device_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    let conn = LiveConnection::new(tx);
    let conn_id = conn.conn_id;

    // Most recent connection wins. Dropping the superseded sender ends the
    // old task's select loop, which closes its socket.
    if state.connections.register(&device_id, conn).is_some() {
        tracing::info!(device = device_id.as_str(), "Superseded existing channel");
    }
    tracing::info!(
        room = room_id.as_str(),
        device = device_id.as_str(),
        "Channel connected"
    );

    // Flush the offline backlog before anything else, oldest first. The
    // queue was cleared by the drain; a write failure just loses the rest
    // of the backlog (best-effort protocol, no final error frame).
    let pending = state.rooms.drain_pending(&room_id, &device_id);
    if !pending.is_empty() {
        tracing::info!(
            room = room_id.as_str(),
            device = device_id.as_str(),
            count = pending.len(),
            "Delivering pending messages"
        );
    }

    let mut transport_down = false;
    for message in pending {
        match serde_json::to_string(&message) {
            Ok(json) => {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    transport_down = true;
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize pending message");
            }
        }
    }

    while !transport_down {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(frame) => match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize frame");
                    }
                },
                // The directory dropped our sender: a newer channel took over.
                None => break,
            },
            inbound = ws_receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<Keepalive>(&text) {
                        Ok(Keepalive::Ping) => {
                            state.connections.try_send(
                                &device_id,
                                ServerFrame::Keepalive(Keepalive::Pong),
                            );
                        }
                        Ok(Keepalive::Pong) => {}
                        Err(_) => {
                            tracing::warn!(
                                device = device_id.as_str(),
                                "Ignoring unrecognized frame"
                            );
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if ws_sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    tracing::info!(device = device_id.as_str(), "Client closed channel");
                    break;
                }
                Some(Ok(_)) => {} // Binary, Pong
                Some(Err(e)) => {
                    tracing::warn!(
                        device = device_id.as_str(),
                        error = %e,
                        "Channel transport error"
                    );
                    break;
                }
                None => break,
            },
        }
    }

    // Guarded: a superseded connection must not evict its replacement.
    state.connections.unregister(&device_id, conn_id);
    tracing::info!(
        room = room_id.as_str(),
        device = device_id.as_str(),
        "Channel disconnected"
    );
}
