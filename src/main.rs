//! Secret sync relay server.
//!
//! A zero-knowledge relay: trusted devices join rooms and exchange
//! end-to-end encrypted sync payloads through them. Connected peers get
//! live WebSocket push; offline peers get a bounded store-and-forward
//! queue, drained when they reconnect. The relay never sees plaintext —
//! payloads are opaque encrypted blobs routed by device identifier.
//!
//! State is in-memory only: nothing survives a restart, and access control
//! is limited to the room/device identifiers clients supply.

mod api;
mod connections;
mod delivery;
mod error;
mod handler;
mod protocol;
mod rooms;
mod state;
mod sweeper;

use std::net::SocketAddr;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::{RelayConfig, RelayState};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "secret-relay", version, about = "Zero-knowledge secret sync relay server")]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "RELAY_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "RELAY_PORT")]
    port: u16,

    /// Liveness sweep interval in seconds
    #[arg(long, default_value_t = 300, env = "CLEANUP_INTERVAL_SECS")]
    cleanup_interval_secs: u64,

    /// Maximum pending messages stored per (room, device)
    #[arg(long, default_value_t = 50, env = "MAX_PENDING_PER_DEVICE")]
    max_pending_per_device: usize,

    /// Window in seconds within which a peer counts as active
    #[arg(long, default_value_t = 600, env = "PEER_ACTIVE_WINDOW_SECS")]
    peer_active_window_secs: i64,

    /// Seconds of inactivity before a membership is evicted
    #[arg(long, default_value_t = 3600, env = "DEVICE_TTL_SECS")]
    device_ttl_secs: i64,

    /// Seconds an empty room survives past its creation
    #[arg(long, default_value_t = 86400, env = "ROOM_GRACE_SECS")]
    room_grace_secs: i64,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secret_relay=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = RelayConfig {
        host: args.host,
        port: args.port,
        max_pending_per_device: args.max_pending_per_device,
        peer_active_window_secs: args.peer_active_window_secs,
        device_ttl_secs: args.device_ttl_secs,
        room_grace_secs: args.room_grace_secs,
    };

    let addr = format!("{}:{}", config.host, config.port);
    let state = RelayState::new(config);

    let sweeper_task = sweeper::spawn_sweeper(state.rooms.clone(), args.cleanup_interval_secs);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(api::health))
        .route("/health", get(api::health))
        .route("/room/:room_id/join", post(api::join_room))
        .route("/room/:room_id/peers", get(api::get_peers))
        .route("/room/:room_id/sync", post(api::relay_sync))
        .route("/room/:room_id/ws", get(api::ws_upgrade))
        .route("/admin/rooms", get(api::admin_rooms))
        .route("/admin/stats", get(api::admin_stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Secret sync relay listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

    sweeper_task.abort();
    tracing::info!("Relay shut down");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
