//! Server-side WebSocket upgrade.
//!
//! Any path upgrades; plain HTTP requests get axum's upgrade rejection.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocket, ws::WebSocketUpgrade, State},
    response::Response,
    Extension,
};

use crate::connection::{Connection, ConnectionState};
use crate::obs::ACCESS;
use crate::server::ServerShared;
use crate::transport::pump;

/// Remote address of the TCP connection a request arrived on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PeerAddr(pub(crate) SocketAddr);

pub(crate) async fn ws_upgrade(
    State(shared): State<Arc<ServerShared>>,
    Extension(PeerAddr(peer)): Extension<PeerAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_session(shared, peer, socket))
}

async fn run_session(shared: Arc<ServerShared>, peer: SocketAddr, socket: WebSocket) {
    let (conn, outbound) = Connection::new(Some(peer), ConnectionState::Open);
    let id = conn.id();
    shared.install_defaults(&conn);
    shared.registry.insert(Arc::clone(&conn));
    tracing::info!(target: ACCESS, conn = %id, %peer, "connection opened");

    // Raced with stop(): close right away instead of leaking past it.
    if shared.is_stopping() {
        conn.close();
    }

    pump::run(Arc::clone(&conn), socket, outbound).await;

    shared.registry.remove(id);
    tracing::info!(target: ACCESS, conn = %id, %peer, "connection closed");
}
