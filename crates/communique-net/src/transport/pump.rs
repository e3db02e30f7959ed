//! Socket pump shared by client and server connections.
//!
//! One task per connection: writes whatever the [`Connection`] queues,
//! feeds every inbound data message to [`Connection::handle_frame`], and
//! marks the connection closed when the socket ends.

use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::connection::{Connection, Outbound};

/// How long a locally initiated close waits for the peer's close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) enum WireEvent {
    Data(Bytes),
    Close,
    Control,
}

/// Message type of a WebSocket implementation.
pub(crate) trait WireMessage: Sized + Send {
    fn binary(frame: Bytes) -> Self;
    fn close() -> Self;
    fn classify(self) -> WireEvent;
}

impl WireMessage for axum::extract::ws::Message {
    fn binary(frame: Bytes) -> Self {
        Self::Binary(frame.to_vec())
    }

    fn close() -> Self {
        Self::Close(None)
    }

    fn classify(self) -> WireEvent {
        match self {
            Self::Binary(b) => WireEvent::Data(Bytes::from(b)),
            Self::Text(s) => WireEvent::Data(Bytes::from(s)),
            Self::Close(_) => WireEvent::Close,
            Self::Ping(_) | Self::Pong(_) => WireEvent::Control,
        }
    }
}

impl WireMessage for tokio_tungstenite::tungstenite::Message {
    fn binary(frame: Bytes) -> Self {
        Self::Binary(frame.to_vec())
    }

    fn close() -> Self {
        Self::Close(None)
    }

    fn classify(self) -> WireEvent {
        match self {
            Self::Binary(b) => WireEvent::Data(Bytes::from(b)),
            Self::Text(s) => WireEvent::Data(Bytes::from(s)),
            Self::Close(_) => WireEvent::Close,
            Self::Ping(_) | Self::Pong(_) | Self::Frame(_) => WireEvent::Control,
        }
    }
}

pub(crate) async fn run<S, M, E>(
    conn: Arc<Connection>,
    socket: S,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) where
    S: Stream<Item = Result<M, E>> + Sink<M, Error = E> + Send,
    M: WireMessage,
    E: Display + Send,
{
    let (mut ws_tx, mut ws_rx) = socket.split();
    let id = conn.id();

    loop {
        tokio::select! {
            // outbound writer
            cmd = outbound.recv() => {
                match cmd {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = ws_tx.send(M::binary(frame)).await {
                            tracing::debug!(conn = %id, error = %e, "write failed");
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = ws_tx.send(M::close()).await;
                        // Wait for the peer to acknowledge; anything it still
                        // sends meanwhile is discarded.
                        let drain = async {
                            while let Some(Ok(msg)) = ws_rx.next().await {
                                if matches!(msg.classify(), WireEvent::Close) {
                                    break;
                                }
                            }
                        };
                        if timeout(CLOSE_TIMEOUT, drain).await.is_err() {
                            tracing::debug!(conn = %id, "peer did not acknowledge close");
                        }
                        break;
                    }
                }
            }

            // inbound reader
            incoming = ws_rx.next() => {
                let Some(incoming) = incoming else { break; };
                match incoming {
                    Ok(msg) => match msg.classify() {
                        WireEvent::Data(frame) => conn.handle_frame(frame),
                        WireEvent::Close => {
                            conn.mark_closing();
                            break;
                        }
                        WireEvent::Control => {}
                    },
                    Err(e) => {
                        tracing::debug!(conn = %id, error = %e, "read failed");
                        break;
                    }
                }
            }
        }
    }

    let _ = ws_tx.close().await;
    conn.mark_closed();
}
