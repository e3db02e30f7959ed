//! communique networking library.
//!
//! Wires the envelope codec and token store from `communique-core` into
//! WebSocket connections, with TLS trust evaluation in front of every
//! connection attempt. Consumed by the `communique-echo` binary and by
//! integration tests.

pub mod client;
pub mod config;
pub mod connection;
pub mod obs;
pub mod server;
pub mod tls;
pub mod transport;

pub use client::Client;
pub use connection::{
    info_fn, request_fn, Connection, ConnectionId, ConnectionRef, ConnectionState, HandlerError,
    InfoHandler, RemoteError, Reply, RequestHandler, NO_REQUEST_HANDLER, UNKNOWN_FAILURE,
};
pub use server::Server;
pub use tls::{Certificate, PemSource, TlsSettings};
