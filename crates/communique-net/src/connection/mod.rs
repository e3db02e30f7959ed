//! Connections: per-peer state machine, handler interfaces, and the
//! server-side registry of live connections.

#[allow(clippy::module_inception)]
pub mod connection;
pub mod handlers;
pub mod registry;

pub use connection::{
    Connection, ConnectionId, ConnectionState, NO_REQUEST_HANDLER, UNKNOWN_FAILURE,
};
pub(crate) use connection::Outbound;
pub use handlers::{
    info_fn, request_fn, ConnectionRef, HandlerError, InfoHandler, RemoteError, Reply,
    RequestHandler,
};
pub use registry::ConnectionRegistry;
