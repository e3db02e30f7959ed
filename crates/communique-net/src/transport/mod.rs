//! WebSocket transport plumbing.
//!
//! - `uri`: connect target parsing
//! - `pump`: per-connection socket loop (axum server sockets and
//!   tokio-tungstenite client sockets)
//! - `ws`: server-side upgrade handler

pub(crate) mod pump;
pub mod uri;
pub(crate) mod ws;

pub use uri::Target;
