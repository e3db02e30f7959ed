//! Top-level facade crate for communique.
//!
//! Re-exports the protocol primitives and the networking layer so users can
//! depend on a single crate.

pub mod core {
    pub use communique_core::*;
}

pub mod net {
    pub use communique_net::*;
}

pub use communique_core::{CommuniqueError, ErrorCode, Result};
pub use communique_net::{Client, Connection, ConnectionRef, Server, TlsSettings};
