//! communique core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the envelope wire format, the correlation token store
//! that pairs responses with outstanding requests, and the error surface shared
//! by the networking crate. It carries no transport or runtime dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Envelopes come straight from the peer, so every fallible path surfaces as
//! `CommuniqueError`/`Result` instead of crashing the I/O loop.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;
pub mod tokens;

/// Shared result type.
pub use error::{CommuniqueError, ErrorCode, Result};
pub use protocol::envelope::{Envelope, MessageKind, HEADER_LEN};
pub use tokens::{Token, TokenStore};
