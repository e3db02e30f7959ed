//! Protocol modules.
//!
//! Every transport message carries exactly one envelope: a one byte kind tag,
//! a big-endian `u32` correlation id and an opaque body. The transport keeps
//! message boundaries, so there is no length prefix.
//!
//! The parser is panic-free: malformed input is reported as
//! `CommuniqueError::Format` instead of indexing raw buffers.

pub mod envelope;
