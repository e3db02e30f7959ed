//! Diagnostics.
//!
//! Two classes of events: error-class events use each module's default
//! target, access-class events (connection open/close, TLS verification
//! verdicts) use [`ACCESS`]. Verbosity for both is set independently by
//! [`LogLevels`].

pub mod logging;

pub use logging::{init_logging, LogLevels, ACCESS};
