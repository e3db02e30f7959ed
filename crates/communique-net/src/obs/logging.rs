use tracing_subscriber::{fmt, EnvFilter};

use communique_core::error::{CommuniqueError, Result};

/// Target for access-class events.
pub const ACCESS: &str = "communique::access";

pub const LOG_ERROR: u32 = 1 << 0;
pub const LOG_WARN: u32 = 1 << 1;
pub const LOG_INFO: u32 = 1 << 2;
pub const LOG_DEBUG: u32 = 1 << 3;
pub const LOG_TRACE: u32 = 1 << 4;

/// Every bit with a meaning; higher bits are ignored.
pub const LOG_ALL: u32 = LOG_ERROR | LOG_WARN | LOG_INFO | LOG_DEBUG | LOG_TRACE;

/// Bitmask verbosity per diagnostic class. `0` silences a class, `u32::MAX`
/// lets everything through; the most verbose set bit wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLevels {
    pub error: u32,
    pub access: u32,
}

impl Default for LogLevels {
    fn default() -> Self {
        Self {
            error: LOG_ERROR | LOG_WARN | LOG_INFO,
            access: 0,
        }
    }
}

impl LogLevels {
    pub const SILENT: LogLevels = LogLevels {
        error: 0,
        access: 0,
    };
    pub const ALL: LogLevels = LogLevels {
        error: u32::MAX,
        access: u32::MAX,
    };

    /// `EnvFilter` directives equivalent to these masks.
    pub fn directives(&self) -> String {
        format!(
            "{},{ACCESS}={}",
            level_name(self.error),
            level_name(self.access)
        )
    }

    pub fn to_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(self.directives())
            .map_err(|e| CommuniqueError::Config(format!("bad log filter: {e}")))
    }
}

fn level_name(mask: u32) -> &'static str {
    let mask = mask & LOG_ALL;
    if mask == 0 {
        "off"
    } else if mask >= LOG_TRACE {
        "trace"
    } else if mask >= LOG_DEBUG {
        "debug"
    } else if mask >= LOG_INFO {
        "info"
    } else if mask >= LOG_WARN {
        "warn"
    } else {
        "error"
    }
}

/// Install the global `fmt` subscriber. `RUST_LOG`, when set, wins over
/// `levels`.
pub fn init_logging(levels: LogLevels) -> Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => levels.to_filter()?,
    };
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| CommuniqueError::Config(format!("logging already initialised: {e}")))
}
