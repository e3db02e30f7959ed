//! Config loader (strict parsing).

pub mod schema;

use std::fs;
use std::path::Path;

use communique_core::error::{CommuniqueError, Result};

pub use schema::{CommuniqueConfig, LogSection, ServerSection, TlsSection};

pub fn load_from_file(path: impl AsRef<Path>) -> Result<CommuniqueConfig> {
    let path = path.as_ref();
    let s = fs::read_to_string(path).map_err(|e| {
        CommuniqueError::Config(format!("read config {} failed: {e}", path.display()))
    })?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<CommuniqueConfig> {
    let cfg: CommuniqueConfig = serde_yaml::from_str(s)
        .map_err(|e| CommuniqueError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
