use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use communique_core::error::{CommuniqueError, Result};

use crate::obs::LogLevels;
use crate::tls::TlsSettings;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommuniqueConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    /// Absent: plaintext.
    #[serde(default)]
    pub tls: Option<TlsSection>,

    #[serde(default)]
    pub log: LogSection,
}

impl CommuniqueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(CommuniqueError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.server.validate()?;
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        Ok(())
    }

    pub fn tls_settings(&self) -> TlsSettings {
        self.tls
            .as_ref()
            .map(TlsSection::to_settings)
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr().map(|_| ())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|_| {
            CommuniqueError::Config(format!(
                "server.listen must be a socket address, got {:?}",
                self.listen
            ))
        })
    }
}

fn default_listen() -> String {
    "127.0.0.1:9108".into()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsSection {
    #[serde(default)]
    pub certificate_chain_file: Option<PathBuf>,
    #[serde(default)]
    pub private_key_file: Option<PathBuf>,
    #[serde(default)]
    pub verify_file: Option<PathBuf>,
    #[serde(default)]
    pub dh_params_file: Option<PathBuf>,
    #[serde(default)]
    pub required_hostname: Option<String>,
}

impl TlsSection {
    pub fn validate(&self) -> Result<()> {
        match (&self.certificate_chain_file, &self.private_key_file) {
            (Some(_), None) => Err(CommuniqueError::Config(
                "tls.private_key_file is required with tls.certificate_chain_file".into(),
            )),
            (None, Some(_)) => Err(CommuniqueError::Config(
                "tls.certificate_chain_file is required with tls.private_key_file".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn to_settings(&self) -> TlsSettings {
        let mut s = TlsSettings::new();
        if let Some(p) = &self.certificate_chain_file {
            s.set_certificate_chain_file(p);
        }
        if let Some(p) = &self.private_key_file {
            s.set_private_key_file(p);
        }
        if let Some(p) = &self.verify_file {
            s.set_verify_file(p);
        }
        if let Some(p) = &self.dh_params_file {
            s.set_dh_params_file(p);
        }
        if let Some(h) = &self.required_hostname {
            s.require_hostname(h.clone());
        }
        s
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSection {
    #[serde(default = "default_error_level")]
    pub error_level: u32,
    #[serde(default)]
    pub access_level: u32,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            error_level: default_error_level(),
            access_level: 0,
        }
    }
}

impl LogSection {
    pub fn levels(&self) -> LogLevels {
        LogLevels {
            error: self.error_level,
            access: self.access_level,
        }
    }
}

fn default_error_level() -> u32 {
    LogLevels::default().error
}
