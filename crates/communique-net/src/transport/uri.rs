//! `ws://` / `wss://` connect targets.

use tokio_tungstenite::tungstenite::http::Uri;

use communique_core::error::{CommuniqueError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    /// Full URI, used for the upgrade request.
    pub uri: Uri,
}

impl Target {
    pub fn parse(s: &str) -> Result<Self> {
        let uri: Uri = s
            .parse()
            .map_err(|e| CommuniqueError::Transport(format!("invalid uri {s}: {e}")))?;

        let secure = match uri.scheme_str() {
            Some("ws") => false,
            Some("wss") => true,
            Some(other) => {
                return Err(CommuniqueError::Transport(format!(
                    "unsupported scheme {other} in {s}"
                )))
            }
            None => return Err(CommuniqueError::Transport(format!("missing scheme in {s}"))),
        };

        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| CommuniqueError::Transport(format!("missing host in {s}")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });

        Ok(Self {
            secure,
            host,
            port,
            uri,
        })
    }

    pub fn authority(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}
