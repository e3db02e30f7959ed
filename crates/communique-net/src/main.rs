//! communique-echo
//!
//! Small echo server over the communique protocol:
//! - Requests are answered with their own body
//! - Info messages are logged
//!
//! Usage: `communique-echo [config.yaml]` (default `communique.yaml`).

use bytes::Bytes;

use communique_core::error::Result;
use communique_net::{config, info_fn, obs, request_fn, Server};

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "communique.yaml".to_string());
    let cfg = config::load_from_file(&path)?;
    obs::init_logging(cfg.log.levels())?;

    let server = Server::new(cfg.tls_settings());
    server.set_default_request_handler(request_fn(|_conn, body: Bytes| Ok(body)));
    server.set_default_info_handler(info_fn(|conn, body: Bytes| {
        tracing::info!(?conn, len = body.len(), "info received");
    }));

    let listen = cfg.server.listen_addr()?;
    let bound = server.listen(listen).await?;
    tracing::info!(%bound, config = %path, "communique-echo started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "waiting for ctrl-c failed");
    }
    server.stop().await;
    Ok(())
}
