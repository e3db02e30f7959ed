//! Server: accepts TCP (optionally TLS), upgrades to WebSocket, and keeps a
//! registry of live connections.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use axum::{Extension, Router};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout, Duration};
use tokio_rustls::TlsAcceptor;

use communique_core::error::{CommuniqueError, Result};

use crate::connection::{Connection, ConnectionRegistry, InfoHandler, RequestHandler};
use crate::obs::ACCESS;
use crate::tls::{self, TlsSettings};
use crate::transport::ws::{ws_upgrade, PeerAddr};

/// How long `stop` waits for live connections to finish closing.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared with the upgrade handler and every session task.
pub(crate) struct ServerShared {
    pub(crate) registry: ConnectionRegistry,
    default_info: RwLock<Option<Arc<dyn InfoHandler>>>,
    default_request: RwLock<Option<Arc<dyn RequestHandler>>>,
    stopping: AtomicBool,
}

impl ServerShared {
    fn new() -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            default_info: RwLock::new(None),
            default_request: RwLock::new(None),
            stopping: AtomicBool::new(false),
        }
    }

    /// Copy the current default handlers onto a freshly accepted connection.
    pub(crate) fn install_defaults(&self, conn: &Connection) {
        let info = self
            .default_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(h) = info {
            conn.set_info_handler(h);
        }
        let request = self
            .default_request
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(h) = request {
            conn.set_request_handler(h);
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept: JoinHandle<()>,
}

pub struct Server {
    settings: TlsSettings,
    shared: Arc<ServerShared>,
    running: Mutex<Option<Running>>,
}

impl Server {
    /// Chain + key in `settings` turn TLS on; a verify source additionally
    /// makes client certificates mandatory.
    pub fn new(settings: TlsSettings) -> Self {
        Self {
            settings,
            shared: Arc::new(ServerShared::new()),
            running: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &TlsSettings {
        &self.settings
    }

    /// Takes effect on the next `listen`.
    pub fn settings_mut(&mut self) -> &mut TlsSettings {
        &mut self.settings
    }

    /// Handler installed on every connection accepted from now on.
    pub fn set_default_info_handler(&self, handler: Arc<dyn InfoHandler>) {
        *self
            .shared
            .default_info
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn set_default_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self
            .shared
            .default_request
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Snapshot of live connections (owning references).
    pub fn current_connections(&self) -> Vec<Arc<Connection>> {
        self.shared.registry.snapshot()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Bind and start accepting. Returns the bound address (useful with
    /// port 0). TLS material is loaded here, so bad paths or PEM fail this
    /// call; bind errors come back verbatim as `Transport`.
    pub async fn listen(&self, addr: impl ToSocketAddrs) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CommuniqueError::Transport("server already listening".into()));
        }

        let acceptor = tls::server_config(&self.settings)?.map(TlsAcceptor::from);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CommuniqueError::Transport(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CommuniqueError::Transport(e.to_string()))?;

        self.shared.stopping.store(false, Ordering::Release);
        let router = Router::new()
            .fallback(ws_upgrade)
            .with_state(Arc::clone(&self.shared));

        tracing::info!(%local_addr, tls = acceptor.is_some(), "listening");
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept = tokio::spawn(accept_loop(listener, router, acceptor, shutdown_rx));

        *running = Some(Running {
            local_addr,
            shutdown,
            accept,
        });
        Ok(local_addr)
    }

    /// Stop accepting, close every live connection and wait for them to go.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        self.shared.stopping.store(true, Ordering::Release);
        let _ = running.shutdown.send(true);
        if let Err(e) = running.accept.await {
            tracing::error!(error = %e, "accept task failed");
        }

        self.shared.registry.close_all();
        if timeout(STOP_TIMEOUT, self.shared.registry.wait_empty())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.shared.registry.len(),
                "connections still open after stop timeout"
            );
        }
        tracing::info!(addr = %running.local_addr, "stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            self.shared.stopping.store(true, Ordering::Release);
            let _ = running.shutdown.send(true);
            self.shared.registry.close_all();
        }
    }
}

// --------------------
// Accept loop
// --------------------

async fn accept_loop(
    listener: TcpListener,
    router: Router,
    acceptor: Option<TlsAcceptor>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Connections still in TLS / HTTP upgrade. Upgraded sessions run on
    // their own tasks and are tracked by the registry instead.
    let mut handshakes = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let service = router.clone().layer(Extension(PeerAddr(peer)));
                let acceptor = acceptor.clone();
                handshakes.spawn(async move {
                    match acceptor {
                        None => serve_http(stream, service, peer).await,
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls) => serve_http(tls, service, peer).await,
                            Err(e) => tracing::info!(
                                target: ACCESS, %peer, error = %e, "TLS handshake rejected"
                            ),
                        },
                    }
                });
            }

            Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
        }
    }

    handshakes.shutdown().await;
}

async fn serve_http<I>(io: I, service: Router, peer: SocketAddr)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let served = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(io), TowerToHyperService::new(service))
        .with_upgrades()
        .await;
    if let Err(e) = served {
        tracing::debug!(%peer, error = %e, "http connection ended with error");
    }
}
