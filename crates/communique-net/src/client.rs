//! Client: one outbound connection at a time.
//!
//! `connect` does all local work (URI parsing, TLS material) synchronously
//! and reports its errors directly; the TCP/TLS/WebSocket handshake runs on
//! the connection's I/O task. Use [`Client::is_open`] to learn how it went.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::SinkExt;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::WebSocketStream;

use communique_core::error::{CommuniqueError, Result};

use crate::connection::{
    Connection, ConnectionState, InfoHandler, Outbound, Reply, RequestHandler,
};
use crate::obs::ACCESS;
use crate::tls::{self, TlsSettings};
use crate::transport::{pump, Target};

trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

type ClientSocket = WebSocketStream<Box<dyn IoStream>>;

struct Active {
    conn: Arc<Connection>,
    io: Option<JoinHandle<()>>,
}

pub struct Client {
    settings: TlsSettings,
    info_handler: Option<Arc<dyn InfoHandler>>,
    request_handler: Option<Arc<dyn RequestHandler>>,
    active: Option<Active>,
}

impl Client {
    pub fn new(settings: TlsSettings) -> Self {
        Self {
            settings,
            info_handler: None,
            request_handler: None,
            active: None,
        }
    }

    pub fn settings(&self) -> &TlsSettings {
        &self.settings
    }

    /// Takes effect on the next `connect`.
    pub fn settings_mut(&mut self) -> &mut TlsSettings {
        &mut self.settings
    }

    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.active.as_ref().map(|a| Arc::clone(&a.conn))
    }

    /// Start connecting to `ws://host:port[/path]` or `wss://...`.
    pub async fn connect(&mut self, uri: &str) -> Result<()> {
        if let Some(active) = &self.active {
            if active.conn.state() != ConnectionState::Closed {
                return Err(CommuniqueError::Transport("client already connected".into()));
            }
        }
        if let Some(mut old) = self.active.take() {
            if let Some(io) = old.io.take() {
                let _ = io.await;
            }
        }

        let target = Target::parse(uri)?;
        let tls = if target.secure {
            let connector = TlsConnector::from(tls::client_config(&self.settings)?);
            let name = ServerName::try_from(target.host.clone())
                .map_err(|e| CommuniqueError::Transport(format!("invalid server name: {e}")))?;
            Some((connector, name))
        } else {
            None
        };

        let (conn, outbound) = Connection::new(None, ConnectionState::Connecting);
        if let Some(h) = &self.info_handler {
            conn.set_info_handler(Arc::clone(h));
        }
        if let Some(h) = &self.request_handler {
            conn.set_request_handler(Arc::clone(h));
        }

        tracing::debug!(conn = %conn.id(), %uri, "connecting");
        let io = tokio::spawn(run_client(Arc::clone(&conn), target, tls, outbound));
        self.active = Some(Active { conn, io: Some(io) });
        Ok(())
    }

    /// Waits for the handshake to settle; true if the connection is open.
    pub async fn is_open(&self) -> bool {
        match &self.active {
            Some(a) => a.conn.is_open().await,
            None => false,
        }
    }

    /// Waits for a close in progress to finish; true if nothing is connected.
    pub async fn is_closed(&self) -> bool {
        match &self.active {
            Some(a) => a.conn.is_closed().await,
            None => true,
        }
    }

    /// Close and join the I/O task. Idempotent.
    pub async fn close(&mut self) {
        let Some(active) = &mut self.active else {
            return;
        };
        active.conn.close();
        if let Some(io) = active.io.take() {
            if let Err(e) = io.await {
                tracing::error!(error = %e, "client I/O task failed");
            }
        }
    }

    pub fn set_info_handler(&mut self, handler: Arc<dyn InfoHandler>) {
        if let Some(a) = &self.active {
            a.conn.set_info_handler(Arc::clone(&handler));
        }
        self.info_handler = Some(handler);
    }

    pub fn set_request_handler(&mut self, handler: Arc<dyn RequestHandler>) {
        if let Some(a) = &self.active {
            a.conn.set_request_handler(Arc::clone(&handler));
        }
        self.request_handler = Some(handler);
    }

    fn conn(&self) -> Result<&Arc<Connection>> {
        self.active
            .as_ref()
            .map(|a| &a.conn)
            .ok_or(CommuniqueError::NotConnected)
    }

    pub fn send_request<F>(&self, body: impl Into<Bytes>, on_reply: F) -> Result<()>
    where
        F: FnOnce(Reply) + Send + 'static,
    {
        self.conn()?.send_request(body, on_reply)
    }

    pub async fn request(&self, body: impl Into<Bytes>) -> Result<Reply> {
        self.conn()?.request(body).await
    }

    pub fn send_info(&self, body: impl Into<Bytes>) -> Result<()> {
        self.conn()?.send_info(body)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(a) = &self.active {
            a.conn.close();
        }
    }
}

// --------------------
// I/O task
// --------------------

async fn run_client(
    conn: Arc<Connection>,
    target: Target,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let id = conn.id();
    let established = tokio::select! {
        r = establish(&target, tls) => r,
        _ = conn.closing() => Err(CommuniqueError::Transport("closed while connecting".into())),
    };

    match established {
        Ok(socket) if conn.mark_open() => {
            tracing::info!(target: ACCESS, conn = %id, uri = %target.uri, "connected");
            pump::run(Arc::clone(&conn), socket, outbound).await;
            tracing::info!(target: ACCESS, conn = %id, "disconnected");
        }
        Ok(mut socket) => {
            let _ = SinkExt::close(&mut socket).await;
            conn.mark_closed();
        }
        Err(e) => {
            tracing::warn!(conn = %id, uri = %target.uri, error = %e, "connect failed");
            conn.mark_closed();
        }
    }
}

async fn establish(
    target: &Target,
    tls: Option<(TlsConnector, ServerName<'static>)>,
) -> Result<ClientSocket> {
    let (host, port) = target.authority();
    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| CommuniqueError::Transport(format!("connect to {host}:{port}: {e}")))?;
    let _ = tcp.set_nodelay(true);

    let io: Box<dyn IoStream> = match tls {
        None => Box::new(tcp),
        Some((connector, name)) => Box::new(
            connector
                .connect(name, tcp)
                .await
                .map_err(|e| CommuniqueError::Transport(format!("TLS handshake failed: {e}")))?,
        ),
    };

    let (socket, _response) = tokio_tungstenite::client_async(target.uri.to_string(), io)
        .await
        .map_err(|e| CommuniqueError::Transport(format!("websocket handshake failed: {e}")))?;
    Ok(socket)
}
