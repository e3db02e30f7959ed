//! Per-peer connection state machine.
//!
//! Lifecycle: `Connecting -> Open -> Closing -> Closed`, or
//! `Connecting -> Closed` when the handshake fails. The transport pump owns
//! the socket; a `Connection` only ever talks to it through its outbound
//! queue, so every operation here is non-blocking and safe to call from
//! handler tasks.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};

use communique_core::error::{CommuniqueError, Result};
use communique_core::protocol::envelope::{self, Envelope, MessageKind};
use communique_core::TokenStore;

use super::handlers::{ConnectionRef, InfoHandler, RemoteError, Reply, RequestHandler};

/// Body of the RequestError sent when no request handler is installed.
pub const NO_REQUEST_HANDLER: &str = "No request handler set";

/// Body of the RequestError sent when a handler panics with a non-string payload.
pub const UNKNOWN_FAILURE: &str = "Unknown failure";

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one transport handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Commands for the transport pump.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Bytes),
    Close,
}

type ResponseHandler = Box<dyn FnOnce(Reply) + Send>;

pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    me: Weak<Connection>,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: watch::Sender<ConnectionState>,
    info_handler: RwLock<Option<Arc<dyn InfoHandler>>>,
    request_handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    pending: TokenStore<ResponseHandler>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Connection {
    /// New connection plus the receiving end of its outbound queue, which the
    /// transport pump drains.
    pub(crate) fn new(
        peer: Option<SocketAddr>,
        initial: ConnectionState,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(initial);
        let conn = Arc::new_cyclic(|me| Connection {
            id: ConnectionId::next(),
            peer,
            me: me.clone(),
            outbound: tx,
            state,
            info_handler: RwLock::new(None),
            request_handler: RwLock::new(None),
            pending: TokenStore::new(),
        });
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn handle(&self) -> ConnectionRef {
        ConnectionRef::new(self.me.clone())
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    // --------------------
    // Lifecycle
    // --------------------

    /// Waits while the handshake is in progress, then reports whether the
    /// connection reached `Open`. Does not wait on a close in progress.
    pub async fn is_open(&self) -> bool {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|s| *s != ConnectionState::Connecting)
            .await
            .map(|s| *s == ConnectionState::Open);
        settled.unwrap_or(false)
    }

    /// Waits while a close is in progress, then reports whether the
    /// connection is `Closed`. Does not wait on a handshake in progress.
    pub async fn is_closed(&self) -> bool {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|s| *s != ConnectionState::Closing)
            .await
            .map(|s| *s == ConnectionState::Closed);
        settled.unwrap_or(false)
    }

    /// Start a graceful close. No-op once closing or closed.
    pub fn close(&self) {
        let initiated = self.state.send_if_modified(|s| match s {
            ConnectionState::Connecting | ConnectionState::Open => {
                *s = ConnectionState::Closing;
                true
            }
            ConnectionState::Closing | ConnectionState::Closed => false,
        });
        if initiated {
            tracing::debug!(conn = %self.id, "close requested");
            let _ = self.outbound.send(Outbound::Close);
        }
    }

    /// Handshake finished. Returns false if a close was requested meanwhile.
    pub(crate) fn mark_open(&self) -> bool {
        self.state.send_if_modified(|s| {
            if *s == ConnectionState::Connecting {
                *s = ConnectionState::Open;
                true
            } else {
                false
            }
        })
    }

    /// Peer started the close.
    pub(crate) fn mark_closing(&self) {
        self.state.send_if_modified(|s| {
            if *s == ConnectionState::Open {
                *s = ConnectionState::Closing;
                true
            } else {
                false
            }
        });
    }

    /// Transport is gone. Pending response handlers are dropped uninvoked.
    pub(crate) fn mark_closed(&self) {
        self.state.send_replace(ConnectionState::Closed);
        let dropped = self.pending.drain();
        if !dropped.is_empty() {
            tracing::debug!(
                conn = %self.id,
                pending = dropped.len(),
                "dropping response handlers of unanswered requests"
            );
        }
    }

    pub(crate) async fn closing(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|s| matches!(s, ConnectionState::Closing | ConnectionState::Closed))
            .await;
    }

    // --------------------
    // Handlers
    // --------------------

    pub fn set_info_handler(&self, handler: Arc<dyn InfoHandler>) {
        *self
            .info_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn clear_info_handler(&self) {
        *self
            .info_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn set_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self
            .request_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn clear_request_handler(&self) {
        *self
            .request_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn info_handler(&self) -> Option<Arc<dyn InfoHandler>> {
        self.info_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn request_handler(&self) -> Option<Arc<dyn RequestHandler>> {
        self.request_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // --------------------
    // Sending
    // --------------------

    fn transmit(&self, frame: Bytes) -> Result<()> {
        if self.state() != ConnectionState::Open {
            return Err(CommuniqueError::NotConnected);
        }
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| CommuniqueError::NotConnected)
    }

    /// Send a Request. `on_reply` runs exactly once if a Response or
    /// RequestError with the same token comes back, and never if the
    /// connection closes first.
    pub fn send_request<F>(&self, body: impl Into<Bytes>, on_reply: F) -> Result<()>
    where
        F: FnOnce(Reply) + Send + 'static,
    {
        if self.state() != ConnectionState::Open {
            return Err(CommuniqueError::NotConnected);
        }
        let body = body.into();
        let token = self.pending.store(Box::new(on_reply))?;
        let frame = envelope::encode(MessageKind::Request, token, &body);
        if let Err(e) = self.transmit(frame) {
            self.pending.take(token);
            return Err(e);
        }
        tracing::trace!(conn = %self.id, token, len = body.len(), "request sent");
        Ok(())
    }

    /// Send a Request and wait for its reply.
    pub async fn request(&self, body: impl Into<Bytes>) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.send_request(body, move |reply| {
            let _ = tx.send(reply);
        })?;
        rx.await.map_err(|_| {
            CommuniqueError::Transport("connection closed before response".into())
        })
    }

    pub fn send_info(&self, body: impl Into<Bytes>) -> Result<()> {
        self.transmit(Envelope::info(body).encode())
    }

    /// Protocol replies. A connection that closed while a handler was running
    /// just loses the reply.
    fn reply(&self, env: Envelope) {
        if self.outbound.send(Outbound::Frame(env.encode())).is_err() {
            tracing::debug!(conn = %self.id, token = env.correlation_id, "reply dropped: connection gone");
        }
    }

    // --------------------
    // Receiving
    // --------------------

    /// Dispatch one inbound transport message. Handlers run on their own
    /// tasks; nothing here blocks or fails the I/O loop.
    pub(crate) fn handle_frame(&self, frame: Bytes) {
        let env = match envelope::decode(frame) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(conn = %self.id, error = %e, "dropping malformed frame");
                return;
            }
        };

        match env.kind {
            MessageKind::Info => self.dispatch_info(env.body),
            MessageKind::Request => self.dispatch_request(env.correlation_id, env.body),
            MessageKind::Response => self.dispatch_reply(env.correlation_id, Ok(env.body)),
            MessageKind::RequestError => {
                self.dispatch_reply(env.correlation_id, Err(RemoteError::new(env.body)))
            }
        }
    }

    fn dispatch_info(&self, body: Bytes) {
        let Some(handler) = self.info_handler() else {
            tracing::debug!(conn = %self.id, len = body.len(), "info dropped: no info handler");
            return;
        };
        let conn = self.handle();
        tokio::spawn(async move {
            handler.on_info(conn, body).await;
        });
    }

    fn dispatch_request(&self, token: u32, body: Bytes) {
        let Some(handler) = self.request_handler() else {
            self.reply(Envelope::request_error(token, NO_REQUEST_HANDLER));
            return;
        };

        let me = self.me.clone();
        tokio::spawn(async move {
            let conn = ConnectionRef::new(me.clone());
            // Inner task is the failure boundary: a panic surfaces as a JoinError.
            let outcome = tokio::spawn(async move { handler.on_request(conn, body).await }).await;
            let reply = match outcome {
                Ok(Ok(body)) => Envelope::response(token, body),
                Ok(Err(e)) => Envelope::request_error(token, e.to_string()),
                Err(e) => {
                    let msg = if e.is_panic() {
                        panic_message(e.into_panic())
                    } else {
                        UNKNOWN_FAILURE.to_owned()
                    };
                    tracing::warn!(token, error = %msg, "request handler failed");
                    Envelope::request_error(token, msg)
                }
            };
            if let Some(conn) = me.upgrade() {
                conn.reply(reply);
            }
        });
    }

    fn dispatch_reply(&self, token: u32, reply: Reply) {
        let Some(on_reply) = self.pending.take(token) else {
            tracing::warn!(conn = %self.id, token, "reply for unknown token dropped");
            return;
        };
        tokio::task::spawn_blocking(move || on_reply(reply));
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        UNKNOWN_FAILURE.to_owned()
    }
}
