//! User handler interfaces.
//!
//! Every handler receives a [`ConnectionRef`] to the connection the message
//! arrived on. Plain closures can be adapted with [`info_fn`] and
//! [`request_fn`]; they run on the blocking pool so a slow closure never
//! holds up the connection's I/O task.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use communique_core::error::{CommuniqueError, Result};

use super::connection::Connection;

/// Failure returned by a request handler. Its text becomes the body of the
/// RequestError reply.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// RequestError reply from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    body: Bytes,
}

impl RemoteError {
    pub(crate) fn new(body: Bytes) -> Self {
        Self { body }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer failed request: {}", self.message())
    }
}

impl std::error::Error for RemoteError {}

/// What a response handler is called with: the Response body, or the
/// RequestError body.
pub type Reply = std::result::Result<Bytes, RemoteError>;

/// Weak handle to the connection a message arrived on. Does not keep the
/// connection alive; every use re-resolves it.
#[derive(Clone, Default)]
pub struct ConnectionRef(Weak<Connection>);

impl ConnectionRef {
    pub(crate) fn new(conn: Weak<Connection>) -> Self {
        Self(conn)
    }

    pub fn upgrade(&self) -> Option<Arc<Connection>> {
        self.0.upgrade()
    }

    pub fn send_info(&self, body: impl Into<Bytes>) -> Result<()> {
        self.upgrade()
            .ok_or(CommuniqueError::NotConnected)?
            .send_info(body)
    }

    pub fn send_request<F>(&self, body: impl Into<Bytes>, on_reply: F) -> Result<()>
    where
        F: FnOnce(Reply) + Send + 'static,
    {
        self.upgrade()
            .ok_or(CommuniqueError::NotConnected)?
            .send_request(body, on_reply)
    }

    pub fn close(&self) {
        if let Some(conn) = self.upgrade() {
            conn.close();
        }
    }
}

impl fmt::Debug for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(conn) => write!(f, "ConnectionRef({})", conn.id()),
            None => f.write_str("ConnectionRef(<gone>)"),
        }
    }
}

#[async_trait]
pub trait InfoHandler: Send + Sync {
    async fn on_info(&self, conn: ConnectionRef, body: Bytes);
}

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn on_request(
        &self,
        conn: ConnectionRef,
        body: Bytes,
    ) -> std::result::Result<Bytes, HandlerError>;
}

// --------------------
// Closure adapters
// --------------------

struct InfoFn<F>(Arc<F>);

#[async_trait]
impl<F> InfoHandler for InfoFn<F>
where
    F: Fn(ConnectionRef, Bytes) + Send + Sync + 'static,
{
    async fn on_info(&self, conn: ConnectionRef, body: Bytes) {
        let f = Arc::clone(&self.0);
        if let Err(e) = tokio::task::spawn_blocking(move || f(conn, body)).await {
            tracing::error!(error = %e, "info handler failed");
        }
    }
}

struct RequestFn<F>(Arc<F>);

#[async_trait]
impl<F> RequestHandler for RequestFn<F>
where
    F: Fn(ConnectionRef, Bytes) -> std::result::Result<Bytes, HandlerError> + Send + Sync + 'static,
{
    async fn on_request(
        &self,
        conn: ConnectionRef,
        body: Bytes,
    ) -> std::result::Result<Bytes, HandlerError> {
        let f = Arc::clone(&self.0);
        match tokio::task::spawn_blocking(move || f(conn, body)).await {
            Ok(reply) => reply,
            // Re-raise so the dispatch boundary reports the panic message.
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(HandlerError(e.to_string())),
        }
    }
}

pub fn info_fn<F>(f: F) -> Arc<dyn InfoHandler>
where
    F: Fn(ConnectionRef, Bytes) + Send + Sync + 'static,
{
    Arc::new(InfoFn(Arc::new(f)))
}

pub fn request_fn<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(ConnectionRef, Bytes) -> std::result::Result<Bytes, HandlerError> + Send + Sync + 'static,
{
    Arc::new(RequestFn(Arc::new(f)))
}
