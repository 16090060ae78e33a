//! HTTP exchange bound to one raw channel
//!
//! An [`Exchange`] carries one request/response pair, the raw channel the
//! request arrived on, and the readiness-listener slots used to resume partial
//! I/O. It ends exactly once: completed, upgraded, or aborted.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::HeaderName;
use http::{HeaderMap, StatusCode};

use crate::alloc::BufferPool;
use crate::channel::{self, RawChannel};
use crate::error::{Error, Result};
use crate::handshake::Handshake;
use crate::output::{BufferedOutput, Output};
use crate::stream::WebSocketChannel;

/// A one-shot callback resumed when the channel becomes ready
///
/// Registering a listener replaces any listener previously registered for the
/// same direction. A listener that needs another readiness event registers
/// itself again.
pub trait ReadinessListener<C>: Send {
    /// Run the listener against the exchange it was registered on
    fn on_ready(self: Box<Self>, exchange: &mut Exchange<C>);
}

impl<C, F> ReadinessListener<C> for F
where
    F: FnOnce(&mut Exchange<C>) + Send,
{
    fn on_ready(self: Box<Self>, exchange: &mut Exchange<C>) {
        (*self)(exchange)
    }
}

/// Lifecycle of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Request in flight
    Open,
    /// Response finished on the original channel
    Completed,
    /// Raw channel handed over to a WebSocket channel
    Upgraded,
    /// Connection torn down without a complete response
    Aborted,
}

/// Readiness the exchange is currently waiting for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    /// A read listener is registered
    pub readable: bool,
    /// A write listener is registered
    pub writable: bool,
}

impl Interest {
    /// Returns true if no listener is registered
    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}

/// One request/response pair on a raw channel
pub struct Exchange<C> {
    request_headers: HeaderMap,
    request_path: String,
    query_string: String,
    status: StatusCode,
    response_headers: HeaderMap,
    head_committed: bool,
    channel: Option<C>,
    pub(crate) pool: BufferPool,
    pub(crate) output: BufferedOutput,
    state: ExchangeState,
    read_listener: Option<Box<dyn ReadinessListener<C>>>,
    write_listener: Option<Box<dyn ReadinessListener<C>>>,
    pending_upgrade: Option<Handshake>,
    upgraded: Option<WebSocketChannel<C>>,
}

impl<C: RawChannel> Exchange<C> {
    /// Create an exchange for a request that arrived on `channel`
    pub fn new(channel: C, pool: BufferPool) -> Self {
        Self {
            request_headers: HeaderMap::new(),
            request_path: String::from("/"),
            query_string: String::new(),
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            head_committed: false,
            channel: Some(channel),
            pool,
            output: BufferedOutput::new(),
            state: ExchangeState::Open,
            read_listener: None,
            write_listener: None,
            pending_upgrade: None,
            upgraded: None,
        }
    }

    /// Set the request target, splitting off the query string
    pub fn set_request_target(&mut self, target: &str) {
        match target.split_once('?') {
            Some((path, query)) => {
                self.request_path = path.to_owned();
                self.query_string = query.to_owned();
            }
            None => {
                self.request_path = target.to_owned();
                self.query_string.clear();
            }
        }
    }

    /// Request path without the query string
    pub fn request_path(&self) -> &str {
        &self.request_path
    }

    /// Query string without the leading `?`
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    pub fn request_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.request_headers
    }

    /// First value of a request header, if present and valid UTF-8
    pub fn request_header(&self, name: &HeaderName) -> Option<&str> {
        self.request_headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// The connection's buffer pool
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Whether the underlying connection is encrypted
    pub fn is_secure(&self) -> bool {
        self.channel.as_ref().is_some_and(RawChannel::is_secure)
    }

    /// The raw channel, until it is detached by an upgrade
    pub fn channel(&self) -> Option<&C> {
        self.channel.as_ref()
    }

    pub fn channel_mut(&mut self) -> Option<&mut C> {
        self.channel.as_mut()
    }

    pub(crate) fn raw_channel_mut(&mut self) -> Result<&mut C> {
        self.channel.as_mut().ok_or(Error::ConnectionAborted)
    }

    pub(crate) fn detach_channel(&mut self) -> Result<C> {
        self.channel.take().ok_or(Error::ConnectionAborted)
    }

    /// Take back the raw channel to serve the next request on it
    ///
    /// Returns `None` if the channel was handed to an upgraded channel.
    pub fn into_channel(mut self) -> Option<C> {
        self.channel.take()
    }

    /// Response body writer backed by a pooled buffer
    pub fn output(&mut self) -> Output<'_, C> {
        Output::new(self)
    }

    /// Whether the response head has reached the channel
    pub fn is_committed(&self) -> bool {
        self.head_committed
    }

    /// Encode the response head, once
    ///
    /// Returns `None` if the head was already committed.
    pub(crate) fn commit_head(&mut self) -> Option<Bytes> {
        if self.head_committed {
            return None;
        }
        self.head_committed = true;
        Some(encode_head(self.status, &self.response_headers))
    }

    /// Write the response head (if uncommitted) followed by `data`, blocking
    pub(crate) fn send_blocking(&mut self, data: &[u8]) -> Result<()> {
        let head = self.commit_head();
        let channel = self.raw_channel_mut()?;
        if let Some(head) = head {
            channel::write_blocking(channel, &head)?;
        }
        channel::write_blocking(channel, data)
    }

    // ========================================================================
    // Readiness listeners
    // ========================================================================

    /// Register the listener run on the next read readiness
    pub fn set_read_listener(&mut self, listener: Box<dyn ReadinessListener<C>>) {
        tracing::trace!("read listener registered");
        self.read_listener = Some(listener);
    }

    /// Register the listener run on the next write readiness
    pub fn set_write_listener(&mut self, listener: Box<dyn ReadinessListener<C>>) {
        tracing::trace!("write listener registered");
        self.write_listener = Some(listener);
    }

    /// Which readiness events the exchange is waiting on
    pub fn interest(&self) -> Interest {
        Interest {
            readable: self.read_listener.is_some(),
            writable: self.write_listener.is_some(),
        }
    }

    /// Run the registered read listener, if any
    ///
    /// Returns false if nothing was registered.
    pub fn fire_readable(&mut self) -> bool {
        match self.read_listener.take() {
            Some(listener) => {
                listener.on_ready(self);
                true
            }
            None => false,
        }
    }

    /// Run the registered write listener, if any
    pub fn fire_writable(&mut self) -> bool {
        match self.write_listener.take() {
            Some(listener) => {
                listener.on_ready(self);
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn is_ended(&self) -> bool {
        self.state != ExchangeState::Open
    }

    /// Arrange for the raw channel to be handed to `handshake` when the
    /// response completes
    pub(crate) fn prepare_upgrade(&mut self, handshake: Handshake) {
        self.pending_upgrade = Some(handshake);
    }

    /// Signal that the response is complete
    ///
    /// Ending twice is a no-op. If an upgrade was prepared and the channel is
    /// still open, the upgraded channel is built here.
    pub fn end_exchange(&mut self) {
        if self.is_ended() {
            return;
        }
        self.read_listener = None;
        self.write_listener = None;

        let open = self.channel.as_ref().is_some_and(RawChannel::is_open);
        self.state = match self.pending_upgrade.take() {
            Some(handshake) if open => match handshake.create_channel(self) {
                Ok(upgraded) => {
                    tracing::debug!(
                        version = %upgraded.version(),
                        location = %upgraded.location(),
                        "exchange upgraded"
                    );
                    self.upgraded = Some(upgraded);
                    ExchangeState::Upgraded
                }
                Err(e) => {
                    tracing::debug!(error = %e, "upgrade failed");
                    ExchangeState::Aborted
                }
            },
            _ if open => ExchangeState::Completed,
            _ => ExchangeState::Aborted,
        };
    }

    /// Force-close the connection and end the exchange
    pub fn abort(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
        self.pending_upgrade = None;
        self.end_exchange();
    }

    /// Take the upgraded channel once the exchange reached `Upgraded`
    pub fn take_upgraded(&mut self) -> Option<WebSocketChannel<C>> {
        self.upgraded.take()
    }
}

impl<C> fmt::Debug for Exchange<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("path", &self.request_path)
            .field("status", &self.status)
            .field("state", &self.state)
            .field("committed", &self.head_committed)
            .finish()
    }
}

/// Serialize a response status line and headers
fn encode_head(status: StatusCode, headers: &HeaderMap) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);

    buf.put_slice(b"HTTP/1.1 ");
    buf.put_slice(status.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(status.canonical_reason().unwrap_or("").as_bytes());
    buf.put_slice(b"\r\n");

    for (name, value) in headers {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    buf.freeze()
}
