//! WebSocket upgrade negotiation
//!
//! Each protocol generation is a [`Handshake`] variant with the same three
//! capabilities:
//! - `matches`: pure check of the request headers
//! - `handshake`: the negotiation dialogue, which leaves the exchange
//!   upgraded, aborted, or waiting on a readiness listener
//! - `create_channel`: builds the upgraded channel from the exchange
//!
//! A [`Negotiator`] offers the exchange to its variants in priority order and
//! runs the first one that matches.

mod hybi00;
mod hybi07;
pub mod proof;

use std::collections::BTreeSet;
use std::fmt;

use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

use crate::Config;
use crate::channel::RawChannel;
use crate::error::Result;
use crate::exchange::{Exchange, ExchangeState};
use crate::stream::WebSocketChannel;

pub use hybi00::Hybi00Handshake;
pub use hybi07::Hybi07Handshake;

/// Header names used by the handshake dialogues
pub mod headers {
    use http::header::HeaderName;

    pub use http::header::{
        SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION,
    };

    /// First legacy key (hybi-00)
    pub const SEC_WEBSOCKET_KEY1: HeaderName = HeaderName::from_static("sec-websocket-key1");
    /// Second legacy key (hybi-00)
    pub const SEC_WEBSOCKET_KEY2: HeaderName = HeaderName::from_static("sec-websocket-key2");
    /// Origin echoed back to the client
    pub const SEC_WEBSOCKET_ORIGIN: HeaderName = HeaderName::from_static("sec-websocket-origin");
    /// Computed WebSocket URI
    pub const SEC_WEBSOCKET_LOCATION: HeaderName =
        HeaderName::from_static("sec-websocket-location");
}

/// WebSocket protocol generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WebSocketVersion {
    /// hybi-00 / hixie-76: numeric keys, MD5, 16-byte response body
    V00,
    /// hybi-07: nonce + GUID, SHA-1, base64
    V07,
    /// hybi-08: same algorithm as 07
    V08,
    /// RFC 6455: same algorithm as 07
    V13,
}

impl WebSocketVersion {
    /// Value carried in `Sec-WebSocket-Version`
    pub fn to_http_header_value(&self) -> &'static str {
        match self {
            WebSocketVersion::V00 => "0",
            WebSocketVersion::V07 => "7",
            WebSocketVersion::V08 => "8",
            WebSocketVersion::V13 => "13",
        }
    }
}

impl fmt::Display for WebSocketVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebSocketVersion::V00 => write!(f, "hybi-00"),
            WebSocketVersion::V07 => write!(f, "hybi-07"),
            WebSocketVersion::V08 => write!(f, "hybi-08"),
            WebSocketVersion::V13 => write!(f, "RFC 6455"),
        }
    }
}

/// Where a handshake left its exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// The upgraded channel is ready to be taken from the exchange
    Upgraded,
    /// Waiting on a readiness listener; drive the exchange's events
    Pending,
    /// The connection was closed and the exchange ended
    Aborted,
}

impl HandshakeStatus {
    fn of<C>(exchange: &Exchange<C>) -> Self
    where
        C: RawChannel,
    {
        match exchange.state() {
            ExchangeState::Open => HandshakeStatus::Pending,
            ExchangeState::Upgraded => HandshakeStatus::Upgraded,
            ExchangeState::Completed | ExchangeState::Aborted => HandshakeStatus::Aborted,
        }
    }
}

/// A protocol-generation handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// Legacy numeric-key handshake
    Hybi00(Hybi00Handshake),
    /// Nonce handshake shared by 07, 08 and 13
    Hybi07(Hybi07Handshake),
}

impl Handshake {
    /// hybi-00 handshake with no sub-protocols
    pub fn hybi00() -> Self {
        Handshake::Hybi00(Hybi00Handshake::new())
    }

    /// hybi-07 handshake with no sub-protocols
    pub fn hybi07() -> Self {
        Handshake::Hybi07(Hybi07Handshake::new(WebSocketVersion::V07))
    }

    /// hybi-08 handshake with no sub-protocols
    pub fn hybi08() -> Self {
        Handshake::Hybi07(Hybi07Handshake::new(WebSocketVersion::V08))
    }

    /// RFC 6455 handshake with no sub-protocols
    pub fn hybi13() -> Self {
        Handshake::Hybi07(Hybi07Handshake::new(WebSocketVersion::V13))
    }

    /// Handshake for `version`
    pub fn for_version(version: WebSocketVersion) -> Self {
        match version {
            WebSocketVersion::V00 => Self::hybi00(),
            v => Handshake::Hybi07(Hybi07Handshake::new(v)),
        }
    }

    /// Set the sub-protocols passed on to the upgraded channel
    pub fn with_subprotocols<I, S>(mut self, subprotocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = subprotocols.into_iter().map(Into::into).collect();
        match &mut self {
            Handshake::Hybi00(h) => h.subprotocols = set,
            Handshake::Hybi07(h) => h.subprotocols = set,
        }
        self
    }

    /// Override the hash algorithm identifier
    pub fn with_hash_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        let algorithm = algorithm.into();
        match &mut self {
            Handshake::Hybi00(h) => h.hash_algorithm = algorithm,
            Handshake::Hybi07(h) => h.hash_algorithm = algorithm,
        }
        self
    }

    /// Let the upgraded channel negotiate extensions (07 and later only)
    pub fn with_extensions(mut self, allow: bool) -> Self {
        if let Handshake::Hybi07(h) = &mut self {
            h.allow_extensions = allow;
        }
        self
    }

    pub fn version(&self) -> WebSocketVersion {
        match self {
            Handshake::Hybi00(_) => WebSocketVersion::V00,
            Handshake::Hybi07(h) => h.version,
        }
    }

    pub fn hash_algorithm(&self) -> &str {
        match self {
            Handshake::Hybi00(h) => &h.hash_algorithm,
            Handshake::Hybi07(h) => &h.hash_algorithm,
        }
    }

    /// Magic GUID appended to the nonce; absent for hybi-00
    pub fn magic_number(&self) -> Option<&'static str> {
        match self {
            Handshake::Hybi00(_) => None,
            Handshake::Hybi07(_) => Some(crate::WS_GUID),
        }
    }

    pub fn subprotocols(&self) -> &BTreeSet<String> {
        match self {
            Handshake::Hybi00(h) => &h.subprotocols,
            Handshake::Hybi07(h) => &h.subprotocols,
        }
    }

    pub fn allow_extensions(&self) -> bool {
        match self {
            Handshake::Hybi00(_) => false,
            Handshake::Hybi07(h) => h.allow_extensions,
        }
    }

    /// Whether the request headers select this variant
    pub fn matches<C>(&self, exchange: &Exchange<C>) -> bool
    where
        C: RawChannel,
    {
        self.matches_headers(exchange.request_headers())
    }

    pub fn matches_headers(&self, headers: &HeaderMap) -> bool {
        match self {
            Handshake::Hybi00(h) => h.matches(headers),
            Handshake::Hybi07(h) => h.matches(headers),
        }
    }

    /// Run the negotiation dialogue
    ///
    /// Errors are returned after the exchange has been aborted.
    pub fn handshake<C>(&self, exchange: &mut Exchange<C>) -> Result<HandshakeStatus>
    where
        C: RawChannel,
    {
        match self {
            Handshake::Hybi00(_) => hybi00::handshake(self, exchange),
            Handshake::Hybi07(_) => hybi07::handshake(self, exchange),
        }
    }

    /// Build the upgraded channel from the exchange's raw connection
    pub fn create_channel<C>(&self, exchange: &mut Exchange<C>) -> Result<WebSocketChannel<C>>
    where
        C: RawChannel,
    {
        let location = websocket_location(exchange);
        let raw = exchange.detach_channel()?;
        Ok(WebSocketChannel::new(
            self.version(),
            raw,
            exchange.pool().clone(),
            location,
            self.subprotocols().clone(),
            self.allow_extensions(),
        ))
    }
}

/// The `ws://` or `wss://` URI the request was made to
pub fn websocket_location<C>(exchange: &Exchange<C>) -> String
where
    C: RawChannel,
{
    let scheme = if exchange.is_secure() { "wss" } else { "ws" };
    let host = exchange.request_header(&header::HOST).unwrap_or("localhost");

    let mut location = format!("{scheme}://{host}{}", exchange.request_path());
    if !exchange.query_string().is_empty() {
        location.push('?');
        location.push_str(exchange.query_string());
    }
    location
}

fn put_header<C>(exchange: &mut Exchange<C>, name: HeaderName, value: &str)
where
    C: RawChannel,
{
    match HeaderValue::from_str(value) {
        Ok(value) => {
            exchange.response_headers_mut().insert(name, value);
        }
        Err(_) => tracing::debug!(header = %name, "skipping invalid response header value"),
    }
}

fn echo_origin<C>(exchange: &mut Exchange<C>)
where
    C: RawChannel,
{
    let request = exchange.request_headers();
    let origin = request
        .get(headers::SEC_WEBSOCKET_ORIGIN)
        .or_else(|| request.get(header::ORIGIN))
        .cloned();
    if let Some(origin) = origin {
        exchange
            .response_headers_mut()
            .insert(headers::SEC_WEBSOCKET_ORIGIN, origin);
    }
}

fn echo_protocol<C>(exchange: &mut Exchange<C>)
where
    C: RawChannel,
{
    if let Some(protocol) = exchange
        .request_headers()
        .get(headers::SEC_WEBSOCKET_PROTOCOL)
        .cloned()
    {
        exchange
            .response_headers_mut()
            .insert(headers::SEC_WEBSOCKET_PROTOCOL, protocol);
    }
}

fn set_location<C>(exchange: &mut Exchange<C>)
where
    C: RawChannel,
{
    let location = websocket_location(exchange);
    put_header(exchange, headers::SEC_WEBSOCKET_LOCATION, &location);
}

/// Send the 101 response (and body, if any), then swap in the upgraded channel
fn perform_upgrade<C>(
    handshake: &Handshake,
    exchange: &mut Exchange<C>,
    body: Option<&[u8]>,
) -> Result<HandshakeStatus>
where
    C: RawChannel,
{
    exchange.set_status(StatusCode::SWITCHING_PROTOCOLS);
    let response = exchange.response_headers_mut();
    response.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
    response.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    exchange.prepare_upgrade(handshake.clone());

    if let Some(body) = body {
        if let Err(e) = exchange.output().write(body) {
            exchange.abort();
            return Err(e);
        }
    }
    exchange.output().close_async();

    Ok(HandshakeStatus::of(exchange))
}

/// Priority-ordered set of handshake variants
#[derive(Debug, Clone)]
pub struct Negotiator {
    handshakes: Vec<Handshake>,
}

impl Negotiator {
    /// Offer exchanges to `handshakes` in the given order
    pub fn new(handshakes: Vec<Handshake>) -> Self {
        Self { handshakes }
    }

    /// Build the variants enabled in `config`
    pub fn from_config(config: &Config) -> Self {
        let handshakes = config
            .versions
            .iter()
            .map(|&version| {
                Handshake::for_version(version)
                    .with_subprotocols(config.subprotocols.iter().cloned())
                    .with_extensions(config.allow_extensions)
            })
            .collect();
        Self::new(handshakes)
    }

    pub fn handshakes(&self) -> &[Handshake] {
        &self.handshakes
    }

    /// The first variant whose `matches` accepts the exchange
    pub fn select<C>(&self, exchange: &Exchange<C>) -> Option<&Handshake>
    where
        C: RawChannel,
    {
        self.handshakes.iter().find(|h| h.matches(exchange))
    }

    /// Run the selected handshake
    ///
    /// Returns `Ok(None)` if no variant matched; the exchange is untouched and
    /// can be served as a plain HTTP request.
    pub fn negotiate<C>(&self, exchange: &mut Exchange<C>) -> Result<Option<HandshakeStatus>>
    where
        C: RawChannel,
    {
        let Some(handshake) = self.select(exchange) else {
            tracing::trace!(path = %exchange.request_path(), "no handshake matched");
            return Ok(None);
        };

        tracing::debug!(
            version = %handshake.version(),
            path = %exchange.request_path(),
            "handshake selected"
        );
        handshake.handshake(exchange).map(Some)
    }
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
