//! hybi-07 handshake, shared by hybi-08 and RFC 6455
//!
//! The accept token is computed from the request headers alone, so the whole
//! dialogue runs in one step.

use std::collections::BTreeSet;

use http::HeaderMap;

use super::headers::{SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION};
use super::{Handshake, HandshakeStatus, WebSocketVersion, proof};
use crate::channel::RawChannel;
use crate::error::{Error, Result};
use crate::exchange::Exchange;

/// Nonce handshake for one exact `Sec-WebSocket-Version` token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hybi07Handshake {
    pub(super) version: WebSocketVersion,
    pub(super) hash_algorithm: String,
    pub(super) subprotocols: BTreeSet<String>,
    pub(super) allow_extensions: bool,
}

impl Hybi07Handshake {
    pub fn new(version: WebSocketVersion) -> Self {
        Self {
            version,
            hash_algorithm: String::from("SHA1"),
            subprotocols: BTreeSet::new(),
            allow_extensions: false,
        }
    }

    /// A nonce is present and the version token equals ours
    pub(super) fn matches(&self, headers: &HeaderMap) -> bool {
        if !headers.contains_key(SEC_WEBSOCKET_KEY) {
            return false;
        }
        headers
            .get(SEC_WEBSOCKET_VERSION)
            .is_some_and(|v| v.as_bytes() == self.version.to_http_header_value().as_bytes())
    }
}

pub(super) fn handshake<C>(
    handshake: &Handshake,
    exchange: &mut Exchange<C>,
) -> Result<HandshakeStatus>
where
    C: RawChannel,
{
    super::echo_origin(exchange);
    super::echo_protocol(exchange);
    super::set_location(exchange);

    let accept = match exchange.request_header(&SEC_WEBSOCKET_KEY) {
        Some(nonce) => proof::solve_nonce(handshake.hash_algorithm(), crate::WS_GUID, nonce),
        None => Err(Error::Format("Sec-WebSocket-Key is not valid text")),
    };
    let accept = match accept {
        Ok(accept) => accept,
        Err(e) => {
            tracing::warn!(
                error = %e,
                version = %handshake.version(),
                "cannot compute accept token"
            );
            exchange.abort();
            return Err(e);
        }
    };

    super::put_header(exchange, SEC_WEBSOCKET_ACCEPT, &accept);
    super::perform_upgrade(handshake, exchange, None)
}
