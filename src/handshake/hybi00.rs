//! hybi-00 handshake
//!
//! The client sends two numeric keys in headers and eight more key bytes
//! after the request head. Those bytes may trickle in over several reads, so
//! the dialogue parks itself as a read listener until all eight arrived.

use std::collections::BTreeSet;

use http::HeaderMap;

use super::headers::{SEC_WEBSOCKET_KEY1, SEC_WEBSOCKET_KEY2};
use super::{Handshake, HandshakeStatus, proof};
use crate::channel::{Progress, RawChannel};
use crate::error::Result;
use crate::exchange::{Exchange, ReadinessListener};

/// Number of raw key bytes following the request head
const KEY3_LEN: usize = 8;

/// Numeric-key handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hybi00Handshake {
    pub(super) hash_algorithm: String,
    pub(super) subprotocols: BTreeSet<String>,
}

impl Hybi00Handshake {
    pub fn new() -> Self {
        Self {
            hash_algorithm: String::from("MD5"),
            subprotocols: BTreeSet::new(),
        }
    }

    /// Both legacy key headers are present
    pub(super) fn matches(&self, headers: &HeaderMap) -> bool {
        headers.contains_key(SEC_WEBSOCKET_KEY1) && headers.contains_key(SEC_WEBSOCKET_KEY2)
    }
}

impl Default for Hybi00Handshake {
    fn default() -> Self {
        Self::new()
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
    super::set_location(exchange);
    super::echo_protocol(exchange);

    let keys = decode_header(exchange, &SEC_WEBSOCKET_KEY1)
        .and_then(|key1| Ok((key1, decode_header(exchange, &SEC_WEBSOCKET_KEY2)?)));
    let (key1, key2) = match keys {
        Ok(keys) => keys,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting legacy key");
            exchange.abort();
            return Err(e);
        }
    };

    KeyBytes {
        handshake: handshake.clone(),
        key1,
        key2,
        accumulator: KeyAccumulator::default(),
    }
    .resume(exchange)
}

fn decode_header<C>(exchange: &Exchange<C>, name: &http::HeaderName) -> Result<u64>
where
    C: RawChannel,
{
    let value = exchange
        .request_header(name)
        .ok_or(crate::Error::Format("legacy key is not valid text"))?;
    proof::decode_key(value)
}

/// Fixed-capacity store for the eight trailing key bytes
#[derive(Debug, Default)]
struct KeyAccumulator {
    bytes: [u8; KEY3_LEN],
    filled: usize,
}

impl KeyAccumulator {
    fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[self.filled..]
    }

    fn advance(&mut self, n: usize) {
        self.filled = (self.filled + n).min(KEY3_LEN);
    }

    fn is_full(&self) -> bool {
        self.filled == KEY3_LEN
    }
}

/// Resumable read of the trailing key bytes
#[derive(Debug)]
struct KeyBytes {
    handshake: Handshake,
    key1: u64,
    key2: u64,
    accumulator: KeyAccumulator,
}

impl KeyBytes {
    fn resume<C>(mut self, exchange: &mut Exchange<C>) -> Result<HandshakeStatus>
    where
        C: RawChannel,
    {
        let channel = match exchange.raw_channel_mut() {
            Ok(channel) => channel,
            Err(e) => {
                exchange.abort();
                return Err(e);
            }
        };

        while !self.accumulator.is_full() {
            match channel.read(self.accumulator.unfilled_mut()) {
                Ok(Progress::Transferred(n)) => self.accumulator.advance(n),
                Ok(Progress::WouldBlock) => {
                    tracing::debug!(received = self.accumulator.filled, "waiting for key bytes");
                    channel.resume_reads();
                    exchange.set_read_listener(Box::new(self));
                    return Ok(HandshakeStatus::Pending);
                }
                Ok(Progress::Closed) => {
                    tracing::debug!(
                        received = self.accumulator.filled,
                        "peer closed during handshake"
                    );
                    exchange.abort();
                    return Ok(HandshakeStatus::Aborted);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "key bytes read failed");
                    exchange.abort();
                    return Ok(HandshakeStatus::Aborted);
                }
            }
        }
        channel.suspend_reads();

        let digest = match proof::solve_legacy_decoded(
            self.handshake.hash_algorithm(),
            self.key1,
            self.key2,
            &self.accumulator.bytes,
        ) {
            Ok(digest) => digest,
            Err(e) => {
                tracing::warn!(error = %e, "cannot compute handshake response");
                exchange.abort();
                return Err(e);
            }
        };

        super::perform_upgrade(&self.handshake, exchange, Some(&digest))
    }
}

impl<C: RawChannel> ReadinessListener<C> for KeyBytes {
    fn on_ready(self: Box<Self>, exchange: &mut Exchange<C>) {
        if let Err(e) = (*self).resume(exchange) {
            tracing::debug!(error = %e, "handshake failed after resume");
        }
    }
}
