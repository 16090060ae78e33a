//! Upgraded WebSocket channel
//!
//! This module provides the `WebSocketChannel` type handed out once a
//! handshake completed. It owns the raw connection the HTTP exchange gave up,
//! along with everything a frame codec needs to take over from there.

use std::collections::BTreeSet;
use std::fmt;

use crate::alloc::BufferPool;
use crate::channel::RawChannel;
use crate::handshake::WebSocketVersion;

/// A full-duplex channel produced by a successful upgrade
pub struct WebSocketChannel<C> {
    version: WebSocketVersion,
    raw: C,
    pool: BufferPool,
    location: String,
    subprotocols: BTreeSet<String>,
    allow_extensions: bool,
}

impl<C: RawChannel> WebSocketChannel<C> {
    /// Wrap an already-upgraded connection
    pub fn new(
        version: WebSocketVersion,
        raw: C,
        pool: BufferPool,
        location: String,
        subprotocols: BTreeSet<String>,
        allow_extensions: bool,
    ) -> Self {
        Self {
            version,
            raw,
            pool,
            location,
            subprotocols,
            allow_extensions,
        }
    }

    /// Protocol generation negotiated by the handshake
    pub fn version(&self) -> WebSocketVersion {
        self.version
    }

    /// The `ws://` or `wss://` URI the client connected to
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Sub-protocols the server is willing to speak
    pub fn subprotocols(&self) -> &BTreeSet<String> {
        &self.subprotocols
    }

    /// Whether extension negotiation is permitted
    pub fn allow_extensions(&self) -> bool {
        self.allow_extensions
    }

    /// Buffer pool shared with the connection
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    #[inline]
    pub fn is_secure(&self) -> bool {
        self.raw.is_secure()
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.raw.is_open()
    }

    /// Force-close the underlying connection
    pub fn close(&mut self) {
        tracing::debug!(location = %self.location, "closing websocket channel");
        self.raw.close();
    }

    /// Get a reference to the underlying channel
    pub fn get_ref(&self) -> &C {
        &self.raw
    }

    /// Get a mutable reference to the underlying channel
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.raw
    }

    /// Consume the WebSocket channel and return the underlying channel
    pub fn into_inner(self) -> C {
        self.raw
    }
}

impl<C> fmt::Debug for WebSocketChannel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketChannel")
            .field("version", &self.version)
            .field("location", &self.location)
            .field("subprotocols", &self.subprotocols)
            .field("allow_extensions", &self.allow_extensions)
            .finish_non_exhaustive()
    }
}
