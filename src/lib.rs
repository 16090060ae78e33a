//! # Sockudo-Upgrade: non-blocking WebSocket upgrade core
//!
//! The piece of an embeddable HTTP server that turns an in-flight request into
//! a WebSocket channel, plus the pooled output pipeline every response body
//! (including the upgrade response) is written through.
//!
//! ## Features
//!
//! - **Two protocol generations**: hybi-00 numeric keys (MD5) and the
//!   hybi-07/08/RFC 6455 nonce handshake (SHA-1 + GUID)
//! - **Partial I/O resumption**: key bytes and response writes that cannot
//!   complete right away park on one-shot readiness listeners
//! - **Pooled buffers**: response bodies are coalesced in leased buffers that
//!   go back to the pool exactly once
//! - **Runtime agnostic core**: any non-blocking [`RawChannel`] works; a tokio
//!   TCP adapter ships behind the `tokio-runtime` feature
//!
//! ## Example
//!
//! ```ignore
//! use sockudo_upgrade::prelude::*;
//! use sockudo_upgrade::net::{TcpChannel, drive};
//!
//! let config = Config::default();
//! let negotiator = Negotiator::from_config(&config);
//! let pool = BufferPool::from_config(&config);
//!
//! let mut exchange = Exchange::new(TcpChannel::new(stream), pool.clone());
//! // ... fill in the parsed request target and headers ...
//! match negotiator.negotiate(&mut exchange)? {
//!     Some(_) => {
//!         drive(&mut exchange).await?;
//!         if let Some(ws) = exchange.take_upgraded() {
//!             // hand `ws` to a frame codec
//!         }
//!     }
//!     None => {
//!         // plain HTTP request
//!         exchange.output().write(b"hello")?;
//!         exchange.output().close()?;
//!     }
//! }
//! ```

pub mod alloc;
pub mod channel;
pub mod error;
pub mod exchange;
pub mod handshake;
pub mod output;
pub mod stream;

#[cfg(feature = "tokio-runtime")]
pub mod net;

pub use alloc::{BufferPool, PooledBuffer};
pub use channel::{Progress, RawChannel};
pub use error::{Error, Result};
pub use exchange::{Exchange, ExchangeState, ReadinessListener};
pub use handshake::{Handshake, HandshakeStatus, Negotiator, WebSocketVersion};
pub use output::Output;
pub use stream::WebSocketChannel;

/// Default pooled buffer size (16KB)
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Default number of idle buffers kept by a pool
pub const DEFAULT_MAX_CACHED_BUFFERS: usize = 64;

/// WebSocket GUID for handshake
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Configuration for upgrade negotiation and response output
///
/// # Example
///
/// ```
/// use sockudo_upgrade::{Config, WebSocketVersion};
///
/// let config = Config::builder()
///     .buffer_size(8 * 1024)
///     .versions([WebSocketVersion::V13, WebSocketVersion::V00])
///     .subprotocol("chat")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of each pooled response buffer (default: 16KB)
    pub buffer_size: usize,
    /// Idle buffers a pool keeps for reuse (default: 64)
    pub max_cached_buffers: usize,
    /// Enabled protocol generations in priority order (default: newest first)
    pub versions: Vec<WebSocketVersion>,
    /// Sub-protocols passed to upgraded channels
    pub subprotocols: Vec<String>,
    /// Let 07+ channels negotiate extensions (default: false)
    pub allow_extensions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_cached_buffers: DEFAULT_MAX_CACHED_BUFFERS,
            versions: vec![
                WebSocketVersion::V13,
                WebSocketVersion::V08,
                WebSocketVersion::V07,
                WebSocketVersion::V00,
            ],
            subprotocols: Vec::new(),
            allow_extensions: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for [`Config`]
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the pooled buffer capacity
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Set how many idle buffers a pool keeps
    pub fn max_cached_buffers(mut self, count: usize) -> Self {
        self.config.max_cached_buffers = count;
        self
    }

    /// Replace the enabled protocol generations, highest priority first
    pub fn versions<I>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = WebSocketVersion>,
    {
        self.config.versions = versions.into_iter().collect();
        self
    }

    /// Add a sub-protocol
    pub fn subprotocol(mut self, name: impl Into<String>) -> Self {
        self.config.subprotocols.push(name.into());
        self
    }

    /// Enable or disable extension negotiation
    pub fn allow_extensions(mut self, enabled: bool) -> Self {
        self.config.allow_extensions = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::Config;
    pub use crate::alloc::BufferPool;
    pub use crate::channel::{Progress, RawChannel};
    pub use crate::error::{Error, Result};
    pub use crate::exchange::{Exchange, ExchangeState};
    pub use crate::handshake::{Handshake, HandshakeStatus, Negotiator, WebSocketVersion};
    pub use crate::stream::WebSocketChannel;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.buffer_size, 16 * 1024);
        assert_eq!(config.max_cached_buffers, 64);
        assert_eq!(config.versions.first(), Some(&WebSocketVersion::V13));
        assert_eq!(config.versions.last(), Some(&WebSocketVersion::V00));
        assert!(!config.allow_extensions);
    }

    #[test]
    fn test_builder() {
        let config = Config::builder()
            .buffer_size(4096)
            .max_cached_buffers(8)
            .versions([WebSocketVersion::V07])
            .subprotocol("chat")
            .subprotocol("superchat")
            .allow_extensions(true)
            .build();

        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.max_cached_buffers, 8);
        assert_eq!(config.versions, [WebSocketVersion::V07]);
        assert_eq!(config.subprotocols, ["chat", "superchat"]);
        assert!(config.allow_extensions);
    }
}
