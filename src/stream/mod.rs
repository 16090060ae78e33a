//! Post-upgrade channel
//!
//! A successful handshake detaches the raw connection from its HTTP exchange
//! and wraps it in a [`WebSocketChannel`]. Frame encoding and decoding on
//! top of that channel live outside this crate.

mod websocket;

pub use websocket::WebSocketChannel;
