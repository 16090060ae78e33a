//! Error types for the upgrade core

use std::io;

use thiserror::Error;

/// Result type alias for upgrade and output operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the handshake negotiator and the output pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying channel
    #[error("I/O error: {0}")]
    Io(io::Error),
    /// Malformed legacy handshake key
    #[error("malformed handshake key: {0}")]
    Format(&'static str),
    /// The requested hash algorithm is not implemented
    #[error("hash algorithm unavailable: {0}")]
    AlgorithmUnavailable(String),
    /// Write or flush after close
    #[error("stream is closed")]
    StreamClosed,
    /// Operation not permitted in the current state
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
    /// Peer closed the connection, or it was torn down mid-transfer
    #[error("connection aborted")]
    ConnectionAborted,
}

impl Error {
    /// Returns true if the error ends the current exchange
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::AlgorithmUnavailable(_) | Error::ConnectionAborted
        )
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => Error::ConnectionAborted,
            _ => Error::Io(e),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::ConnectionAborted => {
                io::Error::new(io::ErrorKind::ConnectionAborted, "connection aborted")
            }
            Error::Format(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            other => io::Error::other(other.to_string()),
        }
    }
}
