//! Error types for muxwire.

use thiserror::Error;

/// Main error type for all muxwire operations.
#[derive(Debug, Error)]
pub enum MuxwireError {
    /// I/O error on the underlying stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Resolution failed or every candidate endpoint refused the connection.
    ///
    /// Recoverable: the caller may retry with its own backoff policy.
    #[error("connect to {host}:{port} failed: {source}")]
    Connect {
        /// Host that was being resolved.
        host: String,
        /// Port that was being connected to.
        port: u16,
        /// The last underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// Malformed inbound data (bad declared length, garbled header).
    ///
    /// Fatal for the connection: framing is assumed desynchronized.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A frame (header included) exceeds the configured maximum size.
    #[error("frame of {length} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Declared or requested frame size.
        length: usize,
        /// The limit in force.
        max: usize,
    },

    /// The connection is down; the request was not (or will never be) answered.
    #[error("connection closed")]
    ConnectionClosed,

    /// The write queue stayed full past the configured timeout.
    #[error("write queue full")]
    Backpressure,
}

/// Result type alias using MuxwireError.
pub type Result<T> = std::result::Result<T, MuxwireError>;
