//! Proxy error types.

use std::io;

use thiserror::Error;

/// Errors that prevent the proxy from starting.
///
/// Per-connection failures (dial errors, resets mid-stream) are not errors
/// of the proxy; they close the affected connection and the acceptor keeps
/// going.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The listen socket could not be bound.
    #[error("failed to listen on port {port}: {source}")]
    Bind {
        /// Requested listen port.
        port: u16,
        /// Underlying bind error.
        source: io::Error,
    },

    /// Other socket-level failure during startup.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
