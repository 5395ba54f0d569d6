//! Application-level errors.

use p3tap_core::session::SessionError;
use p3tap_pcap::PcapError;
use p3tap_proxy::ProxyError;
use thiserror::Error;

/// Errors surfaced by the orchestrator and the CLI driver.
#[derive(Debug, Error)]
pub enum AppError {
    /// Session store failure.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Proxy could not be started.
    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// Offline extraction failure.
    #[error("extraction error: {0}")]
    Extract(#[from] PcapError),

    /// Invalid or incomplete command-line arguments.
    #[error("{0}")]
    Usage(String),

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
