//! Live man-in-the-middle TCP proxy.
//!
//! Clients connect to the listen port; each accepted connection dials the
//! real upstream and two pipe tasks shuttle bytes between the peers, one per
//! direction. Forwarding always happens before parsing: every chunk is
//! written through unchanged, then a copy runs through that direction's
//! frame scanner and each recovered frame is published on the live bus with
//! the connection's identity attached.

mod error;
mod proxy;

pub use error::ProxyError;
pub use proxy::{Proxy, ProxyConfig};
