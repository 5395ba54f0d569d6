//! Offline P3 frame recovery from packet captures.
//!
//! The pipeline runs strictly sequentially on one task:
//!
//! ```text
//! PcapReader → LinkDecoder → TcpReassembler (per stream key)
//!            → FrameScanner (per stream key) → parser → sink
//! ```
//!
//! Classic PCAP only, both byte orders. Per-packet decode problems skip the
//! packet; container-level problems (bad magic, truncated headers) fail the
//! whole extraction.

pub mod error;
pub mod extract;
pub mod link;
pub mod reader;
pub mod reassembly;

pub use error::PcapError;
pub use extract::{ExtractOptions, ExtractStats, extract_pcap};
pub use link::{LinkDecoder, LinkStats, TcpSegment};
pub use reader::{PcapReader, PcapRecord};
pub use reassembly::{StreamKey, TcpReassembler};

/// Historical AOL service port; the default server port filter.
pub const DEFAULT_SERVER_PORT: u16 = 5190;
