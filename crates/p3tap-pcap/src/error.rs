//! Error types for the offline pipeline.

use std::io;

use thiserror::Error;

/// Errors raised while reading a capture or writing its summaries.
#[derive(Debug, Error)]
pub enum PcapError {
    /// The file magic matches neither classic-PCAP byte order.
    #[error("unrecognized capture magic {0:02x?}")]
    UnrecognizedMagic([u8; 4]),

    /// The file is a pcapng capture, which this reader does not speak.
    #[error("pcapng captures are not supported; convert to classic pcap first")]
    PcapNgUnsupported,

    /// The 24-byte file header could not be read in full.
    #[error("truncated capture file header")]
    TruncatedHeader,

    /// A record body ended before its declared length.
    #[error("truncated record: expected {expected} bytes, got {actual}")]
    TruncatedRecord {
        /// Bytes the record header declared.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Underlying file or sink I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
