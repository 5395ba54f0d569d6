//! AOL/P3 wire grammar.
//!
//! A P3 frame is a self-delimited unit starting with the magic byte `0x5A`:
//!
//! ```text
//! | magic (1B) | crc (2B) | len (2B, BE) | tx (1B) | rx (1B) | type (1B) | ... |
//! ```
//!
//! `len` counts the bytes after the first six, so the total frame size is
//! `6 + len`. DATA frames (`type & 0x7F == 0x20`) carry a two-byte token and a
//! two-byte stream id before the payload; control frames go straight to
//! payload. A 9-byte frame starting with the magic is the legacy keepalive
//! short form.
//!
//! This crate owns everything that touches frame bytes directly: the CRC and
//! hex helpers, the packet-type tables, the [`FrameSummary`] record emitted
//! for every recovered frame, the full/lite parsers, and the residual-carrying
//! [`FrameScanner`] that recovers frames from an arbitrary byte stream.

pub mod codec;
pub mod parser;
pub mod scanner;
pub mod summary;
pub mod types;

pub use parser::{parse, parse_lite};
pub use scanner::FrameScanner;
pub use summary::FrameSummary;
pub use types::{Direction, NakReason, PacketType};

/// Frame magic byte. Every P3 frame starts with it.
pub const FRAME_MAGIC: u8 = 0x5A;

/// Fixed bytes before the `len`-counted region: magic, crc, len, tx.
pub const FRAME_PREFIX_LEN: usize = 6;
