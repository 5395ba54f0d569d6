//! Residual-carrying frame scanner.
//!
//! The scanner turns an arbitrary sequence of byte chunks into complete
//! frames. Bytes that do not yet form a complete frame are carried as the
//! residual and re-scanned when the next chunk arrives, so the emitted frame
//! sequence is independent of how the stream was split into chunks.
//!
//! Each direction of each connection (or each reassembled PCAP stream) owns
//! its own scanner; residuals never mix across directions.

use bytes::{Buf, BytesMut};

use crate::{FRAME_MAGIC, FRAME_PREFIX_LEN};

/// Bytes needed past the magic before the generic scan can commit to a frame.
const MIN_SCAN_WINDOW: usize = 10;

/// Frame scanner for one direction of one byte stream.
#[derive(Debug, Default)]
pub struct FrameScanner {
    residual: BytesMut,
}

impl FrameScanner {
    /// New scanner with an empty residual.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current residual size in bytes.
    #[must_use]
    pub fn residual_len(&self) -> usize {
        self.residual.len()
    }

    /// Drop any buffered residual.
    pub fn clear(&mut self) {
        self.residual.clear();
    }

    /// Feed a chunk and emit every complete frame found.
    ///
    /// `on_frame` receives the exact byte range of each frame, magic byte
    /// included. Unframed bytes before a magic are discarded; an incomplete
    /// trailing frame is retained for the next call.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_frame: F)
    where
        F: FnMut(&[u8]),
    {
        self.residual.extend_from_slice(chunk);

        let buf = &self.residual[..];
        let mut cursor = 0;

        loop {
            let Some(found) = buf[cursor..].iter().position(|&b| b == FRAME_MAGIC) else {
                // No magic anywhere; everything so far is noise.
                cursor = buf.len();
                break;
            };
            let start = cursor + found;
            let remaining = buf.len() - start;

            // Legacy 9-byte short form: len == 3 with the direction bit and
            // DATA-range high nibble set on the type byte.
            if remaining >= 9 {
                let len_field = usize::from(u16::from_be_bytes([buf[start + 3], buf[start + 4]]));
                if len_field == 3 && buf[start + 7] & 0xF0 == 0xA0 {
                    on_frame(&buf[start..start + 9]);
                    cursor = start + 9;
                    continue;
                }
            }

            if remaining < MIN_SCAN_WINDOW {
                cursor = start;
                break;
            }

            let len_field = usize::from(u16::from_be_bytes([buf[start + 3], buf[start + 4]]));
            let total = FRAME_PREFIX_LEN + len_field;
            if remaining < total {
                cursor = start;
                break;
            }

            on_frame(&buf[start..start + total]);
            cursor = start + total;
        }

        self.residual.advance(cursor);
    }
}
