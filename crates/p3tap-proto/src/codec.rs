//! Byte-level helpers: hex encoding, printable filtering, SHA-1, CRC-16/IBM.
//!
//! These are the primitives everything else leans on, so they stay allocation
//! predictable: one `String` sized up front per call, no intermediate buffers.

use sha1::{Digest, Sha1};

const HEX_LOWER: &[u8; 16] = b"0123456789abcdef";
const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Lowercase two-nibble hex of `buf[off..off + len]`.
///
/// An empty range yields an empty string. The range must be in bounds.
#[must_use]
pub fn bytes_to_hex_lower(buf: &[u8], off: usize, len: usize) -> String {
    encode_hex(&buf[off..off + len], HEX_LOWER)
}

/// Uppercase two-nibble hex of the whole buffer.
#[must_use]
pub fn bytes_to_hex_upper(buf: &[u8]) -> String {
    encode_hex(buf, HEX_UPPER)
}

fn encode_hex(bytes: &[u8], table: &[u8; 16]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(table[usize::from(b >> 4)] as char);
        out.push(table[usize::from(b & 0x0F)] as char);
    }
    out
}

/// Printable-ASCII filter over `buf[start..end]`.
///
/// Bytes in `0x20..=0x7E` map to themselves, everything else to `'.'`.
#[must_use]
pub fn printable(buf: &[u8], start: usize, end: usize) -> String {
    buf[start..end]
        .iter()
        .map(|&b| if (0x20..=0x7E).contains(&b) { b as char } else { '.' })
        .collect()
}

/// Lowercase SHA-1 hex of the US-ASCII encoding of `input`.
#[must_use]
pub fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    encode_hex(digest.as_slice(), HEX_LOWER)
}

/// CRC-16/IBM over `buf[off..off + len]`.
///
/// Reflected CRC, polynomial `0xA001`, initial value `0x0000`, no final XOR.
/// This is the variant the P3 wire format stamps into bytes 1-2 of every
/// frame.
#[must_use]
pub fn crc16_ibm(buf: &[u8], off: usize, len: usize) -> u16 {
    let mut crc: u16 = 0x0000;
    for &b in &buf[off..off + len] {
        crc ^= u16::from(b);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
