//! Canonical P3 frame decoder.
//!
//! One structural parse, two cost modes. [`parse`] is the full decoder used
//! on the offline path: CRC validation, capture-timestamp formatting, payload
//! sampling, AT previews. [`parse_lite`] is the hot-path variant used by the
//! live proxy: structural fields only, wall clock for the timestamp.
//!
//! Both tolerate any input length, including zero. A summary always comes
//! back; short or garbage input just leaves the structured fields empty.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    FRAME_MAGIC, FRAME_PREFIX_LEN,
    codec::{bytes_to_hex_lower, crc16_ibm, printable},
    summary::FrameSummary,
    types::{Direction, NakReason, PacketType},
};

/// Most payload bytes sampled into `payloadHex`.
const PAYLOAD_HEX_SAMPLE: usize = 256;
/// Most payload bytes filtered into `payloadText`.
const PAYLOAD_TEXT_SAMPLE: usize = 96;
/// Most payload bytes rendered into an AT `preview`.
const PREVIEW_SAMPLE: usize = 64;

/// Full parse of `buf[off..off + length]`.
///
/// `ts_sec`/`ts_usec` are the capture timestamp; it is rendered with
/// microsecond precision. Performs the four-way CRC check and payload
/// sampling on top of the structural parse.
#[must_use]
pub fn parse(
    direction: Direction,
    ts_sec: u64,
    ts_usec: u32,
    buf: &[u8],
    off: usize,
    length: usize,
) -> FrameSummary {
    let mut summary = parse_structural(direction, buf, off, length, Mode::Full);
    summary.ts = Some(format!("{ts_sec}.{ts_usec:06}"));

    if length >= FRAME_PREFIX_LEN {
        check_crc(&mut summary, buf, off, length);
        sample_payload(&mut summary, buf, off, length);
    }

    summary
}

/// Lite parse of `buf[off..off + length]`.
///
/// Skips CRC and payload sampling; the timestamp is the current wall clock
/// in decimal seconds with millisecond precision.
#[must_use]
pub fn parse_lite(direction: Direction, buf: &[u8], off: usize, length: usize) -> FrameSummary {
    let mut summary = parse_structural(direction, buf, off, length, Mode::Lite);
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    summary.ts = Some(format!("{}.{:03}", now_ms / 1000, now_ms % 1000));
    summary
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Full,
    Lite,
}

/// Structural parse shared by both modes.
///
/// Field offsets: magic 0, crc 1-2, len 3-4 (BE), tx 5, rx 6, type 7, then
/// for DATA frames token 8-9 and stream id 10-11.
fn parse_structural(
    direction: Direction,
    buf: &[u8],
    off: usize,
    length: usize,
    mode: Mode,
) -> FrameSummary {
    let mut summary = FrameSummary::new(direction);

    if length < FRAME_PREFIX_LEN {
        return summary;
    }

    let frame = &buf[off..off + length];

    summary.len = u32::from(u16::from_be_bytes([frame[3], frame[4]]));
    summary.full_hex = Some(bytes_to_hex_lower(buf, off, length));

    summary.tx = Some(render_seq_byte(frame[5], mode));
    if length > 6 {
        summary.rx = Some(render_seq_byte(frame[6], mode));
    }

    let mut family = None;
    if length > 7 {
        let type_byte = frame[7];
        summary.packet_type = Some(format!("0x{type_byte:02X}"));
        family = PacketType::from_type_byte(type_byte);
        summary.type_name = family.map(|f| f.name().to_string());
    }

    if length == 9 && frame[0] == FRAME_MAGIC {
        // Legacy keepalive short form; no token or stream id fields exist.
        summary.token = Some("9B".to_string());
    } else if length >= 10 && frame[0] == FRAME_MAGIC && family == Some(PacketType::Data) {
        summary.token = Some(render_token(frame[8], frame[9]));
        if length >= 12 {
            summary.stream_id = Some(format!("0x{:02x}{:02x}", frame[10], frame[11]));
        }
    }

    if family == Some(PacketType::Nak) && length > 8 {
        summary.nak_reason = Some(NakReason::from_code(frame[8]).to_string());
    }

    summary
}

fn render_seq_byte(value: u8, mode: Mode) -> String {
    match mode {
        Mode::Full => value.to_string(),
        Mode::Lite => format!("0x{value:02x}"),
    }
}

/// Two printable ASCII characters, else lowercase `0xXXXX`.
fn render_token(a: u8, b: u8) -> String {
    if (0x20..=0x7E).contains(&a) && (0x20..=0x7E).contains(&b) {
        let mut token = String::with_capacity(2);
        token.push(a as char);
        token.push(b as char);
        token
    } else {
        format!("0x{a:02x}{b:02x}")
    }
}

/// Four-way CRC acceptance.
///
/// The corpus carries two generations of traffic which disagree on the
/// checksummed range and on the byte order of the CRC field, so a frame is
/// valid when any of the four interpretations matches: CRC over bytes 3..end
/// ("variant A") or 5..end ("variant B"), against the big-endian or
/// little-endian reading of bytes 1-2.
fn check_crc(summary: &mut FrameSummary, buf: &[u8], off: usize, length: usize) {
    let stored_be = u16::from_be_bytes([buf[off + 1], buf[off + 2]]);
    let stored_le = u16::from_le_bytes([buf[off + 1], buf[off + 2]]);

    let variant_a = crc16_ibm(buf, off + 3, length - 3);
    let variant_b = crc16_ibm(buf, off + 5, length - 5);

    let ok = variant_a == stored_be
        || variant_a == stored_le
        || variant_b == stored_be
        || variant_b == stored_le;

    summary.crc_ok = Some(ok);
    if !ok {
        summary.add_error_code("CRC");
    }
}

fn sample_payload(summary: &mut FrameSummary, buf: &[u8], off: usize, length: usize) {
    if length <= FRAME_PREFIX_LEN {
        return;
    }

    let sampled = (length - FRAME_PREFIX_LEN).min(PAYLOAD_HEX_SAMPLE);
    summary.payload_hex = Some(bytes_to_hex_lower(buf, off + FRAME_PREFIX_LEN, sampled));

    let text_len = sampled.min(PAYLOAD_TEXT_SAMPLE);
    summary.payload_text = Some(printable(
        buf,
        off + FRAME_PREFIX_LEN,
        off + FRAME_PREFIX_LEN + text_len,
    ));

    if summary.token.as_deref() == Some("AT") && length > 12 {
        let preview_len = (length - 12).min(PREVIEW_SAMPLE);
        summary.preview = Some(printable(buf, off + 12, off + 12 + preview_len));
    }
}
