//! The summary record emitted for every recovered frame.
//!
//! One `FrameSummary` serializes to one JSONL line. Absent fields are absent
//! from the output, never `null`; field names follow the external contract,
//! so consumers see `dir`, `ts`, `type`, `typeName`, `streamId` and friends
//! regardless of Rust naming.

use serde::Serialize;

use crate::types::Direction;

/// Structured summary of a single P3 frame.
///
/// Built by [`crate::parser::parse`] (full mode) or
/// [`crate::parser::parse_lite`] (lite mode); the proxy adds connection
/// attribution, the extractor adds the dedup `ref`. The enrichment fields at
/// the end are only ever filled by external adapters (token dictionaries,
/// FDO decompilation) and stay empty inside the core.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSummary {
    /// Travel direction of the frame.
    pub dir: Direction,

    /// Capture timestamp, decimal seconds since epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,

    /// Two printable token characters, `0xXXXX` hex, or `9B` for the
    /// keepalive short form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Stream id of DATA frames, `0xXXXX` hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,

    /// Raw type byte, `0xNN` upper hex.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub packet_type: Option<String>,

    /// Type family name; absent when the family is unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,

    /// Transmit sequence byte. Decimal string in full mode, `0xNN` in lite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<String>,

    /// Receive sequence byte. Decimal string in full mode, `0xNN` in lite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rx: Option<String>,

    /// On-wire payload length field.
    pub len: u32,

    /// Whether any of the CRC interpretations matched. Full mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc_ok: Option<bool>,

    /// NAK reason name, when the frame is a NAK with a payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nak_reason: Option<String>,

    /// Lowercase hex of the whole frame. Dropped for large frames once a
    /// dedup `ref` is assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_hex: Option<String>,

    /// SHA-1 of `full_hex`, assigned by the dedup pass.
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub dedup_ref: Option<String>,

    /// Up to 256 payload bytes, lowercase hex. Full mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_hex: Option<String>,

    /// Up to 96 payload bytes through the printable filter. Full mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_text: Option<String>,

    /// Printable preview of "AT" frames, up to 64 payload bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,

    /// Set when any error code is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_error: Option<bool>,

    /// Comma-joined set of error codes, e.g. `CRC`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_codes: Option<String>,

    /// Identity of the proxied connection that produced the frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,

    /// Peer address of the accepted socket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,

    /// Peer port of the accepted socket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_port: Option<u16>,

    /// Adapter enrichment: coarse protocol tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_tag: Option<String>,

    /// Adapter enrichment: token dictionary name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_name: Option<String>,

    /// Adapter enrichment: token dictionary description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_desc: Option<String>,

    /// Adapter enrichment: documentation reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_ref: Option<String>,

    /// Adapter enrichment: decoded FDO atom stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atoms: Option<String>,

    /// Adapter enrichment: decompiled FDO source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fdo_source: Option<String>,
}

impl FrameSummary {
    /// Empty summary for a direction; `len` starts at zero.
    #[must_use]
    pub fn new(dir: Direction) -> Self {
        Self {
            dir,
            ts: None,
            token: None,
            stream_id: None,
            packet_type: None,
            type_name: None,
            tx: None,
            rx: None,
            len: 0,
            crc_ok: None,
            nak_reason: None,
            full_hex: None,
            dedup_ref: None,
            payload_hex: None,
            payload_text: None,
            preview: None,
            has_error: None,
            error_codes: None,
            connection_id: None,
            source_ip: None,
            source_port: None,
            protocol_tag: None,
            token_name: None,
            token_desc: None,
            doc_ref: None,
            atoms: None,
            fdo_source: None,
        }
    }

    /// Add an error code to the comma-joined set and flip `has_error`.
    ///
    /// Codes are not duplicated.
    pub fn add_error_code(&mut self, code: &str) {
        self.has_error = Some(true);
        match &mut self.error_codes {
            None => self.error_codes = Some(code.to_string()),
            Some(existing) => {
                if !existing.split(',').any(|c| c == code) {
                    existing.push(',');
                    existing.push_str(code);
                }
            },
        }
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_are_absent() {
        let summary = FrameSummary::new(Direction::ClientToServer);
        let json = summary.to_json().expect("serializes");
        assert_eq!(json, "{\"dir\":\"C->S\",\"len\":0}");
    }

    #[test]
    fn contract_field_names() {
        let mut summary = FrameSummary::new(Direction::ServerToClient);
        summary.ts = Some("1.000000".to_string());
        summary.token = Some("At".to_string());
        summary.stream_id = Some("0x2a00".to_string());
        summary.packet_type = Some("0x20".to_string());
        summary.type_name = Some("DATA".to_string());
        summary.crc_ok = Some(true);
        summary.full_hex = Some("5a".to_string());
        summary.dedup_ref = Some("abc".to_string());
        summary.connection_id = Some("deadbeef".to_string());
        summary.source_port = Some(4242);

        let json = summary.to_json().expect("serializes");
        for key in [
            "\"dir\":\"S->C\"",
            "\"ts\":",
            "\"token\":\"At\"",
            "\"streamId\":\"0x2a00\"",
            "\"type\":\"0x20\"",
            "\"typeName\":\"DATA\"",
            "\"crcOk\":true",
            "\"fullHex\":\"5a\"",
            "\"ref\":\"abc\"",
            "\"connectionId\":\"deadbeef\"",
            "\"sourcePort\":4242",
        ] {
            assert!(json.contains(key), "missing {key} in {json}");
        }
        assert!(!json.contains("null"), "no null values allowed: {json}");
    }

    #[test]
    fn error_codes_form_a_set() {
        let mut summary = FrameSummary::new(Direction::ClientToServer);
        summary.add_error_code("CRC");
        summary.add_error_code("CRC");
        assert_eq!(summary.error_codes.as_deref(), Some("CRC"));
        assert_eq!(summary.has_error, Some(true));

        summary.add_error_code("LEN");
        assert_eq!(summary.error_codes.as_deref(), Some("CRC,LEN"));
    }
}
