//! Packet classification tables: direction, type families, NAK reasons.

use std::fmt;

use serde::Serialize;

/// Which way a frame travelled through the tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// Client to server.
    #[serde(rename = "C->S")]
    ClientToServer,
    /// Server to client.
    #[serde(rename = "S->C")]
    ServerToClient,
}

impl Direction {
    /// Wire rendering used in summary lines.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientToServer => "C->S",
            Self::ServerToClient => "S->C",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known P3 type families, keyed by the low 7 bits of the type byte.
///
/// The high bit of the type byte is a direction flag and does not take part
/// in classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Application data; carries token and stream id.
    Data,
    /// Session init.
    Init,
    /// Acknowledgement.
    Ack,
    /// Negative acknowledgement; first payload byte is the reason.
    Nak,
    /// Heartbeat.
    Hbeat,
    /// Session reset.
    Reset,
    /// Resume-after-NAK.
    Rak,
    /// Link setup.
    Setup,
    /// Immediate acknowledgement.
    Acknow,
}

impl PacketType {
    /// Low-7-bit family value of DATA packets.
    pub const DATA_FAMILY: u8 = 0x20;

    /// Classify a type byte. The direction bit is masked off first.
    #[must_use]
    pub fn from_type_byte(type_byte: u8) -> Option<Self> {
        match type_byte & 0x7F {
            0x20 => Some(Self::Data),
            0x23 => Some(Self::Init),
            0x24 => Some(Self::Ack),
            0x25 => Some(Self::Nak),
            0x26 => Some(Self::Hbeat),
            0x28 => Some(Self::Reset),
            0x29 => Some(Self::Rak),
            0x2A => Some(Self::Setup),
            0x2B => Some(Self::Acknow),
            _ => None,
        }
    }

    /// Family name as it appears in summary lines.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Init => "INIT",
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Hbeat => "HBEAT",
            Self::Reset => "RESET",
            Self::Rak => "RAK",
            Self::Setup => "SETUP",
            Self::Acknow => "ACKNOW",
        }
    }
}

/// Reason byte carried in the first payload byte of a NAK frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NakReason {
    /// Peer saw a CRC mismatch.
    CrcError,
    /// Peer saw an out-of-sequence frame.
    SequenceError,
    /// Peer saw a bad length field.
    LengthError,
    /// Peer failed to build a packet.
    PacketBuildError,
    /// Reason byte outside the documented set.
    Unknown(u8),
}

impl NakReason {
    /// Classify a reason byte.
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::CrcError,
            0x02 => Self::SequenceError,
            0x03 => Self::LengthError,
            0x04 => Self::PacketBuildError,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for NakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CrcError => f.write_str("CRC_ERROR"),
            Self::SequenceError => f.write_str("SEQUENCE_ERROR"),
            Self::LengthError => f.write_str("LENGTH_ERROR"),
            Self::PacketBuildError => f.write_str("PACKET_BUILD_ERROR"),
            Self::Unknown(code) => write!(f, "UNKNOWN_0x{code:02X}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_rendering() {
        assert_eq!(Direction::ClientToServer.as_str(), "C->S");
        assert_eq!(Direction::ServerToClient.to_string(), "S->C");
        assert_eq!(
            serde_json::to_string(&Direction::ClientToServer).expect("serializes"),
            "\"C->S\""
        );
    }

    #[test]
    fn type_families_ignore_direction_bit() {
        assert_eq!(PacketType::from_type_byte(0x20), Some(PacketType::Data));
        assert_eq!(PacketType::from_type_byte(0xA0), Some(PacketType::Data));
        assert_eq!(PacketType::from_type_byte(0x24), Some(PacketType::Ack));
        assert_eq!(PacketType::from_type_byte(0xA4), Some(PacketType::Ack));
    }

    #[test]
    fn unknown_family_is_none() {
        assert_eq!(PacketType::from_type_byte(0x21), None);
        assert_eq!(PacketType::from_type_byte(0x00), None);
        assert_eq!(PacketType::from_type_byte(0x7F), None);
    }

    #[test]
    fn every_family_has_a_name() {
        let pairs = [
            (0x20, "DATA"),
            (0x23, "INIT"),
            (0x24, "ACK"),
            (0x25, "NAK"),
            (0x26, "HBEAT"),
            (0x28, "RESET"),
            (0x29, "RAK"),
            (0x2A, "SETUP"),
            (0x2B, "ACKNOW"),
        ];
        for (byte, name) in pairs {
            assert_eq!(PacketType::from_type_byte(byte).map(PacketType::name), Some(name));
        }
    }

    #[test]
    fn nak_reason_names() {
        assert_eq!(NakReason::from_code(0x01).to_string(), "CRC_ERROR");
        assert_eq!(NakReason::from_code(0x02).to_string(), "SEQUENCE_ERROR");
        assert_eq!(NakReason::from_code(0x03).to_string(), "LENGTH_ERROR");
        assert_eq!(NakReason::from_code(0x04).to_string(), "PACKET_BUILD_ERROR");
        assert_eq!(NakReason::from_code(0x4E).to_string(), "UNKNOWN_0x4E");
    }
}
