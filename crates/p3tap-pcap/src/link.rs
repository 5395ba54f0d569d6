//! Link-layer and network-layer stripping down to TCP payloads.
//!
//! The decoder knows just enough of each supported link type to find the IP
//! header, and just enough IP to find TCP. Packets that are not IPv4/IPv6
//! TCP traffic touching the configured server port produce no segment; they
//! are counted for diagnostics and otherwise ignored.

use p3tap_proto::Direction;

/// One TCP segment relevant to the server port.
///
/// The payload borrows the packet buffer; it must be consumed before the
/// next record is read.
#[derive(Debug, PartialEq, Eq)]
pub struct TcpSegment<'a> {
    /// Direction relative to the server port.
    pub direction: Direction,
    /// TCP source port.
    pub src_port: u16,
    /// TCP destination port.
    pub dst_port: u16,
    /// TCP sequence number of the first payload byte.
    pub seq: u32,
    /// TCP payload bytes.
    pub payload: &'a [u8],
}

/// Counters kept purely for the zero-frame diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkStats {
    /// IPv4 packets seen.
    pub ipv4_packets: u64,
    /// IPv6 packets seen.
    pub ipv6_packets: u64,
    /// TCP segments seen, any port.
    pub tcp_segments: u64,
    /// TCP segments touching the server port.
    pub port_matches: u64,
}

/// Stateless per-packet decoder with diagnostic counters.
#[derive(Debug)]
pub struct LinkDecoder {
    server_port: u16,
    stats: LinkStats,
}

impl LinkDecoder {
    /// Decoder filtering for `server_port`.
    #[must_use]
    pub fn new(server_port: u16) -> Self {
        Self { server_port, stats: LinkStats::default() }
    }

    /// Counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Locate the TCP payload of one packet, filtered to the server port.
    pub fn decode<'a>(&mut self, link_type: u32, packet: &'a [u8]) -> Option<TcpSegment<'a>> {
        let ip_offset = ip_header_offset(link_type)?;
        let version = packet.get(ip_offset)? >> 4;

        let tcp_offset = match version {
            4 => {
                self.stats.ipv4_packets += 1;
                let ihl = usize::from(packet.get(ip_offset)? & 0x0F) * 4;
                if ihl < 20 {
                    return None;
                }
                if *packet.get(ip_offset + 9)? != 6 {
                    return None;
                }
                ip_offset + ihl
            },
            6 => {
                self.stats.ipv6_packets += 1;
                // Fixed 40-byte header only; extension-header chains are out
                // of scope.
                if *packet.get(ip_offset + 6)? != 6 {
                    return None;
                }
                ip_offset + 40
            },
            _ => return None,
        };

        self.parse_tcp(packet, tcp_offset)
    }

    fn parse_tcp<'a>(&mut self, packet: &'a [u8], tcp_offset: usize) -> Option<TcpSegment<'a>> {
        let header = packet.get(tcp_offset..tcp_offset + 20)?;
        self.stats.tcp_segments += 1;

        let src_port = u16::from_be_bytes([header[0], header[1]]);
        let dst_port = u16::from_be_bytes([header[2], header[3]]);
        let seq = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let data_offset = usize::from(header[12] >> 4) * 4;
        if data_offset < 20 {
            return None;
        }

        let direction = if dst_port == self.server_port {
            Direction::ClientToServer
        } else if src_port == self.server_port {
            Direction::ServerToClient
        } else {
            return None;
        };
        self.stats.port_matches += 1;

        let payload = packet.get(tcp_offset + data_offset..)?;
        Some(TcpSegment { direction, src_port, dst_port, seq, payload })
    }
}

/// Offset of the IP header for each supported link type.
///
/// 0 BSD loopback, 1 Ethernet, 101/228/229 raw IP, 113 Linux cooked (SLL),
/// 276 Linux cooked v2 (SLL2).
fn ip_header_offset(link_type: u32) -> Option<usize> {
    match link_type {
        0 => Some(4),
        1 => Some(14),
        101 | 228 | 229 => Some(0),
        113 => Some(16),
        276 => Some(20),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_PORT: u16 = 5190;

    /// Ethernet + IPv4 + TCP packet around `payload`.
    fn ipv4_packet(src_port: u16, dst_port: u16, seq: u32, payload: &[u8]) -> Vec<u8> {
        let mut packet = Vec::new();
        // Ethernet: dst mac, src mac, ethertype 0x0800
        packet.extend([0u8; 12]);
        packet.extend([0x08, 0x00]);
        // IPv4 header, IHL 5
        let total_len = (20 + 20 + payload.len()) as u16;
        packet.push(0x45);
        packet.push(0);
        packet.extend(total_len.to_be_bytes());
        packet.extend([0u8; 4]); // id, flags
        packet.push(64); // ttl
        packet.push(6); // protocol TCP
        packet.extend([0u8; 2]); // checksum
        packet.extend([10, 0, 0, 1]);
        packet.extend([10, 0, 0, 2]);
        // TCP header, data offset 5
        packet.extend(src_port.to_be_bytes());
        packet.extend(dst_port.to_be_bytes());
        packet.extend(seq.to_be_bytes());
        packet.extend([0u8; 4]); // ack
        packet.push(0x50); // data offset
        packet.push(0x18); // flags PSH|ACK
        packet.extend([0u8; 6]); // window, checksum, urgent
        packet.extend(payload);
        packet
    }

    /// Ethernet + IPv6 + TCP packet around `payload`.
    fn ipv6_packet(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.extend([0u8; 12]);
        packet.extend([0x86, 0xDD]);
        packet.push(0x60);
        packet.extend([0u8; 3]); // traffic class / flow label
        packet.extend(((20 + payload.len()) as u16).to_be_bytes());
        packet.push(6); // next header TCP
        packet.push(64); // hop limit
        packet.extend([0u8; 32]); // src + dst
        packet.extend(src_port.to_be_bytes());
        packet.extend(dst_port.to_be_bytes());
        packet.extend([0u8; 8]); // seq + ack
        packet.push(0x50);
        packet.push(0x18);
        packet.extend([0u8; 6]);
        packet.extend(payload);
        packet
    }

    #[test]
    fn ipv4_client_to_server() {
        let mut decoder = LinkDecoder::new(SERVER_PORT);
        let packet = ipv4_packet(40000, SERVER_PORT, 7, b"hello");

        let segment = decoder.decode(1, &packet).expect("segment");
        assert_eq!(segment.direction, Direction::ClientToServer);
        assert_eq!(segment.src_port, 40000);
        assert_eq!(segment.dst_port, SERVER_PORT);
        assert_eq!(segment.seq, 7);
        assert_eq!(segment.payload, b"hello");
    }

    #[test]
    fn ipv4_server_to_client() {
        let mut decoder = LinkDecoder::new(SERVER_PORT);
        let packet = ipv4_packet(SERVER_PORT, 40000, 1, b"x");

        let segment = decoder.decode(1, &packet).expect("segment");
        assert_eq!(segment.direction, Direction::ServerToClient);
    }

    #[test]
    fn ipv6_payload_recovery() {
        let mut decoder = LinkDecoder::new(SERVER_PORT);
        let packet = ipv6_packet(SERVER_PORT, 50123, b"v6 bytes");

        let segment = decoder.decode(1, &packet).expect("segment");
        assert_eq!(segment.direction, Direction::ServerToClient);
        assert_eq!(segment.payload, b"v6 bytes");
        assert_eq!(decoder.stats().ipv6_packets, 1);
    }

    #[test]
    fn other_ports_are_filtered() {
        let mut decoder = LinkDecoder::new(SERVER_PORT);
        let packet = ipv4_packet(40000, 80, 1, b"http");

        assert!(decoder.decode(1, &packet).is_none());
        let stats = decoder.stats();
        assert_eq!(stats.tcp_segments, 1);
        assert_eq!(stats.port_matches, 0);
    }

    #[test]
    fn non_tcp_is_skipped() {
        let mut decoder = LinkDecoder::new(SERVER_PORT);
        let mut packet = ipv4_packet(40000, SERVER_PORT, 1, b"udp?");
        packet[14 + 9] = 17; // protocol UDP

        assert!(decoder.decode(1, &packet).is_none());
    }

    #[test]
    fn unsupported_link_type_yields_nothing() {
        let mut decoder = LinkDecoder::new(SERVER_PORT);
        let packet = ipv4_packet(40000, SERVER_PORT, 1, b"data");

        assert!(decoder.decode(147, &packet).is_none());
        assert_eq!(decoder.stats().ipv4_packets, 0);
    }

    #[test]
    fn raw_ip_link_types() {
        let mut decoder = LinkDecoder::new(SERVER_PORT);
        let framed = ipv4_packet(40000, SERVER_PORT, 1, b"raw");
        let raw = framed[14..].to_vec(); // strip the Ethernet header

        for link_type in [101, 228, 229] {
            let segment = decoder.decode(link_type, &raw).expect("segment");
            assert_eq!(segment.payload, b"raw");
        }
    }

    #[test]
    fn truncated_packets_are_skipped() {
        let mut decoder = LinkDecoder::new(SERVER_PORT);
        let packet = ipv4_packet(40000, SERVER_PORT, 1, b"data");

        // Cut inside the TCP header.
        assert!(decoder.decode(1, &packet[..40]).is_none());
        // Cut inside the IP header.
        assert!(decoder.decode(1, &packet[..20]).is_none());
        // Empty packet.
        assert!(decoder.decode(1, &[]).is_none());
    }

    #[test]
    fn ipv4_options_shift_the_payload() {
        // IHL 6: one 4-byte option between header and TCP.
        let mut packet = Vec::new();
        packet.extend([0u8; 12]);
        packet.extend([0x08, 0x00]);
        packet.push(0x46);
        packet.push(0);
        packet.extend(((24 + 20 + 2) as u16).to_be_bytes());
        packet.extend([0u8; 4]);
        packet.push(64);
        packet.push(6);
        packet.extend([0u8; 2]);
        packet.extend([10, 0, 0, 1]);
        packet.extend([10, 0, 0, 2]);
        packet.extend([0u8; 4]); // the option
        packet.extend(40000u16.to_be_bytes());
        packet.extend(SERVER_PORT.to_be_bytes());
        packet.extend(9u32.to_be_bytes());
        packet.extend([0u8; 4]);
        packet.push(0x50);
        packet.push(0x18);
        packet.extend([0u8; 6]);
        packet.extend(b"ok");

        let mut decoder = LinkDecoder::new(SERVER_PORT);
        let segment = decoder.decode(1, &packet).expect("segment");
        assert_eq!(segment.payload, b"ok");
    }
}
