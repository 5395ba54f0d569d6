//! The offline extraction pipeline.
//!
//! Reads a classic PCAP, recovers P3 frames per stream direction, dedupes
//! full-frame hex by SHA-1, and writes the summaries in parse order to the
//! given sink. Runs strictly sequentially on the calling thread.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use p3tap_core::sink::{FullFrameStore, SummaryWriter};
use p3tap_proto::{FrameScanner, FrameSummary, codec::sha1_hex, parse};

use crate::{
    DEFAULT_SERVER_PORT,
    error::PcapError,
    link::LinkDecoder,
    reader::PcapReader,
    reassembly::{StreamKey, TcpReassembler},
};

/// Above this many nibbles, `fullHex` is dropped from the summary and only
/// the dedup `ref` remains.
const FULL_HEX_INLINE_LIMIT: usize = 512;

/// Extraction knobs.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// TCP port the P3 server listens on; packets touching it are kept.
    pub server_port: u16,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self { server_port: DEFAULT_SERVER_PORT }
    }
}

/// What the extraction did, for logging and exit reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractStats {
    /// Records read from the capture.
    pub packets: u64,
    /// TCP segments with payload touching the server port.
    pub segments: u64,
    /// Frames recovered and summarized.
    pub frames: u64,
    /// Frames whose full hex was already seen this run.
    pub duplicate_frames: u64,
}

#[derive(Default)]
struct StreamState {
    reassembler: TcpReassembler,
    scanner: FrameScanner,
}

/// Run the pipeline over one capture file.
///
/// Summaries are written to `sink` in the order frames were parsed. When a
/// full-frame store is given, each distinct frame's hex is added to it; the
/// store is not closed here. Open failures are fatal; per-packet decode
/// failures skip the packet; sink write failures propagate.
pub fn extract_pcap(
    path: &Path,
    options: &ExtractOptions,
    sink: &mut dyn SummaryWriter,
    mut store: Option<&mut FullFrameStore>,
) -> Result<ExtractStats, PcapError> {
    let mut reader = PcapReader::open(path)?;
    let link_type = reader.link_type();

    let mut decoder = LinkDecoder::new(options.server_port);
    let mut streams: HashMap<StreamKey, StreamState> = HashMap::new();
    let mut summaries: Vec<FrameSummary> = Vec::new();
    let mut stats = ExtractStats::default();

    while let Some(record) = reader.next_record()? {
        stats.packets += 1;

        let Some(segment) = decoder.decode(link_type, &record.data) else {
            continue;
        };
        if segment.payload.is_empty() {
            continue;
        }
        stats.segments += 1;

        let key = StreamKey::new(segment.src_port, segment.dst_port, segment.direction);
        let StreamState { reassembler, scanner } = streams.entry(key).or_default();

        reassembler.on_segment(segment.seq, segment.payload);
        let direction = segment.direction;
        reassembler.drain_to(|bytes| {
            scanner.feed(bytes, |frame| {
                summaries.push(parse(
                    direction,
                    u64::from(record.ts_sec),
                    record.ts_usec,
                    frame,
                    0,
                    frame.len(),
                ));
            });
        });
    }

    stats.frames = summaries.len() as u64;

    // Dedup pass: every summary gets a ref; large full hex is dropped.
    let mut seen: HashSet<String> = HashSet::new();
    for summary in &mut summaries {
        let Some(full_hex) = summary.full_hex.clone() else { continue };
        let digest = sha1_hex(&full_hex);

        if seen.insert(digest.clone()) {
            if let Some(store) = store.as_deref_mut() {
                store.put(&digest, &full_hex);
            }
        } else {
            stats.duplicate_frames += 1;
        }

        summary.dedup_ref = Some(digest);
        if full_hex.len() > FULL_HEX_INLINE_LIMIT {
            summary.full_hex = None;
        }
    }

    for summary in &summaries {
        sink.write(summary)?;
    }

    if summaries.is_empty() {
        let link = decoder.stats();
        tracing::warn!(
            packets = stats.packets,
            ipv4 = link.ipv4_packets,
            ipv6 = link.ipv6_packets,
            tcp = link.tcp_segments,
            port_matches = link.port_matches,
            server_port = options.server_port,
            "no frames recovered from capture"
        );
    } else {
        tracing::info!(
            packets = stats.packets,
            segments = stats.segments,
            frames = stats.frames,
            duplicates = stats.duplicate_frames,
            "capture extracted"
        );
    }

    Ok(stats)
}
