//! Classic PCAP container reader.
//!
//! Supports both byte orders of the classic format (magic `A1B2C3D4` written
//! big-endian or byte-swapped). The nanosecond-precision variant and pcapng
//! are rejected up front; converting with `editcap -F pcap` is cheaper than
//! carrying a second container parser.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use crate::error::PcapError;

/// File magic as written by a big-endian producer.
const MAGIC_BE: [u8; 4] = [0xA1, 0xB2, 0xC3, 0xD4];
/// File magic as written by a little-endian producer.
const MAGIC_LE: [u8; 4] = [0xD4, 0xC3, 0xB2, 0xA1];
/// First four bytes of a pcapng section header block.
const MAGIC_PCAPNG: [u8; 4] = [0x0A, 0x0D, 0x0D, 0x0A];

/// Largest record body considered sane. Anything bigger is skipped.
const MAX_RECORD_LEN: u32 = 65536;

/// One captured packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcapRecord {
    /// Capture time, whole seconds since epoch.
    pub ts_sec: u32,
    /// Capture time, microsecond remainder.
    pub ts_usec: u32,
    /// Raw packet bytes starting at the link layer.
    pub data: Vec<u8>,
}

/// Streaming reader over a classic PCAP file.
pub struct PcapReader<R: Read> {
    input: R,
    big_endian: bool,
    link_type: u32,
}

impl PcapReader<BufReader<File>> {
    /// Open a capture file.
    pub fn open(path: &Path) -> Result<Self, PcapError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> PcapReader<R> {
    /// Parse the 24-byte file header from an arbitrary reader.
    pub fn new(mut input: R) -> Result<Self, PcapError> {
        let mut magic = [0u8; 4];
        input
            .read_exact(&mut magic)
            .map_err(|_| PcapError::TruncatedHeader)?;

        let big_endian = match magic {
            MAGIC_BE => true,
            MAGIC_LE => false,
            MAGIC_PCAPNG => return Err(PcapError::PcapNgUnsupported),
            other => return Err(PcapError::UnrecognizedMagic(other)),
        };

        // version_major, version_minor, thiszone, sigfigs, snaplen, network
        let mut rest = [0u8; 20];
        input
            .read_exact(&mut rest)
            .map_err(|_| PcapError::TruncatedHeader)?;

        let link_type = read_u32(&rest[16..20], big_endian);

        Ok(Self { input, big_endian, link_type })
    }

    /// Link-layer type of every record in this file.
    #[must_use]
    pub fn link_type(&self) -> u32 {
        self.link_type
    }

    /// Next record, or `None` at a clean end of file.
    ///
    /// Records with a bogus `incl_len` (zero or larger than 64 KiB) are
    /// skipped; a record cut short mid-body is an error.
    pub fn next_record(&mut self) -> Result<Option<PcapRecord>, PcapError> {
        loop {
            let mut header = [0u8; 16];
            if !self.fill(&mut header)? {
                return Ok(None);
            }

            let ts_sec = read_u32(&header[0..4], self.big_endian);
            let ts_usec = read_u32(&header[4..8], self.big_endian);
            let incl_len = read_u32(&header[8..12], self.big_endian);
            // orig_len at 12..16 is not needed for payload recovery.

            if incl_len == 0 || incl_len > MAX_RECORD_LEN {
                self.skip(incl_len as u64)?;
                continue;
            }

            let mut data = vec![0u8; incl_len as usize];
            if !self.fill(&mut data)? {
                return Err(PcapError::TruncatedRecord {
                    expected: incl_len as usize,
                    actual: 0,
                });
            }

            return Ok(Some(PcapRecord { ts_sec, ts_usec, data }));
        }
    }

    /// Fill `buf` completely. `Ok(false)` on EOF before the first byte;
    /// an error on EOF partway through.
    fn fill(&mut self, buf: &mut [u8]) -> Result<bool, PcapError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.input.read(&mut buf[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(PcapError::TruncatedRecord {
                    expected: buf.len(),
                    actual: filled,
                });
            }
            filled += n;
        }
        Ok(true)
    }

    fn skip(&mut self, mut remaining: u64) -> Result<(), PcapError> {
        let mut scratch = [0u8; 4096];
        while remaining > 0 {
            let want = remaining.min(scratch.len() as u64) as usize;
            let n = self.input.read(&mut scratch[..want])?;
            if n == 0 {
                // EOF inside a skipped record: treat as end of file.
                return Ok(());
            }
            remaining -= n as u64;
        }
        Ok(())
    }
}

fn read_u32(bytes: &[u8], big_endian: bool) -> u32 {
    let array: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if big_endian {
        u32::from_be_bytes(array)
    } else {
        u32::from_le_bytes(array)
    }
}
