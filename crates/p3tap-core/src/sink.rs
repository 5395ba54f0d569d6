//! Summary sinks and the content-addressed full-frame store.
//!
//! Every sink writes one JSON object per line, newline terminated. The file
//! sink owns its file and may wrap it in streaming GZIP; the streaming sink
//! borrows a caller-owned stream and must never close it (HTTP response
//! bodies flow through here). `close` is idempotent everywhere.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use flate2::{Compression, write::GzEncoder};
use p3tap_proto::FrameSummary;
use serde::Serialize;

/// Destination for summary records.
pub trait SummaryWriter: Send {
    /// Append one summary as a JSONL line.
    fn write(&mut self, summary: &FrameSummary) -> io::Result<()>;

    /// Flush and release resources. Safe to call more than once.
    fn close(&mut self) -> io::Result<()>;
}

fn render_line(summary: &FrameSummary, pretty: bool) -> io::Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(summary)
    } else {
        serde_json::to_string(summary)
    };
    json.map_err(io::Error::from)
}

enum FileOutput {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

/// File-backed summary sink, optionally GZIP-compressed and pretty-printed.
pub struct FileSink {
    out: Option<FileOutput>,
    pretty: bool,
}

impl FileSink {
    /// Create (truncate) the output file.
    pub fn create(path: &Path, gzip: bool, pretty: bool) -> io::Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        let out = if gzip {
            FileOutput::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            FileOutput::Plain(file)
        };
        Ok(Self { out: Some(out), pretty })
    }
}

impl SummaryWriter for FileSink {
    fn write(&mut self, summary: &FrameSummary) -> io::Result<()> {
        let Some(out) = self.out.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink already closed"));
        };
        let line = render_line(summary, self.pretty)?;
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")
    }

    fn close(&mut self) -> io::Result<()> {
        match self.out.take() {
            None => Ok(()),
            Some(FileOutput::Plain(mut w)) => w.flush(),
            Some(FileOutput::Gzip(w)) => w.finish()?.flush(),
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::warn!(%error, "summary sink close failed on drop");
        }
    }
}

/// Summary sink over a caller-owned stream.
///
/// `close` flushes but leaves the underlying stream open; the caller keeps
/// ownership and decides its lifetime.
pub struct StreamingSink<W: Write + Send> {
    out: W,
    pretty: bool,
}

impl<W: Write + Send> StreamingSink<W> {
    /// Wrap a stream. Nothing is written until the first summary.
    pub fn new(out: W, pretty: bool) -> Self {
        Self { out, pretty }
    }

    /// Give the stream back.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> SummaryWriter for StreamingSink<W> {
    fn write(&mut self, summary: &FrameSummary) -> io::Result<()> {
        let line = render_line(summary, self.pretty)?;
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")
    }

    fn close(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[derive(Serialize)]
struct StoreDocument<'a> {
    frames: &'a BTreeMap<String, String>,
}

/// Content-addressed store of full-frame hex, keyed by SHA-1.
///
/// Accumulates in memory and writes a single `{"frames":{sha1:hex,…}}`
/// object on close.
pub struct FullFrameStore {
    frames: BTreeMap<String, String>,
    path: PathBuf,
    gzip: bool,
    closed: bool,
}

impl FullFrameStore {
    /// New store that will be written to `path` on close.
    #[must_use]
    pub fn create(path: PathBuf, gzip: bool) -> Self {
        Self { frames: BTreeMap::new(), path, gzip, closed: false }
    }

    /// Insert-if-absent. Returns `true` when the key was new.
    pub fn put(&mut self, key: &str, full_hex: &str) -> bool {
        if self.frames.contains_key(key) {
            return false;
        }
        self.frames.insert(key.to_string(), full_hex.to_string());
        true
    }

    /// Whether a key is already stored.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.frames.contains_key(key)
    }

    /// Number of distinct frames stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the store holds no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Write the store document. Idempotent; only the first call writes.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let document = StoreDocument { frames: &self.frames };
        let file = BufWriter::new(File::create(&self.path)?);
        if self.gzip {
            let mut encoder = GzEncoder::new(file, Compression::default());
            serde_json::to_writer(&mut encoder, &document)?;
            encoder.finish()?.flush()
        } else {
            let mut out = file;
            serde_json::to_writer(&mut out, &document)?;
            out.flush()
        }
    }
}
