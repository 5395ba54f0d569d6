//! Batched durable appends for one session journal.
//!
//! Publishers call [`SessionWriter::append`], which is an O(1) push into a
//! mutexed buffer; a dedicated tokio task drains the buffer every 100 ms,
//! writes the batch in a single append, and fsyncs before updating the
//! metadata sidecar. A failed batch is re-queued at the front of the buffer
//! for the next tick, so journal order is preserved across transient write
//! failures.

use std::{
    mem,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::AsyncWriteExt,
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval, timeout},
};

use super::meta::SessionInfo;

/// Flush cadence of the background task.
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
/// Bound on waiting for the flush task to exit during close.
const CLOSE_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct WriterShared {
    data_path: PathBuf,
    meta_path: PathBuf,
    buffer: Mutex<Vec<String>>,
    frame_count: AtomicU64,
    info: Mutex<SessionInfo>,
}

impl WriterShared {
    fn lock_buffer(&self) -> MutexGuard<'_, Vec<String>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_info(&self) -> MutexGuard<'_, SessionInfo> {
        self.info.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Append-only writer for one session journal.
///
/// Must be created inside a tokio runtime; the flush task is spawned on it.
#[derive(Debug)]
pub struct SessionWriter {
    shared: Arc<WriterShared>,
    shutdown: watch::Sender<bool>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SessionWriter {
    /// Create the empty journal file, persist initial metadata, and start
    /// the flush task.
    pub fn open(info: SessionInfo, sessions_dir: &Path) -> std::io::Result<Self> {
        let data_path = sessions_dir.join(format!("{}.jsonl", info.id));
        let meta_path = sessions_dir.join(format!("{}.meta.json", info.id));

        std::fs::File::create(&data_path)?;

        let shared = Arc::new(WriterShared {
            data_path,
            meta_path,
            buffer: Mutex::new(Vec::new()),
            frame_count: AtomicU64::new(0),
            info: Mutex::new(info),
        });
        persist_meta_blocking(&shared)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let flush_task = tokio::spawn(flush_loop(Arc::clone(&shared), shutdown_rx));

        Ok(Self {
            shared,
            shutdown,
            flush_task: Mutex::new(Some(flush_task)),
            closed: AtomicBool::new(false),
        })
    }

    /// Queue one journal line. Never blocks on I/O.
    pub fn append(&self, line: &str) {
        self.shared.frame_count.fetch_add(1, Ordering::Relaxed);
        self.shared.lock_buffer().push(line.to_string());
    }

    /// Session id this writer journals for.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.shared.lock_info().id.clone()
    }

    /// Metadata snapshot including frames still waiting in the buffer.
    #[must_use]
    pub fn snapshot_info(&self) -> SessionInfo {
        let mut info = self.shared.lock_info().clone();
        info.frame_count = self.shared.frame_count.load(Ordering::Relaxed);
        info.refresh_derived();
        info
    }

    /// Force an immediate flush of the buffered batch.
    pub async fn flush(&self) -> std::io::Result<()> {
        flush_once(&self.shared).await
    }

    /// Stop the flush task (bounded wait), flush once more, and mark the
    /// session ended. Subsequent calls return the final metadata unchanged.
    pub async fn close(&self) -> SessionInfo {
        if self.closed.swap(true, Ordering::SeqCst) {
            return self.shared.lock_info().clone();
        }

        let _ = self.shutdown.send(true);

        let task = {
            let mut slot = self.flush_task.lock().unwrap_or_else(PoisonError::into_inner);
            slot.take()
        };
        if let Some(task) = task {
            let abort = task.abort_handle();
            if timeout(CLOSE_WAIT, task).await.is_err() {
                abort.abort();
            }
        }

        // One final flush; anything still failing here is dropped.
        if let Err(error) = flush_once(&self.shared).await {
            let discarded = {
                let mut buffer = self.shared.lock_buffer();
                mem::take(&mut *buffer).len()
            };
            tracing::warn!(%error, discarded, "final session flush failed");
        }

        let final_info = {
            let mut info = self.shared.lock_info();
            info.active = false;
            info.end_time = Some(chrono::Utc::now());
            info.frame_count = self.shared.frame_count.load(Ordering::Relaxed);
            info.refresh_derived();
            info.clone()
        };
        if let Err(error) = persist_meta_blocking(&self.shared) {
            tracing::warn!(%error, "failed to persist final session metadata");
        }

        final_info
    }
}

async fn flush_loop(shared: Arc<WriterShared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(error) = flush_once(&shared).await {
                    tracing::warn!(%error, "session flush failed, batch re-queued");
                }
            },
            changed = shutdown.changed() => {
                // Either an explicit shutdown or the writer went away.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            },
        }
    }
}

/// Drain the buffer and append it durably. On failure the batch goes back
/// to the front of the buffer.
async fn flush_once(shared: &WriterShared) -> std::io::Result<()> {
    let batch = {
        let mut buffer = shared.lock_buffer();
        if buffer.is_empty() {
            return Ok(());
        }
        mem::take(&mut *buffer)
    };

    let mut payload = String::with_capacity(batch.iter().map(|l| l.len() + 1).sum());
    for line in &batch {
        payload.push_str(line);
        payload.push('\n');
    }

    let write_result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&shared.data_path)
            .await?;
        file.write_all(payload.as_bytes()).await?;
        file.sync_all().await
    }
    .await;

    if let Err(error) = write_result {
        let mut buffer = shared.lock_buffer();
        let mut restored = batch;
        restored.append(&mut buffer);
        *buffer = restored;
        return Err(error);
    }

    // Best-effort metadata refresh after a successful append.
    let file_size = tokio::fs::metadata(&shared.data_path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);
    {
        let mut info = shared.lock_info();
        info.file_size_bytes = file_size;
        info.frame_count = shared.frame_count.load(Ordering::Relaxed);
        info.refresh_derived();
    }
    if let Err(error) = persist_meta_blocking(shared) {
        tracing::debug!(%error, "session metadata update failed");
    }

    Ok(())
}

fn persist_meta_blocking(shared: &WriterShared) -> std::io::Result<()> {
    let info = shared.lock_info().clone();
    let json = serde_json::to_string_pretty(&info)?;
    std::fs::write(&shared.meta_path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer_in(dir: &Path) -> SessionWriter {
        let info = SessionInfo::new("session-20260801-000000-test01");
        SessionWriter::open(info, dir).expect("open writer")
    }

    #[tokio::test]
    async fn append_flush_and_read_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = writer_in(dir.path());

        writer.append("{\"dir\":\"C->S\",\"len\":1}");
        writer.append("{\"dir\":\"S->C\",\"len\":2}");
        writer.flush().await.expect("flush");

        let data = std::fs::read_to_string(dir.path().join("session-20260801-000000-test01.jsonl"))
            .expect("read journal");
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"len\":1"));
        assert!(lines[1].contains("\"len\":2"));
    }

    #[tokio::test]
    async fn background_task_flushes_without_explicit_flush() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = writer_in(dir.path());

        writer.append("{\"len\":1}");
        tokio::time::sleep(Duration::from_millis(350)).await;

        let data = std::fs::read_to_string(dir.path().join("session-20260801-000000-test01.jsonl"))
            .expect("read journal");
        assert!(data.contains("\"len\":1"));

        writer.close().await;
    }

    #[tokio::test]
    async fn close_marks_session_ended() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = writer_in(dir.path());

        writer.append("{\"len\":1}");
        let info = writer.close().await;

        assert!(!info.active);
        assert!(info.end_time.is_some());
        assert_eq!(info.frame_count, 1);

        // Idempotent: the second close reports the same final state.
        let again = writer.close().await;
        assert!(!again.active);
        assert_eq!(again.frame_count, 1);

        let meta = std::fs::read_to_string(
            dir.path().join("session-20260801-000000-test01.meta.json"),
        )
        .expect("read meta");
        assert!(meta.contains("\"active\": false"));
        assert!(meta.contains("endTime"));
    }

    #[tokio::test]
    async fn snapshot_counts_buffered_frames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = writer_in(dir.path());

        writer.append("{\"len\":1}");
        writer.append("{\"len\":2}");

        let info = writer.snapshot_info();
        assert_eq!(info.frame_count, 2);
        assert!(info.active);

        writer.close().await;
    }
}
