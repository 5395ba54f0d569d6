//! Named capture sessions on disk.
//!
//! Each session is a pair of files in the sessions directory: an append-only
//! UTF-8 JSONL journal and a metadata sidecar that is rewritten on change.
//! At most one session is active per manager; the live bus routes published
//! lines into it through [`SessionManager::add_frame`].
//!
//! A process that dies without stopping its session leaves `active=true` on
//! disk; [`SessionManager::find_recoverable_sessions`] and
//! [`SessionManager::recover_session`] repair such leftovers by recounting
//! the journal.

mod meta;
mod writer;

use std::{
    fs,
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::Utc;
use thiserror::Error;

pub use self::{
    meta::{SessionInfo, format_duration, format_size},
    writer::SessionWriter,
};

/// Lines between flushes while streaming a session back.
const STREAM_FLUSH_EVERY: u64 = 100;

/// Errors from the session store.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No platform user data directory could be resolved.
    #[error("no user data directory available")]
    NoDataDir,

    /// The named session has no files on disk.
    #[error("session {0} not found")]
    NotFound(String),

    /// The operation refuses to touch the currently active session.
    #[error("session {0} is active")]
    Active(String),

    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A metadata sidecar could not be parsed or written.
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Manager for the sessions directory and the single active session.
#[derive(Debug)]
pub struct SessionManager {
    sessions_dir: PathBuf,
    active: Mutex<Option<Arc<SessionWriter>>>,
}

impl SessionManager {
    /// Manager rooted at the platform data directory:
    /// `<data_dir>/<app_name>/sessions/`. Fails fast when the directory
    /// cannot be created.
    pub fn new(app_name: &str) -> Result<Self, SessionError> {
        let base = dirs::data_dir().ok_or(SessionError::NoDataDir)?;
        Self::with_dir(base.join(app_name).join("sessions"))
    }

    /// Manager rooted at an explicit directory.
    pub fn with_dir(sessions_dir: PathBuf) -> Result<Self, SessionError> {
        fs::create_dir_all(&sessions_dir)?;
        Ok(Self { sessions_dir, active: Mutex::new(None) })
    }

    /// Directory holding the journal and sidecar files.
    #[must_use]
    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Start a new session, stopping any currently active one first.
    pub async fn start_session(&self) -> Result<SessionInfo, SessionError> {
        self.stop_session().await;

        let id = generate_session_id();
        let info = SessionInfo::new(&id);
        let writer = Arc::new(SessionWriter::open(info.clone(), &self.sessions_dir)?);

        *self.lock_active() = Some(writer);
        tracing::info!(session = %id, "session started");
        Ok(info)
    }

    /// Stop the active session, if any, and return its final metadata.
    pub async fn stop_session(&self) -> Option<SessionInfo> {
        let writer = self.lock_active().take()?;
        let info = writer.close().await;
        tracing::info!(session = %info.id, frames = info.frame_count, "session stopped");
        Some(info)
    }

    /// Append a line to the active session's journal buffer.
    ///
    /// Returns `false` when no session is active.
    pub fn add_frame(&self, line: &str) -> bool {
        let writer = self.lock_active().clone();
        match writer {
            Some(writer) => {
                writer.append(line);
                true
            },
            None => false,
        }
    }

    /// Metadata snapshot of the active session, if any.
    #[must_use]
    pub fn current_session(&self) -> Option<SessionInfo> {
        self.lock_active().as_ref().map(|writer| writer.snapshot_info())
    }

    /// All sessions on disk, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>, SessionError> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.sessions_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if !name.ends_with(".meta.json") {
                continue;
            }
            match read_meta(&path) {
                Ok(info) => sessions.push(info),
                Err(error) => {
                    tracing::debug!(file = %path.display(), %error, "skipping unreadable metadata");
                },
            }
        }
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    /// Stream a session's journal lines to `out`.
    ///
    /// With a connection filter, only lines attributed to that connection
    /// are emitted. Returns the number of lines written. The output is
    /// flushed every 100 lines and once at the end; the stream itself is
    /// left open.
    pub fn stream_session_frames(
        &self,
        session_id: &str,
        out: &mut dyn Write,
        connection_filter: Option<&str>,
    ) -> Result<u64, SessionError> {
        let reader = self.open_journal(session_id)?;
        let needle = connection_filter.map(|id| format!("\"connectionId\":\"{id}\""));

        let mut written = 0u64;
        for line in reader.lines() {
            let line = line?;
            if let Some(needle) = &needle {
                if !line.contains(needle.as_str()) {
                    continue;
                }
            }
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
            written += 1;
            if written % STREAM_FLUSH_EVERY == 0 {
                out.flush()?;
            }
        }
        out.flush()?;
        Ok(written)
    }

    /// Count a session's journal lines, optionally filtered by connection.
    pub fn count_session_frames(
        &self,
        session_id: &str,
        connection_filter: Option<&str>,
    ) -> Result<u64, SessionError> {
        let reader = self.open_journal(session_id)?;
        let needle = connection_filter.map(|id| format!("\"connectionId\":\"{id}\""));

        let mut count = 0u64;
        for line in reader.lines() {
            let line = line?;
            match &needle {
                Some(needle) if !line.contains(needle.as_str()) => {},
                _ => count += 1,
            }
        }
        Ok(count)
    }

    /// Delete a session's journal and sidecar.
    ///
    /// Refuses to delete the currently active session.
    pub fn delete_session(&self, session_id: &str) -> Result<(), SessionError> {
        if self
            .current_session()
            .is_some_and(|current| current.id == session_id)
        {
            return Err(SessionError::Active(session_id.to_string()));
        }

        let meta_path = self.meta_path(session_id);
        if !meta_path.exists() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }

        let data_path = self.data_path(session_id);
        if data_path.exists() {
            fs::remove_file(&data_path)?;
        }
        fs::remove_file(&meta_path)?;
        tracing::info!(session = %session_id, "session deleted");
        Ok(())
    }

    /// Sessions left `active=true` on disk by a previous run.
    pub fn find_recoverable_sessions(&self) -> Result<Vec<SessionInfo>, SessionError> {
        let current = self.current_session().map(|info| info.id);
        Ok(self
            .list_sessions()?
            .into_iter()
            .filter(|info| info.active && Some(&info.id) != current.as_ref())
            .collect())
    }

    /// Repair a session abandoned by a crashed run: recount the journal,
    /// fix the sizes, and mark it ended now.
    pub fn recover_session(&self, session_id: &str) -> Result<SessionInfo, SessionError> {
        let meta_path = self.meta_path(session_id);
        if !meta_path.exists() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        let mut info = read_meta(&meta_path)?;

        let data_path = self.data_path(session_id);
        let (frame_count, file_size) = if data_path.exists() {
            let reader = BufReader::new(fs::File::open(&data_path)?);
            let mut count = 0u64;
            for line in reader.lines() {
                line?;
                count += 1;
            }
            (count, fs::metadata(&data_path)?.len())
        } else {
            (0, 0)
        };

        info.frame_count = frame_count;
        info.file_size_bytes = file_size;
        info.active = false;
        info.end_time = Some(Utc::now());
        info.refresh_derived();

        fs::write(&meta_path, serde_json::to_string_pretty(&info)?)?;
        tracing::info!(session = %session_id, frames = frame_count, "session recovered");
        Ok(info)
    }

    fn open_journal(&self, session_id: &str) -> Result<BufReader<fs::File>, SessionError> {
        let path = self.data_path(session_id);
        if !path.exists() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        Ok(BufReader::new(fs::File::open(path)?))
    }

    fn data_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.jsonl"))
    }

    fn meta_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.meta.json"))
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<Arc<SessionWriter>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_meta(path: &Path) -> Result<SessionInfo, SessionError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// `session-YYYYMMDD-HHMMSS-rrrrrr` with a random hex suffix; unique for
/// the lifetime of the process.
fn generate_session_id() -> String {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix = rand::random::<u32>() & 0x00FF_FFFF;
    format!("session-{stamp}-{suffix:06x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = SessionManager::with_dir(dir.path().to_path_buf()).expect("manager");
        (dir, manager)
    }

    #[test]
    fn session_id_shape() {
        let id = generate_session_id();
        assert!(id.starts_with("session-"));
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 6);
    }

    #[tokio::test]
    async fn add_frame_requires_an_active_session() {
        let (_dir, manager) = manager();
        assert!(!manager.add_frame("{}"));

        manager.start_session().await.expect("start");
        assert!(manager.add_frame("{}"));

        manager.stop_session().await;
        assert!(!manager.add_frame("{}"));
    }

    #[tokio::test]
    async fn journal_round_trip_preserves_order_and_count() {
        let (_dir, manager) = manager();
        let info = manager.start_session().await.expect("start");

        for i in 0..5 {
            manager.add_frame(&format!("{{\"len\":{i}}}"));
        }
        let stopped = manager.stop_session().await.expect("stop");
        assert_eq!(stopped.frame_count, 5);

        assert_eq!(manager.count_session_frames(&info.id, None).expect("count"), 5);

        let mut out = Vec::new();
        let written = manager
            .stream_session_frames(&info.id, &mut out, None)
            .expect("stream");
        assert_eq!(written, 5);

        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        for (i, line) in lines.iter().enumerate() {
            assert_eq!(*line, format!("{{\"len\":{i}}}"));
        }
    }

    #[tokio::test]
    async fn connection_filter_selects_matching_lines() {
        let (_dir, manager) = manager();
        let info = manager.start_session().await.expect("start");

        manager.add_frame("{\"connectionId\":\"a\",\"len\":1}");
        manager.add_frame("{\"connectionId\":\"b\",\"len\":2}");
        manager.add_frame("{\"connectionId\":\"a\",\"len\":3}");
        manager.stop_session().await;

        assert_eq!(manager.count_session_frames(&info.id, Some("a")).expect("count"), 2);
        assert_eq!(manager.count_session_frames(&info.id, Some("b")).expect("count"), 1);
        assert_eq!(manager.count_session_frames(&info.id, Some("c")).expect("count"), 0);

        let mut out = Vec::new();
        let written = manager
            .stream_session_frames(&info.id, &mut out, Some("a"))
            .expect("stream");
        assert_eq!(written, 2);
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("\"len\":1"));
        assert!(!text.contains("\"len\":2"));
        assert!(text.contains("\"len\":3"));
    }

    #[tokio::test]
    async fn starting_twice_stops_the_first_session() {
        let (_dir, manager) = manager();
        let first = manager.start_session().await.expect("start");
        let second = manager.start_session().await.expect("start again");
        assert_ne!(first.id, second.id);

        let sessions = manager.list_sessions().expect("list");
        assert_eq!(sessions.len(), 2);
        // Newest first; only the newest is still active.
        assert_eq!(sessions[0].id, second.id);
        assert!(sessions[0].active);
        assert!(!sessions[1].active);

        manager.stop_session().await;
    }

    #[tokio::test]
    async fn delete_refuses_the_active_session() {
        let (_dir, manager) = manager();
        let info = manager.start_session().await.expect("start");

        let err = manager.delete_session(&info.id).expect_err("refused");
        assert!(matches!(err, SessionError::Active(_)));

        manager.stop_session().await;
        manager.delete_session(&info.id).expect("delete");
        assert!(matches!(
            manager.count_session_frames(&info.id, None),
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            manager.delete_session(&info.id),
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn crashed_sessions_are_recoverable() {
        let (dir, manager) = manager();
        let info = manager.start_session().await.expect("start");
        manager.add_frame("{\"len\":1}");
        manager.add_frame("{\"len\":2}");
        let writer = manager.lock_active().clone();
        if let Some(writer) = writer {
            writer.flush().await.expect("flush");
        }

        // Simulate a crash: forget the active writer without closing it.
        manager.lock_active().take();

        let fresh = SessionManager::with_dir(dir.path().to_path_buf()).expect("manager");
        let recoverable = fresh.find_recoverable_sessions().expect("find");
        assert_eq!(recoverable.len(), 1);
        assert_eq!(recoverable[0].id, info.id);

        let recovered = fresh.recover_session(&info.id).expect("recover");
        assert!(!recovered.active);
        assert_eq!(recovered.frame_count, 2);
        assert!(recovered.end_time.is_some());
        assert!(recovered.file_size_bytes > 0);

        assert!(fresh.find_recoverable_sessions().expect("find").is_empty());
    }
}
