//! Session metadata sidecar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata persisted next to a session journal as `<id>.meta.json`.
///
/// `end_time` is set iff `active` is false. The `formatted_*` strings are
/// derived for display and recomputed before every persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session identifier, `session-YYYYMMDD-HHMMSS-rrrrrr`.
    pub id: String,
    /// When the session was started.
    pub start_time: DateTime<Utc>,
    /// When the session was stopped or recovered; absent while active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Frames appended so far.
    pub frame_count: u64,
    /// Size of the journal file in bytes.
    pub file_size_bytes: u64,
    /// Whether the session is still accepting frames.
    pub active: bool,
    /// Human-readable journal size.
    #[serde(default)]
    pub formatted_size: String,
    /// Human-readable session duration.
    #[serde(default)]
    pub formatted_duration: String,
}

impl SessionInfo {
    /// Fresh active session starting now.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let mut info = Self {
            id: id.into(),
            start_time: Utc::now(),
            end_time: None,
            frame_count: 0,
            file_size_bytes: 0,
            active: true,
            formatted_size: String::new(),
            formatted_duration: String::new(),
        };
        info.refresh_derived();
        info
    }

    /// Recompute the display strings from the structured fields.
    pub fn refresh_derived(&mut self) {
        self.formatted_size = format_size(self.file_size_bytes);
        self.formatted_duration = format_duration(self.start_time, self.end_time);
    }
}

/// `512 B`, `1.2 KB`, `3.4 MB`, `1.1 GB`.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b < KIB {
        format!("{bytes} B")
    } else if b < MIB {
        format!("{:.1} KB", b / KIB)
    } else if b < GIB {
        format!("{:.1} MB", b / MIB)
    } else {
        format!("{:.1} GB", b / GIB)
    }
}

/// `42s`, `4m 12s`, `1h 3m`. Open-ended sessions measure against now.
#[must_use]
pub fn format_duration(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> String {
    let end = end.unwrap_or_else(Utc::now);
    let total_secs = (end - start).num_seconds().max(0);

    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
