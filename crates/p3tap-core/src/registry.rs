//! Registry of live and recently-closed proxied connections.
//!
//! Entries are created on accept and flipped inactive on teardown, but stay
//! in the registry for post-hoc inspection until the proxy is stopped and
//! the registry reset. Lifecycle transitions publish synthetic event lines
//! on the live bus so subscribers can reconcile state without polling; the
//! registry itself stays authoritative.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::bus::LiveBus;

/// Identity and counters for one proxied TCP connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Opaque 8-character connection identifier.
    pub connection_id: String,
    /// Peer address of the accepted socket.
    pub source_ip: String,
    /// Peer port of the accepted socket.
    pub source_port: u16,
    /// When the connection was accepted.
    pub start_time: DateTime<Utc>,
    /// False once either side of the connection has gone away.
    pub active: bool,
    /// Frames recovered from this connection so far, both directions.
    pub frame_count: u64,
    /// Last time a frame was recovered.
    pub last_activity_time: DateTime<Utc>,
}

impl ConnectionInfo {
    /// Fresh, active entry for a just-accepted socket.
    #[must_use]
    pub fn new(connection_id: impl Into<String>, source_ip: impl Into<String>, source_port: u16) -> Self {
        let now = Utc::now();
        Self {
            connection_id: connection_id.into(),
            source_ip: source_ip.into(),
            source_port,
            start_time: now,
            active: true,
            frame_count: 0,
            last_activity_time: now,
        }
    }
}

/// Thread-safe `connectionId → ConnectionInfo` map.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, ConnectionInfo>>,
    bus: Arc<LiveBus>,
}

impl ConnectionRegistry {
    /// New empty registry publishing lifecycle events on `bus`.
    #[must_use]
    pub fn new(bus: Arc<LiveBus>) -> Self {
        Self { connections: Mutex::new(HashMap::new()), bus }
    }

    /// Register a newly accepted connection and announce it.
    pub fn register(&self, info: ConnectionInfo) {
        let event = json!({
            "event": "connection_opened",
            "connectionId": info.connection_id.as_str(),
            "sourceIp": info.source_ip.as_str(),
            "sourcePort": info.source_port,
        });
        self.lock().insert(info.connection_id.clone(), info);
        self.bus.publish(&event.to_string());
    }

    /// Mark a connection inactive, keeping the entry. Returns `false` for
    /// unknown ids or connections already closed.
    pub fn close(&self, connection_id: &str) -> bool {
        let closed = {
            let mut connections = self.lock();
            match connections.get_mut(connection_id) {
                Some(info) if info.active => {
                    info.active = false;
                    Some(info.frame_count)
                },
                _ => None,
            }
        };

        match closed {
            Some(frame_count) => {
                let event = json!({
                    "event": "connection_closed",
                    "connectionId": connection_id,
                    "frameCount": frame_count,
                });
                self.bus.publish(&event.to_string());
                true
            },
            None => false,
        }
    }

    /// Count one recovered frame against a connection.
    pub fn record_frame(&self, connection_id: &str) {
        if let Some(info) = self.lock().get_mut(connection_id) {
            info.frame_count += 1;
            info.last_activity_time = Utc::now();
        }
    }

    /// Snapshot of one connection.
    #[must_use]
    pub fn get(&self, connection_id: &str) -> Option<ConnectionInfo> {
        self.lock().get(connection_id).cloned()
    }

    /// Whether a connection exists and is still active.
    #[must_use]
    pub fn is_active(&self, connection_id: &str) -> bool {
        self.lock().get(connection_id).is_some_and(|info| info.active)
    }

    /// Snapshot of all connections, newest first.
    #[must_use]
    pub fn list_all(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<ConnectionInfo> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        all
    }

    /// Snapshot of active connections, newest first.
    #[must_use]
    pub fn list_active(&self) -> Vec<ConnectionInfo> {
        let mut active: Vec<ConnectionInfo> =
            self.lock().values().filter(|info| info.active).cloned().collect();
        active.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        active
    }

    /// Sum of frame counts across all known connections.
    #[must_use]
    pub fn total_frame_count(&self) -> u64 {
        self.lock().values().map(|info| info.frame_count).sum()
    }

    /// Drop every entry and announce the reset.
    pub fn reset(&self) {
        self.lock().clear();
        self.bus.publish(&json!({ "event": "connections_reset" }).to_string());
    }

    /// JSON snapshot of the whole registry.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let connections = self.list_all();
        json!({
            "connections": connections,
            "activeCount": connections.iter().filter(|c| c.active).count(),
            "totalFrameCount": connections.iter().map(|c| c.frame_count).sum::<u64>(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConnectionInfo>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (ConnectionRegistry, crate::bus::BusSubscription) {
        let bus = Arc::new(LiveBus::new());
        let sub = bus.subscribe();
        (ConnectionRegistry::new(bus), sub)
    }

    #[test]
    fn register_and_lookup() {
        let (registry, _sub) = registry();

        registry.register(ConnectionInfo::new("cafebabe", "10.0.0.9", 40123));

        let info = registry.get("cafebabe").expect("registered");
        assert!(info.active);
        assert_eq!(info.source_ip, "10.0.0.9");
        assert_eq!(info.source_port, 40123);
        assert_eq!(info.frame_count, 0);
        assert!(registry.is_active("cafebabe"));
        assert!(!registry.is_active("missing"));
    }

    #[test]
    fn close_keeps_the_entry() {
        let (registry, _sub) = registry();
        registry.register(ConnectionInfo::new("cafebabe", "10.0.0.9", 40123));

        assert!(registry.close("cafebabe"));
        assert!(!registry.is_active("cafebabe"));
        assert!(registry.get("cafebabe").is_some());

        // Double close is a no-op.
        assert!(!registry.close("cafebabe"));
        assert!(!registry.close("missing"));
    }

    #[test]
    fn record_frame_bumps_counters() {
        let (registry, _sub) = registry();
        registry.register(ConnectionInfo::new("cafebabe", "10.0.0.9", 40123));

        registry.record_frame("cafebabe");
        registry.record_frame("cafebabe");
        registry.record_frame("missing");

        assert_eq!(registry.get("cafebabe").expect("exists").frame_count, 2);
        assert_eq!(registry.total_frame_count(), 2);
    }

    #[test]
    fn list_active_filters_closed() {
        let (registry, _sub) = registry();
        registry.register(ConnectionInfo::new("aaaaaaaa", "10.0.0.1", 1));
        registry.register(ConnectionInfo::new("bbbbbbbb", "10.0.0.2", 2));
        registry.close("aaaaaaaa");

        assert_eq!(registry.list_all().len(), 2);
        let active = registry.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].connection_id, "bbbbbbbb");
    }

    #[test]
    fn lifecycle_events_reach_the_bus() {
        let (registry, mut sub) = registry();

        registry.register(ConnectionInfo::new("cafebabe", "10.0.0.9", 40123));
        registry.record_frame("cafebabe");
        registry.close("cafebabe");
        registry.reset();

        let opened = sub.receiver.try_recv().expect("opened event");
        assert!(opened.contains("\"event\":\"connection_opened\""));
        assert!(opened.contains("\"connectionId\":\"cafebabe\""));

        let closed = sub.receiver.try_recv().expect("closed event");
        assert!(closed.contains("\"event\":\"connection_closed\""));
        assert!(closed.contains("\"frameCount\":1"));

        let reset = sub.receiver.try_recv().expect("reset event");
        assert!(reset.contains("\"event\":\"connections_reset\""));

        assert!(registry.list_all().is_empty());
    }

    #[test]
    fn snapshot_shape() {
        let (registry, _sub) = registry();
        registry.register(ConnectionInfo::new("cafebabe", "10.0.0.9", 40123));
        registry.record_frame("cafebabe");

        let snapshot = registry.to_json();
        assert_eq!(snapshot["activeCount"], 1);
        assert_eq!(snapshot["totalFrameCount"], 1);
        assert_eq!(snapshot["connections"][0]["connectionId"], "cafebabe");
        assert_eq!(snapshot["connections"][0]["sourcePort"], 40123);
    }
}
