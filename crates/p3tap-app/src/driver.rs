//! The orchestrator: glue between proxy, bus, registry, and sessions.

use std::{net::SocketAddr, sync::Arc};

use p3tap_core::{
    bus::LiveBus,
    registry::{ConnectionInfo, ConnectionRegistry},
    session::SessionManager,
};
use p3tap_proxy::{Proxy, ProxyConfig};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::AppError;

/// Point-in-time view of the analyzer for adapters to render.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Whether a proxy is currently running.
    pub running: bool,
    /// Listen port of the running proxy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    /// Snapshot of the connection registry, newest first.
    pub connections: Vec<ConnectionInfo>,
    /// Id of the active capture session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Frames recorded into the active session so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_frame_count: Option<u64>,
}

/// Owns at most one proxy and at most one active session.
///
/// Construction wires the pieces together: the registry publishes lifecycle
/// events on the bus, and the bus appends every published line to the
/// session store while a session is active.
pub struct Orchestrator {
    bus: Arc<LiveBus>,
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<SessionManager>,
    proxy: Mutex<Option<Proxy>>,
}

impl Orchestrator {
    /// Build the analyzer around a session store.
    #[must_use]
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        let bus = Arc::new(LiveBus::new());
        bus.set_session_hook(Arc::clone(&sessions));
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&bus)));
        Self { bus, registry, sessions, proxy: Mutex::new(None) }
    }

    /// The live bus adapters subscribe to.
    #[must_use]
    pub fn bus(&self) -> Arc<LiveBus> {
        Arc::clone(&self.bus)
    }

    /// The authoritative connection registry.
    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// The session store.
    #[must_use]
    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    /// Start the proxy, replacing any running one, and open a new session.
    ///
    /// Returns the bound listen address.
    pub async fn start_proxy(&self, config: ProxyConfig) -> Result<SocketAddr, AppError> {
        let mut slot = self.proxy.lock().await;

        if let Some(existing) = slot.take() {
            existing.stop().await;
            self.sessions.stop_session().await;
        }

        self.sessions.start_session().await?;
        let proxy =
            match Proxy::start(config, Arc::clone(&self.registry), Arc::clone(&self.bus)).await {
                Ok(proxy) => proxy,
                Err(error) => {
                    // Don't leave a session recording nothing.
                    self.sessions.stop_session().await;
                    return Err(error.into());
                },
            };

        let addr = proxy.local_addr();
        *slot = Some(proxy);
        Ok(addr)
    }

    /// Stop the proxy and close the session. Session files stay on disk.
    pub async fn stop_proxy(&self) {
        let proxy = self.proxy.lock().await.take();
        if let Some(proxy) = proxy {
            proxy.stop().await;
        }
        self.sessions.stop_session().await;
    }

    /// Current status for adapters.
    pub async fn status(&self) -> StatusSnapshot {
        let proxy = self.proxy.lock().await;
        let session = self.sessions.current_session();

        StatusSnapshot {
            running: proxy.is_some(),
            listen_port: proxy.as_ref().map(|p| p.local_addr().port()),
            connections: self.registry.list_all(),
            session_id: session.as_ref().map(|s| s.id.clone()),
            session_frame_count: session.map(|s| s.frame_count),
        }
    }
}
