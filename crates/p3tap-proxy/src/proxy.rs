//! Acceptor, upstream dialing, and the per-direction pipe tasks.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use p3tap_core::{
    bus::LiveBus,
    registry::{ConnectionInfo, ConnectionRegistry},
};
use p3tap_proto::{Direction, FrameScanner, parse_lite};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::watch,
    task::JoinHandle,
    time::timeout,
};

use crate::error::ProxyError;

/// Read size of one pipe iteration.
const PIPE_CHUNK: usize = 8 * 1024;
/// Bound on waiting for the acceptor to exit during stop.
const STOP_WAIT: Duration = Duration::from_secs(1);

/// Where to listen and where to forward.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Local port to accept clients on. Port 0 picks an ephemeral port.
    pub listen_port: u16,
    /// Upstream host to dial for every accepted client.
    pub dest_host: String,
    /// Upstream port.
    pub dest_port: u16,
}

/// A running proxy.
///
/// Dropping the handle does not stop the acceptor; call [`Proxy::stop`].
pub struct Proxy {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<ConnectionRegistry>,
}

impl Proxy {
    /// Bind the listener and start accepting.
    pub async fn start(
        config: ProxyConfig,
        registry: Arc<ConnectionRegistry>,
        bus: Arc<LiveBus>,
    ) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(("0.0.0.0", config.listen_port))
            .await
            .map_err(|source| ProxyError::Bind { port: config.listen_port, source })?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            config.clone(),
            Arc::clone(&registry),
            bus,
            shutdown_rx,
        ));

        tracing::info!(
            listen = %local_addr,
            upstream = %format_args!("{}:{}", config.dest_host, config.dest_port),
            "proxy listening"
        );

        Ok(Self { local_addr, shutdown, accept_task: Mutex::new(Some(accept_task)), registry })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the listener, shut every active pipe, and reset the registry.
    ///
    /// Idempotent; a second call finds nothing left to stop.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);

        let task = {
            let mut slot = self.accept_task.lock().unwrap_or_else(PoisonError::into_inner);
            slot.take()
        };
        if let Some(task) = task {
            let abort = task.abort_handle();
            if timeout(STOP_WAIT, task).await.is_err() {
                abort.abort();
            }
            self.registry.reset();
            tracing::info!("proxy stopped");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ProxyConfig,
    registry: Arc<ConnectionRegistry>,
    bus: Arc<LiveBus>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            },
            accepted = listener.accept() => {
                match accepted {
                    Ok((client, peer)) => {
                        tokio::spawn(handle_connection(
                            client,
                            peer,
                            config.clone(),
                            Arc::clone(&registry),
                            Arc::clone(&bus),
                            shutdown.clone(),
                        ));
                    },
                    Err(error) => {
                        tracing::warn!(%error, "accept failed");
                    },
                }
            },
        }
    }
    // Listener drops here, closing the accept socket.
}

/// Attribution stamped onto every frame a connection produces.
#[derive(Clone)]
struct PipeContext {
    connection_id: String,
    source_ip: String,
    source_port: u16,
    registry: Arc<ConnectionRegistry>,
    bus: Arc<LiveBus>,
}

async fn handle_connection(
    client: TcpStream,
    peer: SocketAddr,
    config: ProxyConfig,
    registry: Arc<ConnectionRegistry>,
    bus: Arc<LiveBus>,
    shutdown: watch::Receiver<bool>,
) {
    let connection_id = format!("{:08x}", rand::random::<u32>());
    let source_ip = peer.ip().to_string();
    let source_port = peer.port();

    registry.register(ConnectionInfo::new(&connection_id, &source_ip, source_port));
    tracing::debug!(connection = %connection_id, peer = %peer, "connection accepted");

    let upstream =
        match TcpStream::connect((config.dest_host.as_str(), config.dest_port)).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::warn!(
                    connection = %connection_id,
                    upstream = %format_args!("{}:{}", config.dest_host, config.dest_port),
                    %error,
                    "upstream dial failed"
                );
                registry.close(&connection_id);
                return;
            },
        };

    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    let context = PipeContext {
        connection_id: connection_id.clone(),
        source_ip,
        source_port,
        registry: Arc::clone(&registry),
        bus,
    };

    let client_to_server = run_pipe(
        client_read,
        upstream_write,
        Direction::ClientToServer,
        context.clone(),
        shutdown.clone(),
    );
    let server_to_client = run_pipe(
        upstream_read,
        client_write,
        Direction::ServerToClient,
        context,
        shutdown,
    );

    // Either side finishing tears the whole connection down; the losing
    // pipe future is dropped, which closes its socket halves.
    tokio::select! {
        () = client_to_server => {},
        () = server_to_client => {},
    }

    registry.close(&connection_id);
    tracing::debug!(connection = %connection_id, "connection closed");
}

/// One direction of one connection: forward, then tap.
async fn run_pipe(
    mut input: OwnedReadHalf,
    mut output: OwnedWriteHalf,
    direction: Direction,
    context: PipeContext,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut scanner = FrameScanner::new();
    let mut buf = vec![0u8; PIPE_CHUNK];

    loop {
        let read = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            },
            read = input.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                // Forwarding comes first; a slow parse must never hold up
                // more than this one chunk.
                if output.write_all(&buf[..n]).await.is_err() {
                    break;
                }
                if output.flush().await.is_err() {
                    break;
                }

                scanner.feed(&buf[..n], |frame| {
                    let mut summary = parse_lite(direction, frame, 0, frame.len());
                    summary.connection_id = Some(context.connection_id.clone());
                    summary.source_ip = Some(context.source_ip.clone());
                    summary.source_port = Some(context.source_port);

                    match summary.to_json() {
                        Ok(line) => {
                            context.bus.publish(&line);
                            context.registry.record_frame(&context.connection_id);
                        },
                        Err(error) => {
                            tracing::warn!(%error, "summary serialization failed");
                        },
                    }
                });
            },
            Err(error) => {
                tracing::debug!(connection = %context.connection_id, %direction, %error, "pipe read failed");
                break;
            },
        }
    }

    let _ = output.shutdown().await;
}
