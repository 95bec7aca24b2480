//! Core daemon orchestration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tournbuddy_discovery::Discovery;
use tournbuddy_protocol::{open, transport, Listener};
use tournbuddy_types::service::socket_file_name;
use tournbuddy_types::{AuthorizationCode, Endpoint};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::DaemonError;
use crate::session::{authorize, Session};
use crate::setup;
use crate::state::DaemonStatus;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What the daemon reports to the application.
#[derive(Debug)]
pub enum DaemonEvent {
    /// An inbound connection presented the right code.
    SessionOpened(Session),
    /// An inbound connection was dropped during the handshake.
    HandshakeRejected { peer: String, reason: String },
}

/// Running listener state, present between `start` and `stop`.
struct Running {
    socket_path: PathBuf,
    port: Option<u16>,
    shutdown_tx: oneshot::Sender<()>,
    accept_task: JoinHandle<()>,
}

/// The tournament host daemon.
///
/// `start` binds the listeners, `publish` advertises them, `stop` undoes
/// both. Sessions already handed out are not affected by `stop`.
pub struct Daemon {
    config: Config,
    discovery: Option<Box<dyn Discovery>>,
    /// Name requested by `publish`, advertised whenever the daemon runs.
    publish_name: Option<String>,
    advertised: bool,
    running: Option<Running>,
    event_tx: mpsc::Sender<DaemonEvent>,
    status: Arc<watch::Sender<DaemonStatus>>,
}

impl Daemon {
    /// Create a daemon. Without a discovery backend `publish` only records
    /// the name.
    pub fn new(
        config: Config,
        discovery: Option<Box<dyn Discovery>>,
    ) -> (Self, mpsc::Receiver<DaemonEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (status, _) = watch::channel(DaemonStatus::default());
        let daemon = Self {
            config,
            discovery,
            publish_name: None,
            advertised: false,
            running: None,
            event_tx,
            status: Arc::new(status),
        };
        (daemon, event_rx)
    }

    /// Bind the control socket (and the TCP listener when enabled) and start
    /// accepting. Returns the socket path.
    ///
    /// On failure nothing stays bound.
    pub async fn start(&mut self, code: AuthorizationCode) -> Result<PathBuf, DaemonError> {
        if self.running.is_some() {
            return Err(DaemonError::AlreadyRunning);
        }

        let dir = setup::socket_dir(&self.config)?;
        let socket_path = dir.join(socket_file_name(std::process::id()));
        clear_stale_socket(&socket_path).await?;

        let tcp = if self.config.daemon.network {
            let ip = self.config.daemon.bind_addr()?;
            let first = self.config.daemon.port;
            let listener = transport::bind_tcp(ip, first, self.config.daemon.port_attempts)
                .await
                .map_err(|source| DaemonError::Bind {
                    target: format!("{ip}:{first} (+{} ports)", self.config.daemon.port_attempts),
                    source,
                })?;
            Some(listener)
        } else {
            None
        };

        let listener = Listener::bind(&socket_path, tcp).map_err(|source| DaemonError::Bind {
            target: socket_path.display().to_string(),
            source,
        })?;
        let port = listener.local_port();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            code,
            self.config.daemon.handshake_timeout(),
            self.event_tx.clone(),
            Arc::clone(&self.status),
            shutdown_rx,
        ));

        self.running = Some(Running {
            socket_path: socket_path.clone(),
            port,
            shutdown_tx,
            accept_task,
        });
        self.status.send_modify(|s| {
            s.running = true;
            s.socket_path = Some(socket_path.clone());
            s.port = port;
        });
        info!(path = %socket_path.display(), port, "daemon started");

        if self.publish_name.is_some() {
            // The listener stays up even when the network is unreachable.
            if let Err(e) = self.advertise().await {
                warn!(error = %e, "failed to publish");
                self.publish_name = None;
            }
        }
        Ok(socket_path)
    }

    /// Advertise the network listener under `name`. A no-op while already
    /// publishing; before `start` the name is remembered and advertised
    /// once the listener is up.
    pub async fn publish(&mut self, name: &str) -> Result<(), DaemonError> {
        if self.publish_name.is_some() {
            debug!(name, "already publishing");
            return Ok(());
        }
        self.publish_name = Some(name.to_string());
        if self.running.is_some() {
            if let Err(e) = self.advertise().await {
                self.publish_name = None;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn advertise(&mut self) -> Result<(), DaemonError> {
        let (Some(name), Some(running)) = (self.publish_name.as_deref(), self.running.as_ref())
        else {
            return Ok(());
        };
        let Some(port) = running.port else {
            warn!(name, "network listener disabled, nothing to publish");
            return Ok(());
        };
        let Some(discovery) = self.discovery.as_mut() else {
            warn!(name, "no discovery backend, not publishing");
            return Ok(());
        };
        discovery.advertise(name, port).await?;
        self.advertised = true;
        let name = name.to_string();
        self.status.send_if_modified(|s| {
            if s.publishing.as_deref() == Some(name.as_str()) {
                return false;
            }
            s.publishing = Some(name);
            true
        });
        Ok(())
    }

    /// Stop advertising and accepting. Idempotent; open sessions keep
    /// running.
    pub async fn stop(&mut self) -> Result<(), DaemonError> {
        self.publish_name = None;
        if self.running.is_none() && !self.advertised {
            return Ok(());
        }
        let unpublished = self.unpublish().await;

        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(());
            let mut task = running.accept_task;
            if tokio::time::timeout(Duration::from_secs(5), &mut task).await.is_err() {
                warn!("accept loop did not stop, aborting");
                task.abort();
            }
            remove_socket(&running.socket_path);
            info!(path = %running.socket_path.display(), "daemon stopped");
        }
        self.status.send_if_modified(|s| {
            let changed = s.running || s.socket_path.is_some() || s.publishing.is_some();
            s.running = false;
            s.socket_path = None;
            s.port = None;
            s.publishing = None;
            changed
        });
        unpublished
    }

    async fn unpublish(&mut self) -> Result<(), DaemonError> {
        if !std::mem::take(&mut self.advertised) {
            return Ok(());
        }
        if let Some(discovery) = self.discovery.as_mut() {
            discovery.stop_advertising().await?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound control socket, while running.
    pub fn socket_path(&self) -> Option<&Path> {
        self.running.as_ref().map(|r| r.socket_path.as_path())
    }

    /// TCP port of the network listener, while running.
    pub fn port(&self) -> Option<u16> {
        self.running.as_ref().and_then(|r| r.port)
    }

    /// Endpoint a client on this machine connects to, while running.
    pub fn local_endpoint(&self) -> Option<Endpoint> {
        self.socket_path().map(Endpoint::local)
    }

    pub fn status(&self) -> DaemonStatus {
        self.status.borrow().clone()
    }

    /// Watch the daemon status.
    pub fn status_receiver(&self) -> watch::Receiver<DaemonStatus> {
        self.status.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(());
            remove_socket(&running.socket_path);
        }
    }
}

/// Remove a socket file left behind by a dead host. A socket something
/// still answers on is never touched.
async fn clear_stale_socket(path: &Path) -> Result<(), DaemonError> {
    if tokio::fs::symlink_metadata(path).await.is_err() {
        return Ok(());
    }
    if UnixStream::connect(path).await.is_ok() {
        return Err(DaemonError::SocketInUse(path.to_path_buf()));
    }
    info!(path = %path.display(), "removing stale socket");
    tokio::fs::remove_file(path)
        .await
        .map_err(|source| DaemonError::Bind {
            target: path.display().to_string(),
            source,
        })
}

fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove socket");
        }
    }
}

async fn accept_loop(
    listener: Listener,
    code: AuthorizationCode,
    handshake_timeout: Option<Duration>,
    event_tx: mpsc::Sender<DaemonEvent>,
    status: Arc<watch::Sender<DaemonStatus>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "accepted connection");
                    tokio::spawn(handshake(
                        stream,
                        peer,
                        code,
                        handshake_timeout,
                        event_tx.clone(),
                        Arc::clone(&status),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    // Back off on persistent errors such as fd exhaustion.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
    debug!("accept loop stopped");
}

async fn handshake(
    stream: tournbuddy_protocol::BoxedStream,
    peer: String,
    code: AuthorizationCode,
    timeout: Option<Duration>,
    event_tx: mpsc::Sender<DaemonEvent>,
    status: Arc<watch::Sender<DaemonStatus>>,
) {
    let (handle, events) = open(stream, peer.clone());
    let event = match authorize(handle, events, code, timeout).await {
        Ok(session) => {
            status.send_modify(|s| s.accepted += 1);
            DaemonEvent::SessionOpened(session)
        }
        Err(e) => {
            warn!(peer = %peer, error = %e, "handshake rejected");
            status.send_modify(|s| s.rejected += 1);
            DaemonEvent::HandshakeRejected {
                peer,
                reason: e.to_string(),
            }
        }
    };
    if event_tx.send(event).await.is_err() {
        debug!("daemon event receiver dropped");
    }
}
