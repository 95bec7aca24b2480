//! Observable daemon state.

use std::path::PathBuf;

use serde::Serialize;
use tournbuddy_types::Endpoint;

/// Snapshot of the daemon, published on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    /// Bound control socket.
    pub socket_path: Option<PathBuf>,
    /// TCP port of the network listener.
    pub port: Option<u16>,
    /// Name being advertised over mDNS.
    pub publishing: Option<String>,
    /// Inbound connections promoted to sessions.
    pub accepted: u64,
    /// Inbound connections that failed the handshake.
    pub rejected: u64,
}

impl DaemonStatus {
    /// Endpoint a local client connects to.
    pub fn local_endpoint(&self) -> Option<Endpoint> {
        self.socket_path.as_ref().map(Endpoint::local)
    }
}
