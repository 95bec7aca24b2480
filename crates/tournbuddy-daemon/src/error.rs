//! Daemon errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("already running")]
    AlreadyRunning,

    #[error("another host is listening on {}", .0.display())]
    SocketInUse(PathBuf),

    #[error("failed to bind {target}: {source}")]
    Bind {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("discovery error: {0}")]
    Discovery(#[from] tournbuddy_discovery::DiscoveryError),
}
