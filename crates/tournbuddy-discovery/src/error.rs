//! Discovery subsystem errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no usable socket directory (tried {})", display_paths(.tried))]
    DirectoryUnavailable { tried: Vec<PathBuf> },

    #[error("mDNS registration failed: {0}")]
    Registration(String),

    #[error("mDNS browse failed: {0}")]
    Browse(String),

    #[error("mDNS daemon unavailable: {0}")]
    Unavailable(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
