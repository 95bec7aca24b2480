//! Config loading, socket directory and discovery backend selection.

use std::path::{Path, PathBuf};

use tournbuddy_discovery::{directory, Discovery, MdnsDiscovery};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::DaemonError;

/// Load configuration from the given path, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<Config, DaemonError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path(),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| DaemonError::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| DaemonError::Config(format!("failed to parse config: {e}")))?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else if path.is_some() {
        Err(DaemonError::Config(format!(
            "config file {} does not exist",
            config_path.display()
        )))
    } else {
        info!("no config file found, using defaults");
        Ok(Config::default())
    }
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("tournbuddy")
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Directory for local control sockets, honouring the configured override.
pub fn socket_dir(config: &Config) -> Result<PathBuf, DaemonError> {
    Ok(directory::resolve(config.daemon.socket_dir.as_deref())?)
}

/// This machine's host name.
pub fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "tournbuddy".to_string())
}

/// The mDNS backend, or `None` when mDNS cannot start on this machine.
pub fn mdns_backend() -> Option<Box<dyn Discovery>> {
    match MdnsDiscovery::new(&host_name()) {
        Ok(mdns) => Some(Box::new(mdns)),
        Err(e) => {
            warn!(error = %e, "mDNS unavailable, continuing without network discovery");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));
    }

    #[test]
    fn loads_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[identity]\nname = \"Main Event\"\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.identity.name, "Main Event");
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[daemon]\nport = \"high\"\n").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(DaemonError::Config(_))));
    }

    #[test]
    fn socket_dir_honours_override() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.daemon.socket_dir = Some(dir.path().to_path_buf());
        assert_eq!(socket_dir(&config).unwrap(), dir.path());
    }

    #[test]
    fn config_dir_is_namespaced() {
        assert!(config_dir().ends_with("tournbuddy"));
        assert!(default_config_path().ends_with("tournbuddy/config.toml"));
    }
}
