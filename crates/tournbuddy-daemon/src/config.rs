//! Daemon configuration loaded from TOML.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tournbuddy_discovery::BrowserConfig;
use tournbuddy_types::DEFAULT_PORT;

use crate::error::DaemonError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub browser: BrowserSettings,
}

/// Listener and runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// First TCP port tried for the network listener.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Listen on TCP next to the local socket. Publishing needs it.
    #[serde(default = "default_true")]
    pub network: bool,
    /// Ports tried, counting up from `port`, before giving up.
    #[serde(default = "default_port_attempts")]
    pub port_attempts: u16,
    /// Overrides the socket directory search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_dir: Option<PathBuf>,
    /// Seconds an inbound connection gets to present the code. 0 waits
    /// forever.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            network: true,
            port_attempts: default_port_attempts(),
            socket_dir: None,
            handshake_timeout_secs: default_handshake_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    pub fn bind_addr(&self) -> Result<IpAddr, DaemonError> {
        self.bind
            .parse()
            .map_err(|e| DaemonError::Config(format!("invalid bind address {:?}: {e}", self.bind)))
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_secs > 0).then(|| Duration::from_secs(self.handshake_timeout_secs))
    }
}

/// Host identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Name published over mDNS.
    #[serde(default = "default_name")]
    pub name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
        }
    }
}

/// Discovery settings for the browsing side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Browse the network as well as the local socket directory.
    #[serde(default = "default_true")]
    pub mdns: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            mdns: true,
        }
    }
}

impl BrowserSettings {
    /// Browser configuration scanning `socket_dir`.
    pub fn browser_config(&self, socket_dir: PathBuf) -> BrowserConfig {
        let mut config = BrowserConfig::new(socket_dir);
        config.scan_interval = Duration::from_secs(self.scan_interval_secs.max(1));
        config
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_port_attempts() -> u16 {
    100
}

fn default_handshake_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_scan_interval_secs() -> u64 {
    3
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "tournbuddy".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("port = 25600"));
        assert!(toml_str.contains("scan_interval_secs = 3"));
        assert!(!toml_str.contains("socket_dir"));
    }

    #[test]
    fn parse_example_config() {
        let toml_str = r#"
[daemon]
port = 25700
bind = "127.0.0.1"
network = false
socket_dir = "/run/user/1000"
handshake_timeout_secs = 0

[identity]
name = "Friday Game"

[browser]
scan_interval_secs = 10
mdns = false
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.daemon.port, 25700);
        assert!(!config.daemon.network);
        assert_eq!(config.daemon.port_attempts, 100);
        assert_eq!(config.daemon.socket_dir, Some(PathBuf::from("/run/user/1000")));
        assert_eq!(config.daemon.handshake_timeout(), None);
        assert_eq!(config.daemon.bind_addr().unwrap().to_string(), "127.0.0.1");
        assert_eq!(config.identity.name, "Friday Game");
        assert!(!config.browser.mdns);
        let browser = config.browser.browser_config(PathBuf::from("/tmp"));
        assert_eq!(browser.scan_interval, Duration::from_secs(10));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.daemon.port, DEFAULT_PORT);
        assert_eq!(config.daemon.handshake_timeout(), Some(Duration::from_secs(30)));
        assert!(config.browser.mdns);
    }

    #[test]
    fn bad_bind_address_is_config_error() {
        let config = DaemonConfig {
            bind: "not-an-ip".to_string(),
            ..DaemonConfig::default()
        };
        assert!(matches!(config.bind_addr(), Err(DaemonError::Config(_))));
    }
}
