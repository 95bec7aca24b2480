//! Endpoints: the places a tournament host can be reached.

use std::borrow::Cow;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::service::{instance_name, DEFAULT_PORT};

/// Which of the three endpoint forms a value takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Advertised,
    NetworkAddress,
    LocalSocket,
}

/// A resolved mDNS advertisement for a tournament host.
///
/// Two advertisements are the same service when their full DNS-SD names
/// match; host, port and addresses may change on re-announcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advertisement {
    /// Full instance name, e.g. `Main Event._tournbuddy._tcp.local.`.
    pub fullname: String,
    /// Advertised host name, e.g. `hostbox.local.`.
    pub hostname: String,
    pub port: u16,
    /// Addresses carried by the announcement. May be empty, in which case
    /// connecting falls back to resolving `hostname`.
    #[serde(default)]
    pub addresses: Vec<IpAddr>,
}

impl Advertisement {
    /// Display name (the instance label without service type and domain).
    pub fn name(&self) -> &str {
        instance_name(&self.fullname)
    }

    /// Socket addresses built from the advertised addresses, IPv4 first.
    pub fn socket_addrs(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = self
            .addresses
            .iter()
            .map(|ip| SocketAddr::new(*ip, self.port))
            .collect();
        addrs.sort_by_key(|addr| (addr.is_ipv6(), *addr));
        addrs
    }

    /// Host name without the trailing root dot, ready for a resolver.
    pub fn lookup_host(&self) -> &str {
        self.hostname.strip_suffix('.').unwrap_or(&self.hostname)
    }
}

impl PartialEq for Advertisement {
    fn eq(&self, other: &Self) -> bool {
        self.fullname == other.fullname
    }
}

impl Eq for Advertisement {}

impl Hash for Advertisement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fullname.hash(state);
    }
}

/// One reachable tournament host.
///
/// Equality follows identity: advertisements by full service name, network
/// endpoints by host and port, local sockets by path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// Found through an mDNS advertisement.
    Advertised(Advertisement),
    /// Explicit host and port.
    NetworkAddress { host: String, port: u16 },
    /// Unix domain socket on this machine.
    LocalSocket { path: PathBuf },
}

impl Endpoint {
    pub fn advertised(advertisement: Advertisement) -> Self {
        Self::Advertised(advertisement)
    }

    pub fn network(host: impl Into<String>, port: u16) -> Self {
        Self::NetworkAddress {
            host: host.into(),
            port,
        }
    }

    /// Network endpoint on the default tournament port.
    pub fn network_default_port(host: impl Into<String>) -> Self {
        Self::network(host, DEFAULT_PORT)
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::LocalSocket { path: path.into() }
    }

    pub fn kind(&self) -> EndpointKind {
        match self {
            Self::Advertised(_) => EndpointKind::Advertised,
            Self::NetworkAddress { .. } => EndpointKind::NetworkAddress,
            Self::LocalSocket { .. } => EndpointKind::LocalSocket,
        }
    }

    /// Whether reaching this endpoint goes over the network.
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::LocalSocket { .. })
    }

    /// Display identifier.
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            Self::Advertised(ad) => Cow::Borrowed(ad.name()),
            Self::NetworkAddress { host, port } => Cow::Owned(format!("{host}:{port}")),
            Self::LocalSocket { path } => path
                .file_name()
                .map_or_else(|| path.to_string_lossy(), |name| name.to_string_lossy()),
        }
    }

    /// Socket path, for local endpoints.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::LocalSocket { path } => Some(path),
            _ => None,
        }
    }

    /// Port, for remote endpoints.
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Advertised(ad) => Some(ad.port),
            Self::NetworkAddress { port, .. } => Some(*port),
            Self::LocalSocket { .. } => None,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Advertised(ad) => write!(f, "{} ({}:{})", ad.name(), ad.lookup_host(), ad.port),
            Self::NetworkAddress { host, port } => write!(f, "{host}:{port}"),
            Self::LocalSocket { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Parse a user-supplied target: a path (absolute or starting with `.`)
/// becomes a local socket endpoint, `host:port` or `[v6]:port` a network
/// endpoint. Bare names are rejected so callers can look them up as
/// advertisements instead.
impl FromStr for Endpoint {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('/') || s.starts_with('.') {
            return Ok(Self::local(s));
        }
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self::network(addr.ip().to_string(), addr.port()));
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TypesError::InvalidEndpoint(format!("{s:?} has no port")))?;
        if host.is_empty() || host.contains(':') {
            return Err(TypesError::InvalidEndpoint(format!("{s:?} has no usable host")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| TypesError::InvalidEndpoint(format!("{s:?} has an invalid port")))?;
        Ok(Self::network(host, port))
    }
}
