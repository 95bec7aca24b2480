//! Byte-stream transport: connect to an endpoint, listen on a Unix socket
//! and an optional TCP port.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tournbuddy_types::{Advertisement, Endpoint};
use tracing::{debug, info};

use crate::error::ProtocolError;

/// Any bidirectional byte stream a connection can run over.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn ByteStream>;

/// Open a stream to `endpoint`.
///
/// Advertised endpoints use the addresses carried by the announcement when
/// there are any and fall back to resolving the advertised host name.
pub async fn connect(endpoint: &Endpoint) -> Result<BoxedStream, ProtocolError> {
    match endpoint {
        Endpoint::LocalSocket { path } => {
            let stream = UnixStream::connect(path)
                .await
                .map_err(|source| ProtocolError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
            debug!(path = %path.display(), "connected to local socket");
            Ok(Box::new(stream))
        }
        Endpoint::NetworkAddress { host, port } => {
            let addrs = resolve(endpoint, host, *port).await?;
            connect_tcp(endpoint, &addrs).await
        }
        Endpoint::Advertised(ad) => {
            let addrs = resolve_advertisement(endpoint, ad).await?;
            connect_tcp(endpoint, &addrs).await
        }
    }
}

async fn resolve_advertisement(
    endpoint: &Endpoint,
    ad: &Advertisement,
) -> Result<Vec<SocketAddr>, ProtocolError> {
    let addrs = ad.socket_addrs();
    if addrs.is_empty() {
        resolve(endpoint, ad.lookup_host(), ad.port).await
    } else {
        Ok(addrs)
    }
}

async fn resolve(endpoint: &Endpoint, host: &str, port: u16) -> Result<Vec<SocketAddr>, ProtocolError> {
    // Literal addresses skip the resolver.
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ProtocolError::Resolution {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?
        .collect();
    if addrs.is_empty() {
        return Err(ProtocolError::Resolution {
            endpoint: endpoint.to_string(),
            reason: "no addresses".to_string(),
        });
    }
    Ok(addrs)
}

async fn connect_tcp(endpoint: &Endpoint, addrs: &[SocketAddr]) -> Result<BoxedStream, ProtocolError> {
    let mut last_err = io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses to try");
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                debug!(remote = %addr, "connected over tcp");
                return Ok(Box::new(stream));
            }
            Err(e) => {
                debug!(remote = %addr, error = %e, "tcp connect attempt failed");
                last_err = e;
            }
        }
    }
    Err(ProtocolError::Connect {
        endpoint: endpoint.to_string(),
        source: last_err,
    })
}

/// Bind a TCP listener on `ip`, starting at `port` and moving up past ports
/// already in use, trying at most `attempts` ports.
pub async fn bind_tcp(ip: IpAddr, port: u16, attempts: u16) -> io::Result<TcpListener> {
    let mut last_err = io::Error::new(io::ErrorKind::AddrInUse, "no ports to try");
    for offset in 0..attempts.max(1) {
        let Some(candidate) = port.checked_add(offset) else {
            break;
        };
        match TcpListener::bind(SocketAddr::new(ip, candidate)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                debug!(port = candidate, "port in use, trying next");
                last_err = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err)
}

/// Inbound side: a Unix socket listener plus an optional TCP listener.
#[derive(Debug)]
pub struct Listener {
    unix: UnixListener,
    tcp: Option<TcpListener>,
}

impl Listener {
    /// Bind the Unix socket at `path`. Fails if the path exists.
    pub fn bind(path: &Path, tcp: Option<TcpListener>) -> io::Result<Self> {
        let unix = UnixListener::bind(path)?;
        info!(
            path = %path.display(),
            port = tcp.as_ref().and_then(|l| l.local_addr().ok()).map(|a| a.port()),
            "listening"
        );
        Ok(Self { unix, tcp })
    }

    /// Port of the TCP listener, if there is one.
    pub fn local_port(&self) -> Option<u16> {
        self.tcp
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|a| a.port())
    }

    /// Wait for the next inbound stream on either listener. Returns the
    /// stream and a description of the peer.
    pub async fn accept(&self) -> io::Result<(BoxedStream, String)> {
        let tcp_accept = async {
            match &self.tcp {
                Some(tcp) => tcp.accept().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            accepted = self.unix.accept() => {
                let (stream, _) = accepted?;
                Ok((Box::new(stream) as BoxedStream, "local".to_string()))
            }
            accepted = tcp_accept => {
                let (stream, addr) = accepted?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream) as BoxedStream, addr.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn bind_tcp_skips_ports_in_use() {
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let listener = bind_tcp(IpAddr::V4(Ipv4Addr::LOCALHOST), port, 50)
            .await
            .unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn bind_tcp_gives_up_after_attempts() {
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = bind_tcp(IpAddr::V4(Ipv4Addr::LOCALHOST), port, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn connect_to_missing_socket_is_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::local(dir.path().join("tournamentd.1.sock"));
        let err = connect(&endpoint).await.err().unwrap();
        assert!(matches!(err, ProtocolError::Connect { .. }));
    }

    #[tokio::test]
    async fn unresolvable_host_is_resolution_failure() {
        let endpoint = Endpoint::network("no-such-host.invalid", 25600);
        let err = connect(&endpoint).await.err().unwrap();
        assert!(matches!(err, ProtocolError::Resolution { .. }));
    }

    #[tokio::test]
    async fn advertisement_without_addresses_uses_host_name() {
        let tcp = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = tcp.local_addr().unwrap().port();
        let ad = Advertisement {
            fullname: "Test._tournbuddy._tcp.local.".to_string(),
            hostname: "127.0.0.1.".to_string(),
            port,
            addresses: Vec::new(),
        };
        let endpoint = Endpoint::advertised(ad);
        let (connected, accepted) = tokio::join!(connect(&endpoint), tcp.accept());
        assert!(connected.is_ok());
        assert!(accepted.is_ok());
    }
}
