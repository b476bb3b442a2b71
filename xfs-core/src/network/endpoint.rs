//! Device server endpoints and the socket connector that dials them.
//!
//! Accepted address forms:
//!
//! ```text
//! local                 Unix socket <socket_dir>/<socket_prefix><device_id>
//! unix://<path>         Unix socket at <path>
//! tcp://<host>:<port>   plain TCP
//! ssl://<host>:<port>   TCP wrapped in TLS, server verified against webpki roots
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use super::gate::{BoxedStream, Connector};
use crate::error::XfsError;

/// Default time allowed for a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default prefix of the per-device local socket name.
pub const DEFAULT_SOCKET_PREFIX: &str = "printec.ndc.device.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Local(PathBuf),
    Tcp { host: String, port: u16 },
    Tls { host: String, port: u16 },
}

impl Endpoint {
    /// Parse a configured address. `local` resolves to
    /// `<socket_dir>/<socket_prefix><device_id>`.
    pub fn parse(
        address: &str,
        device_id: &str,
        socket_dir: &Path,
        socket_prefix: &str,
    ) -> Result<Self, XfsError> {
        let invalid = || XfsError::InvalidEndpoint {
            device_id: device_id.to_string(),
            address: address.to_string(),
        };

        if address == "local" {
            return Ok(Self::Local(
                socket_dir.join(format!("{socket_prefix}{device_id}")),
            ));
        }

        if let Some(path) = address.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Local(PathBuf::from(path)));
        }

        if let Some(rest) = address.strip_prefix("ssl://") {
            let (host, port) = host_port(rest).ok_or_else(invalid)?;
            return Ok(Self::Tls { host, port });
        }

        let rest = address.strip_prefix("tcp://").ok_or_else(invalid)?;
        let (host, port) = host_port(rest).ok_or_else(invalid)?;
        Ok(Self::Tcp { host, port })
    }
}

fn host_port(rest: &str) -> Option<(String, u16)> {
    let (host, port) = rest.split_once(':')?;
    if host.is_empty() || port.contains(':') {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Tls { host, port } => write!(f, "ssl://{host}:{port}"),
        }
    }
}

// ── SocketConnector ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SocketConnector {
    endpoint: Endpoint,
    connect_timeout: Duration,
}

impl SocketConnector {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn dial(&self) -> io::Result<BoxedStream> {
        match &self.endpoint {
            Endpoint::Tcp { host, port } => Ok(Box::new(tcp(host, *port).await?)),
            Endpoint::Tls { host, port } => {
                let server_name = ServerName::try_from(host.clone())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                let stream = tcp(host, *port).await?;
                let tls = tls_connector()?.connect(server_name, stream).await?;
                debug!(endpoint = %self.endpoint, "TLS handshake complete");
                Ok(Box::new(tls))
            }
            #[cfg(unix)]
            Endpoint::Local(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
            #[cfg(not(unix))]
            Endpoint::Local(path) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("local sockets are unavailable here: {}", path.display()),
            )),
        }
    }
}

async fn tcp(host: &str, port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn tls_connector() -> io::Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(io::Error::other)?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

#[async_trait]
impl Connector for SocketConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        match tokio::time::timeout(self.connect_timeout, self.dial()).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out", self.endpoint),
            )),
        }
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(address: &str) -> Result<Endpoint, XfsError> {
        Endpoint::parse(address, "CDM1", Path::new("/run/xfs"), DEFAULT_SOCKET_PREFIX)
    }

    #[test]
    fn local_uses_device_id() {
        assert_eq!(
            parse("local").unwrap(),
            Endpoint::Local(PathBuf::from("/run/xfs/printec.ndc.device.CDM1"))
        );
        assert_eq!(
            Endpoint::parse("local", "CDM1", Path::new("/tmp"), "atm.").unwrap(),
            Endpoint::Local(PathBuf::from("/tmp/atm.CDM1"))
        );
    }

    #[test]
    fn unix_path() {
        assert_eq!(
            parse("unix:///tmp/cdm.sock").unwrap(),
            Endpoint::Local(PathBuf::from("/tmp/cdm.sock"))
        );
        assert!(parse("unix://").is_err());
    }

    #[test]
    fn tcp_host_port() {
        assert_eq!(
            parse("tcp://10.0.0.5:9000").unwrap(),
            Endpoint::Tcp {
                host: "10.0.0.5".into(),
                port: 9000
            }
        );
        assert_eq!(parse("tcp://dev:1").unwrap().to_string(), "tcp://dev:1");
    }

    #[test]
    fn malformed_addresses() {
        for bad in [
            "",
            "tcp://",
            "tcp://host",
            "tcp://:80",
            "tcp://h:p",
            "tcp://h:1:2",
            "udp://h:1",
            "ssl://",
            "ssl://host",
            "ssl://:443",
        ] {
            assert!(
                matches!(parse(bad), Err(XfsError::InvalidEndpoint { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn ssl_host_port() {
        assert_eq!(
            parse("ssl://atm.example.com:4443").unwrap(),
            Endpoint::Tls {
                host: "atm.example.com".into(),
                port: 4443
            }
        );
        assert_eq!(parse("ssl://dev:1").unwrap().to_string(), "ssl://dev:1");
    }

    #[tokio::test]
    async fn tcp_connect_refused() {
        // Bind then drop to get a port nobody is listening on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = SocketConnector::new(Endpoint::Tcp {
            host: "127.0.0.1".into(),
            port,
        });
        assert!(connector.connect().await.is_err());
    }

    #[tokio::test]
    async fn tcp_connect_succeeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = SocketConnector::new(Endpoint::Tcp {
            host: "127.0.0.1".into(),
            port,
        })
        .with_connect_timeout(Duration::from_secs(5));

        let (accepted, dialed) = tokio::join!(listener.accept(), connector.connect());
        assert!(accepted.is_ok());
        assert!(dialed.is_ok());
        assert_eq!(connector.describe(), format!("tcp://127.0.0.1:{port}"));
    }

    #[tokio::test]
    async fn tls_handshake_failure_is_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // A plain-text server: answers the ClientHello with junk and hangs up.
        let server = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut hello = [0u8; 512];
            let _ = socket.read(&mut hello).await;
            let _ = socket.write_all(b"HTTP/1.0 400 Bad Request\r\n\r\n").await;
        });

        let connector = SocketConnector::new(Endpoint::Tls {
            host: "127.0.0.1".into(),
            port,
        })
        .with_connect_timeout(Duration::from_secs(5));

        let err = match connector.connect().await {
            Ok(_) => panic!("handshake with a plain-text server succeeded"),
            Err(e) => e,
        };
        assert_ne!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(connector.describe(), format!("ssl://127.0.0.1:{port}"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn tls_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = SocketConnector::new(Endpoint::Tls {
            host: "127.0.0.1".into(),
            port,
        });
        assert!(connector.connect().await.is_err());
    }
}
