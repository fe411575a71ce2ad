//! Dial strategies for each transport mode
//!
//! The strategy is picked once per backend when its client is built; dialing
//! never inspects the target again.

use crate::error::{ProxyError, Result};
use crate::proxy::backend::{BackendTarget, TransportMode};
use rustls::pki_types::ServerName;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

#[cfg(unix)]
use tokio::net::UnixStream;

/// How to open a new connection to one backend
#[derive(Clone)]
pub enum Transport {
    Tcp {
        addr: String,
    },
    Tls {
        addr: String,
        server_name: ServerName<'static>,
        connector: TlsConnector,
    },
    #[cfg(unix)]
    Unix {
        path: std::path::PathBuf,
    },
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Tcp { addr } => f.debug_struct("Tcp").field("addr", addr).finish(),
            Transport::Tls {
                addr, server_name, ..
            } => f
                .debug_struct("Tls")
                .field("addr", addr)
                .field("server_name", server_name)
                .finish(),
            #[cfg(unix)]
            Transport::Unix { path } => f.debug_struct("Unix").field("path", path).finish(),
        }
    }
}

impl Transport {
    /// Pick the dial strategy for a target. https targets need a connector.
    pub fn for_target(target: &BackendTarget, tls: Option<&TlsConnector>) -> Result<Self> {
        match target.mode() {
            TransportMode::Http => Ok(Transport::Tcp {
                addr: target.address().to_string(),
            }),
            TransportMode::Https => {
                let connector = tls.cloned().ok_or_else(|| {
                    ProxyError::config(format!("no TLS connector for {target}"))
                })?;
                let name = target.server_name().unwrap_or_default().to_string();
                let server_name = ServerName::try_from(name).map_err(|e| {
                    ProxyError::config(format!("invalid TLS server name for {target}: {e}"))
                })?;
                Ok(Transport::Tls {
                    addr: target.address().to_string(),
                    server_name,
                    connector,
                })
            }
            #[cfg(unix)]
            TransportMode::Unix => Ok(Transport::Unix {
                path: target.address().into(),
            }),
            #[cfg(not(unix))]
            TransportMode::Unix => Err(ProxyError::config(format!(
                "unix socket backends are not supported on this platform: {target}"
            ))),
        }
    }

    /// Open a new connection. The caller bounds this with its connect timeout.
    pub async fn dial(&self) -> io::Result<BackendStream> {
        match self {
            Transport::Tcp { addr } => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(BackendStream::Tcp(stream))
            }
            Transport::Tls {
                addr,
                server_name,
                connector,
            } => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                let tls = connector.connect(server_name.clone(), stream).await?;
                Ok(BackendStream::Tls(Box::new(tls)))
            }
            #[cfg(unix)]
            Transport::Unix { path } => Ok(BackendStream::Unix(UnixStream::connect(path).await?)),
        }
    }
}

/// Build the client TLS configuration shared by every https backend.
///
/// Trusts the Mozilla root set plus any PEM certificates in `ca_file`.
pub fn tls_connector(ca_file: Option<&Path>) -> Result<TlsConnector> {
    let mut roots = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    if let Some(path) = ca_file {
        let file = std::fs::File::open(path).map_err(|e| {
            ProxyError::config(format!("cannot open CA file {}: {e}", path.display()))
        })?;
        let mut reader = io::BufReader::new(file);
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|e| {
                ProxyError::config(format!("invalid CA file {}: {e}", path.display()))
            })?;
            roots.add(cert).map_err(|e| {
                ProxyError::config(format!("invalid CA certificate in {}: {e}", path.display()))
            })?;
        }
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ProxyError::config(format!("TLS setup failed: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}

/// A connection to a backend, whatever the transport
pub enum BackendStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for BackendStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            #[cfg(unix)]
            BackendStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BackendStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            #[cfg(unix)]
            BackendStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            #[cfg(unix)]
            BackendStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            #[cfg(unix)]
            BackendStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
