//! Per-backend HTTP client
//!
//! Each backend gets exactly one [`BackendClient`]. It owns the backend's
//! connection pool and dial strategy and performs one request/response
//! exchange per `forward` call. It never retries and never falls back to
//! another backend.

use crate::error::{BackendError, ProxyError, Result};
use crate::http::parser::{self, BodyFraming, ParseError};
use crate::http::request::{Method, Request, RequestBuilder};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::http::writer::serialize_request;
use crate::proxy::backend::BackendTarget;
use crate::proxy::pool::{Lease, Pool, PoolConfig};
use crate::proxy::transport::{BackendStream, Transport};
use bytes::BytesMut;
use futures_util::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Default buffer size for reading backend responses
const BUFFER_SIZE: usize = 8192;

/// Bound on the graceful close of one idle connection during shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Limits and timeouts applied by a backend client
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub max_connections: usize,
    pub max_idle_duration: Duration,
    pub max_lifetime: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_connections: 512,
            max_idle_duration: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Connection-pooling client bound to one backend
#[derive(Debug)]
pub struct BackendClient {
    name: String,
    host: String,
    transport: Transport,
    pool: Pool<BackendStream>,
    settings: ClientSettings,
    dials: AtomicU64,
}

impl BackendClient {
    pub fn new(target: &BackendTarget, transport: Transport, settings: ClientSettings) -> Self {
        let pool = Pool::new(PoolConfig {
            max_connections: settings.max_connections,
            max_idle_duration: settings.max_idle_duration,
            max_lifetime: settings.max_lifetime,
        });

        Self {
            name: target.to_string(),
            host: target.host_header().to_string(),
            transport,
            pool,
            settings,
            dials: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Send `request` to the backend and return its response as received.
    pub async fn forward(&self, request: &Request) -> Result<Response> {
        let lease = self
            .pool
            .acquire(self.settings.connect_timeout)
            .await
            .map_err(|_| self.unavailable(BackendError::PoolExhausted))?;

        self.exchange(lease, request)
            .await
            .map_err(|e| self.unavailable(e))
    }

    /// Open a brand-new connection, send a bodiless HEAD probe over it and
    /// leave the connection pooled for later traffic.
    pub async fn probe(&self) -> Result<StatusCode> {
        let lease = self
            .pool
            .acquire_vacant(self.settings.connect_timeout)
            .await
            .map_err(|_| self.unavailable(BackendError::PoolExhausted))?;

        let request = RequestBuilder::new()
            .method(Method::HEAD)
            .path("/")
            .header("Host", self.host.as_str())
            .build()
            .map_err(|e| self.unavailable(BackendError::Io(std::io::Error::other(e))))?;

        let response = self
            .exchange(lease, &request)
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(response.status)
    }

    /// Close every idle pooled connection. Every connection is released even
    /// if a graceful close fails; the first failure is returned.
    pub async fn close_idle(&self) -> Result<usize> {
        let drained = self.pool.drain_idle();
        let count = drained.len();
        let mut first_error = None;

        for mut stream in drained {
            let result = match timeout(CLOSE_TIMEOUT, stream.shutdown()).await {
                Ok(result) => result,
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out closing idle connection",
                )),
            };
            if let Err(e) = result {
                // A peer that already went away is closed as far as we care
                if e.kind() != std::io::ErrorKind::NotConnected && first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(source) => Err(ProxyError::CloseIdle {
                backend: self.name.clone(),
                source,
            }),
            None => Ok(count),
        }
    }

    pub fn idle_connections(&self) -> usize {
        self.pool.idle_count()
    }

    pub fn open_connections(&self) -> usize {
        self.pool.open_count()
    }

    /// Number of connections successfully dialed so far
    pub fn dials(&self) -> u64 {
        self.dials.load(Ordering::Relaxed)
    }

    async fn exchange(
        &self,
        mut lease: Lease<BackendStream>,
        request: &Request,
    ) -> std::result::Result<Response, BackendError> {
        if lease.conn_mut().is_some_and(|stream| is_stale(stream)) {
            tracing::trace!(backend = %self.name, "pooled connection went stale, redialing");
            lease.discard();
        }
        if lease.conn_mut().is_none() {
            let stream = self.dial().await?;
            lease.attach(stream);
        }
        let reused = lease.is_reused();
        let Some(stream) = lease.conn_mut() else {
            return Err(BackendError::ClosedEarly);
        };

        tracing::trace!(backend = %self.name, reused, "sending request to backend");

        send_request(stream, request, self.settings.write_timeout).await?;
        let (response, reusable) = read_response(
            stream,
            request.method == Method::HEAD,
            self.settings.read_timeout,
        )
        .await?;

        if reusable && request.keep_alive() {
            lease.release();
        }

        Ok(response)
    }

    async fn dial(&self) -> std::result::Result<BackendStream, BackendError> {
        let stream = timeout(self.settings.connect_timeout, self.transport.dial())
            .await
            .map_err(|_| BackendError::ConnectTimeout)?
            .map_err(BackendError::Dial)?;

        self.dials.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(backend = %self.name, "connected to backend");
        Ok(stream)
    }

    fn unavailable(&self, source: BackendError) -> ProxyError {
        ProxyError::BackendUnavailable {
            backend: self.name.clone(),
            source,
        }
    }
}

/// An idle connection should have nothing to read. EOF, stray bytes or an
/// error all mean it cannot carry another request.
fn is_stale<S>(stream: &mut S) -> bool
where
    S: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    stream.read(&mut byte).now_or_never().is_some()
}

async fn send_request<S>(
    stream: &mut S,
    request: &Request,
    write_timeout: Duration,
) -> std::result::Result<(), BackendError>
where
    S: AsyncWrite + Unpin,
{
    let bytes = serialize_request(request);
    timeout(write_timeout, async {
        stream.write_all(&bytes).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| BackendError::WriteTimeout)??;
    Ok(())
}

/// Read one complete response. Returns it with a flag telling whether the
/// connection can carry another request.
pub(crate) async fn read_response<S>(
    stream: &mut S,
    head_request: bool,
    read_timeout: Duration,
) -> std::result::Result<(Response, bool), BackendError>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    // Interim 1xx heads come before the final response on the same stream
    let head = loop {
        let (head, consumed) = loop {
            match parser::parse_response_head(&buffer) {
                Ok(parsed) => break parsed,
                Err(ParseError::Incomplete) => {}
                Err(e) => return Err(BackendError::Malformed(e)),
            }
            if read_some(stream, &mut buffer, read_timeout).await? == 0 {
                return Err(BackendError::ClosedEarly);
            }
        };
        let _ = buffer.split_to(consumed);

        if head.status == StatusCode::SWITCHING_PROTOCOLS {
            return Err(BackendError::Upgrade);
        }
        if !head.status.is_informational() {
            break head;
        }
        tracing::trace!(status = head.status.as_u16(), "skipping interim response");
    };

    let framing = parser::response_framing(&head, head_request).map_err(BackendError::Malformed)?;

    let body = match framing {
        BodyFraming::Empty => BytesMut::new(),
        BodyFraming::Length(n) => {
            while buffer.len() < n {
                if read_some(stream, &mut buffer, read_timeout).await? == 0 {
                    return Err(BackendError::ClosedEarly);
                }
            }
            buffer.split_to(n)
        }
        BodyFraming::Chunked => loop {
            match parser::chunked_body_len(&buffer).map_err(BackendError::Malformed)? {
                Some(n) => break buffer.split_to(n),
                None => {
                    if read_some(stream, &mut buffer, read_timeout).await? == 0 {
                        return Err(BackendError::ClosedEarly);
                    }
                }
            }
        },
        BodyFraming::UntilClose => {
            while read_some(stream, &mut buffer, read_timeout).await? > 0 {}
            buffer.split_to(buffer.len())
        }
    };

    let close_delimited = framing == BodyFraming::UntilClose;
    let response = ResponseBuilder::new(head.status)
        .version(head.version)
        .reason(head.reason)
        .headers(head.headers)
        .body(body.freeze())
        .close_delimited(close_delimited)
        .build_raw();

    // Surplus bytes after a complete response mean the stream is out of sync
    let reusable = !close_delimited && buffer.is_empty() && response.keep_alive();
    Ok((response, reusable))
}

async fn read_some<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    read_timeout: Duration,
) -> std::result::Result<usize, BackendError>
where
    S: AsyncRead + Unpin,
{
    if buffer.capacity() - buffer.len() < BUFFER_SIZE / 2 {
        buffer.reserve(BUFFER_SIZE);
    }
    let n = timeout(read_timeout, stream.read_buf(buffer))
        .await
        .map_err(|_| BackendError::ReadTimeout)??;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_content_length_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Id: a\r\n\r\nhello";
        let mut stream = &raw[..];

        let (response, reusable) = read_response(&mut stream, false, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"hello");
        assert_eq!(response.header("x-id"), Some("a"));
        assert!(reusable);
    }

    #[tokio::test]
    async fn keeps_chunk_framing_verbatim() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n";
        let mut stream = &raw[..];

        let (response, reusable) = read_response(&mut stream, false, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(&response.body[..], b"3\r\nabc\r\n0\r\n\r\n");
        assert!(reusable);
    }

    #[tokio::test]
    async fn eof_delimited_body_is_not_reusable() {
        let raw = b"HTTP/1.1 200 OK\r\n\r\nuntil the end";
        let mut stream = &raw[..];

        let (response, reusable) = read_response(&mut stream, false, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(&response.body[..], b"until the end");
        assert!(response.close_delimited);
        assert!(!reusable);
    }

    #[tokio::test]
    async fn head_response_has_no_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 42\r\n\r\n";
        let mut stream = &raw[..];

        let (response, reusable) = read_response(&mut stream, true, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(response.body.is_empty());
        assert_eq!(response.header("Content-Length"), Some("42"));
        assert!(reusable);
    }

    #[tokio::test]
    async fn interim_responses_are_skipped() {
        let raw = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 103 Early Hints\r\nLink: </a.css>\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok";
        let mut stream = &raw[..];

        let (response, reusable) = read_response(&mut stream, false, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(response.status.as_u16(), 201);
        assert_eq!(response.header("Link"), None);
        assert_eq!(&response.body[..], b"ok");
        assert!(reusable);
    }

    #[tokio::test]
    async fn switching_protocols_is_refused() {
        let raw = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
        let mut stream = &raw[..];

        let err = read_response(&mut stream, false, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::Upgrade));
    }

    #[tokio::test]
    async fn closed_stream_is_stale() {
        let (mut near, far) = tokio::io::duplex(64);
        assert!(!is_stale(&mut near));

        drop(far);
        assert!(is_stale(&mut near));
    }

    #[tokio::test]
    async fn unread_bytes_make_stream_stale() {
        let (mut near, mut far) = tokio::io::duplex(64);
        far.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();

        assert!(is_stale(&mut near));
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort";
        let mut stream = &raw[..];

        let err = read_response(&mut stream, false, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::ClosedEarly));
    }
}
