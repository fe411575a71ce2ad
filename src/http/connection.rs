use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::http::parser::{parse_http_request_limited, ParseError};
use crate::http::request::Request;
use crate::http::writer::ResponseWriter;
use crate::proxy::upstream::ProxyHandler;

/// Timeouts and keep-alive policy for inbound connections
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Budget for receiving a complete request
    pub read_timeout: Duration,
    /// Budget for sending a complete response
    pub write_timeout: Duration,
    /// How long a keep-alive connection may wait for its next request
    pub idle_timeout: Duration,
    pub keep_alive: bool,
    /// 0 means unlimited
    pub max_requests_per_conn: usize,
    pub max_request_body_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(10),
            keep_alive: true,
            max_requests_per_conn: 0,
            max_request_body_size: 512 * 1024,
        }
    }
}

pub struct Connection<S> {
    stream: S,
    buffer: BytesMut,
    state: ConnectionState,
    handler: Arc<ProxyHandler>,
    settings: ConnectionSettings,
    shutdown: CancellationToken,
    served: usize,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        handler: Arc<ProxyHandler>,
        settings: ConnectionSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            state: ConnectionState::Reading,
            handler,
            settings,
            shutdown,
            served: 0,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match &mut self.state {
                ConnectionState::Reading => match self.read_request().await? {
                    Some(req) => {
                        self.state = ConnectionState::Processing(req);
                    }
                    None => {
                        self.state = ConnectionState::Closed;
                    }
                },

                ConnectionState::Processing(_) => {
                    let ConnectionState::Processing(req) =
                        std::mem::replace(&mut self.state, ConnectionState::Closed)
                    else {
                        continue;
                    };
                    self.served += 1;

                    let client_keep_alive = req.keep_alive();
                    let response = self.handler.forward_request(req).await;

                    let keep_alive = self.settings.keep_alive
                        && client_keep_alive
                        && response.keep_alive()
                        && !self.request_limit_reached()
                        && !self.shutdown.is_cancelled();

                    let writer = ResponseWriter::new(&response);
                    self.state = ConnectionState::Writing(writer, keep_alive);
                }

                ConnectionState::Writing(writer, keep_alive) => {
                    timeout(
                        self.settings.write_timeout,
                        writer.write_to_stream(&mut self.stream),
                    )
                    .await
                    .map_err(|_| anyhow::anyhow!("write timeout"))??;

                    if *keep_alive {
                        self.state = ConnectionState::Reading; // go back for next request
                    } else {
                        self.state = ConnectionState::Closed;
                    }
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Reads the next request. `Ok(None)` means the connection should close
    /// quietly: the client hung up, went idle, or shutdown began between
    /// requests.
    pub async fn read_request(&mut self) -> anyhow::Result<Option<Request>> {
        // The read timeout covers the whole request from its first byte
        let mut deadline: Option<Instant> = None;

        loop {
            // Try parsing whatever we already have
            match parse_http_request_limited(&self.buffer, self.settings.max_request_body_size) {
                Ok((request, consumed)) => {
                    // Remove consumed bytes
                    let _ = self.buffer.split_to(consumed);
                    return Ok(Some(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => {
                    // Malformed request → protocol error
                    return Err(anyhow::anyhow!("HTTP parse error: {:?}", e));
                }
            }

            let between_requests = self.buffer.is_empty();

            // Read more data
            self.buffer.reserve(4096);
            let n = if between_requests {
                let wait = if self.served > 0 {
                    self.settings.idle_timeout
                } else {
                    self.settings.read_timeout
                };
                tokio::select! {
                    _ = self.shutdown.cancelled() => return Ok(None),
                    read = timeout(wait, self.stream.read_buf(&mut self.buffer)) => match read {
                        Ok(n) => n?,
                        Err(_) => return Ok(None),
                    },
                }
            } else {
                let deadline =
                    *deadline.get_or_insert_with(|| Instant::now() + self.settings.read_timeout);
                timeout_at(deadline, self.stream.read_buf(&mut self.buffer))
                    .await
                    .map_err(|_| anyhow::anyhow!("timed out reading request"))??
            };

            if n == 0 {
                if self.buffer.is_empty() {
                    // Client closed connection
                    return Ok(None);
                }
                return Err(anyhow::anyhow!("connection closed mid-request"));
            }
        }
    }

    fn request_limit_reached(&self) -> bool {
        self.settings.max_requests_per_conn > 0 && self.served >= self.settings.max_requests_per_conn
    }
}
