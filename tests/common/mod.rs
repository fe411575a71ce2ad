//! Shared helpers: in-process mock backends and a raw HTTP client.

#![allow(dead_code)]

use sluice::http::parser::{parse_http_request, parse_response_head, ParseError};
use sluice::http::request::{Method, Request};
use sluice::{Config, LogSwitch, Proxy};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub type Reply = Arc<dyn Fn(&Request) -> Vec<u8> + Send + Sync>;

/// A backend that answers every request with `reply`, keeping connections
/// alive unless the request says otherwise.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub accepts: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<Request>>>,
    task: JoinHandle<()>,
}

impl MockBackend {
    /// Answers with `200 OK`, `X-Backend: <name>` and the name as body.
    pub async fn named(name: &str) -> Self {
        Self::spawn(named_reply(name), Duration::ZERO).await
    }

    /// Like [`MockBackend::named`] but waits `delay` before each answer.
    pub async fn slow(name: &str, delay: Duration) -> Self {
        Self::spawn(named_reply(name), delay).await
    }

    /// Answers every request with exactly these bytes.
    pub async fn raw(response: &'static [u8]) -> Self {
        Self::spawn(Arc::new(move |_: &Request| response.to_vec()), Duration::ZERO).await
    }

    /// Like [`MockBackend::named`] but hangs up after every answer without
    /// announcing it.
    pub async fn closing(name: &str) -> Self {
        Self::start(named_reply(name), Duration::ZERO, true).await
    }

    pub async fn spawn(reply: Reply, delay: Duration) -> Self {
        Self::start(reply, delay, false).await
    }

    async fn start(reply: Reply, delay: Duration, hang_up: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn({
            let accepts = accepts.clone();
            let requests = requests.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepts.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_conn(
                        stream,
                        reply.clone(),
                        delay,
                        requests.clone(),
                        hang_up,
                    ));
                }
            }
        });

        Self {
            addr,
            accepts,
            requests,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn accepted(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn named_reply(name: &str) -> Reply {
    let name = name.to_string();
    Arc::new(move |req: &Request| {
        let mut out = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nX-Backend: {}\r\n\r\n",
            name.len(),
            name
        )
        .into_bytes();
        if req.method != Method::HEAD {
            out.extend_from_slice(name.as_bytes());
        }
        out
    })
}

pub async fn serve_backend_conn<S>(
    stream: S,
    reply: Reply,
    delay: Duration,
    requests: Arc<Mutex<Vec<Request>>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    serve_conn(stream, reply, delay, requests, false).await
}

async fn serve_conn<S>(
    mut stream: S,
    reply: Reply,
    delay: Duration,
    requests: Arc<Mutex<Vec<Request>>>,
    hang_up: bool,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        match parse_http_request(&buf) {
            Ok((req, consumed)) => {
                buf.drain(..consumed);
                requests.lock().unwrap().push(req.clone());
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if stream.write_all(&reply(&req)).await.is_err() {
                    return;
                }
                if hang_up || !req.keep_alive() {
                    let _ = stream.shutdown().await;
                    return;
                }
                continue;
            }
            Err(ParseError::Incomplete) => {}
            Err(_) => return,
        }

        let mut tmp = [0u8; 4096];
        match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
        }
    }
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn config_for(backends: Vec<String>) -> Config {
    let mut cfg = Config::default();
    cfg.server.listen_address = "127.0.0.1:0".to_string();
    cfg.backends = backends;
    cfg.logging.enabled = false;
    cfg.connection_pool.connect_timeout_ms = 1_000;
    cfg
}

/// A running proxy with its bound address and serve task.
pub struct RunningProxy {
    pub proxy: Arc<Proxy>,
    pub addr: SocketAddr,
    pub server: JoinHandle<sluice::error::Result<()>>,
}

pub async fn start_proxy(cfg: Config) -> RunningProxy {
    let proxy = Arc::new(Proxy::new(cfg, LogSwitch::disabled()).await.unwrap());
    serve_proxy(proxy).await
}

pub async fn serve_proxy(proxy: Arc<Proxy>) -> RunningProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn({
        let proxy = proxy.clone();
        async move { proxy.serve(listener).await }
    });
    RunningProxy {
        proxy,
        addr,
        server,
    }
}

/// Write `request` and read until the proxy closes the connection.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    out
}

/// `GET path` with `Connection: close`; returns the full response bytes.
pub async fn get(addr: SocketAddr, path: &str) -> Vec<u8> {
    let request = format!("GET {path} HTTP/1.1\r\nHost: proxy.local\r\nConnection: close\r\n\r\n");
    send_raw(addr, request.as_bytes()).await
}

/// Read one Content-Length framed response from a kept-alive connection.
pub async fn read_one_response(stream: &mut TcpStream) -> (u16, Vec<u8>) {
    let mut buf = Vec::new();
    loop {
        if let Ok((head, consumed)) = parse_response_head(&buf) {
            let len: usize = head
                .headers
                .get("Content-Length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            while buf.len() < consumed + len {
                let mut tmp = [0u8; 4096];
                let n = stream.read(&mut tmp).await.unwrap();
                assert!(n > 0, "connection closed mid-body");
                buf.extend_from_slice(&tmp[..n]);
            }
            return (head.status.as_u16(), buf[consumed..consumed + len].to_vec());
        }
        let mut tmp = [0u8; 4096];
        let n = stream.read(&mut tmp).await.unwrap();
        assert!(n > 0, "connection closed before response");
        buf.extend_from_slice(&tmp[..n]);
    }
}

pub fn status_of(response: &[u8]) -> u16 {
    let text = String::from_utf8_lossy(response);
    text.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}

pub fn body_of(response: &[u8]) -> String {
    let text = String::from_utf8_lossy(response);
    text.split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default()
}
