//! Raw TCP socket transport.
//!
//! Reads are a one-byte request (the frame kind code) followed by a single
//! `read` of the response into a fixed buffer. Writes send the encoded
//! command bytes with no response. The stream sits behind an async mutex,
//! so a read's request and response are never interleaved with another
//! exchange.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{report_completion, EventSender, Transport, TransportEvent, TransportKind};
use crate::codec::encode_read_request;
use crate::error::LinkError;
use crate::queue::{OperationKind, PendingOperation};

/// Default port of the remote host.
pub const DEFAULT_PORT: u16 = 8080;

/// Socket transport settings.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Size of the single-read response buffer.
    pub response_buffer: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(4),
            response_buffer: 1024,
        }
    }
}

impl SocketConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

type SharedStream = Arc<Mutex<Option<TcpStream>>>;

/// TCP adapter. Has no discovery; the address comes from config.
pub struct SocketTransport {
    config: SocketConfig,
    stream: SharedStream,
    cancel: CancellationToken,
    connect_task: Option<JoinHandle<()>>,
}

impl SocketTransport {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            config,
            stream: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
            connect_task: None,
        }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn has_target(&self) -> bool {
        !self.config.host.trim().is_empty()
    }

    fn supports_discovery(&self) -> bool {
        false
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn start_scan(&mut self, events: EventSender) {
        tokio::spawn(async move {
            let _ = events
                .send(TransportEvent::ScanFailed(LinkError::ScanFailure(
                    "socket transport has no discovery".into(),
                )))
                .await;
        });
    }

    fn stop_scan(&mut self) {}

    fn start_connect(&mut self, events: EventSender) {
        self.cancel = CancellationToken::new();

        if !self.has_target() {
            tokio::spawn(async move {
                let _ = events
                    .send(TransportEvent::LinkFailed(LinkError::LinkFailure(
                        "no host configured".into(),
                    )))
                    .await;
            });
            return;
        }

        let address = self.config.address();
        let connect_timeout = self.config.connect_timeout;
        let stream = Arc::clone(&self.stream);
        let cancel = self.cancel.clone();

        self.connect_task = Some(tokio::spawn(async move {
            info!(%address, "connecting");
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return,
                r = timeout(connect_timeout, TcpStream::connect(&address)) => r,
            };

            let event = match attempt {
                Ok(Ok(socket)) => {
                    if let Err(e) = socket.set_nodelay(true) {
                        debug!(error = %e, "set_nodelay failed");
                    }
                    // A reconnect replaces the previous stream wholesale.
                    *stream.lock().await = Some(socket);
                    info!(%address, "connected");
                    TransportEvent::LinkUp
                }
                Ok(Err(e)) => {
                    warn!(%address, error = %e, "connect failed");
                    TransportEvent::LinkFailed(LinkError::LinkFailure(format!("{address}: {e}")))
                }
                Err(_) => {
                    warn!(%address, ?connect_timeout, "connect timed out");
                    TransportEvent::LinkFailed(LinkError::LinkFailure(format!(
                        "{address}: timed out after {connect_timeout:?}"
                    )))
                }
            };
            let _ = events.send(event).await;
        }));
    }

    fn execute(&mut self, op: PendingOperation, events: EventSender) {
        let stream = Arc::clone(&self.stream);
        let cancel = self.cancel.clone();
        let read_timeout = self.config.read_timeout;
        let buffer = self.config.response_buffer;

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(LinkError::Cancelled),
                r = exchange(&stream, &op, read_timeout, buffer) => r,
            };
            if let Err(e) = &result {
                debug!(op = %op, error = %e, "exchange failed");
            }
            report_completion(&events, &op, result).await;
        });
    }

    async fn disconnect(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(mut socket) = self.stream.lock().await.take() {
            if let Err(e) = socket.shutdown().await {
                debug!(error = %e, "shutdown failed");
            }
            info!("socket closed");
        }
    }
}

/// Run one exchange on the shared stream.
///
/// Any I/O failure closes the socket; the next connect opens a new one.
async fn exchange(
    stream: &SharedStream,
    op: &PendingOperation,
    read_timeout: Duration,
    buffer: usize,
) -> Result<Option<Bytes>, LinkError> {
    let mut guard = stream.lock().await;
    let socket = guard.as_mut().ok_or(LinkError::NotConnected)?;

    let result = match &op.kind {
        OperationKind::Read(kind) => {
            let request = encode_read_request(*kind)?;
            read_exchange(socket, &request, read_timeout, buffer)
                .await
                .map(Some)
        }
        OperationKind::Write(payload) => write_exchange(socket, payload, read_timeout)
            .await
            .map(|_| None),
    };

    if matches!(
        result,
        Err(LinkError::Io(_) | LinkError::Timeout(_) | LinkError::RemoteClosed)
    ) {
        *guard = None;
    }
    result
}

async fn read_exchange(
    socket: &mut TcpStream,
    request: &[u8],
    read_timeout: Duration,
    buffer: usize,
) -> Result<Bytes, LinkError> {
    write_exchange(socket, request, read_timeout).await?;

    let mut buf = vec![0u8; buffer];
    let n = timeout(read_timeout, socket.read(&mut buf))
        .await
        .map_err(|_| LinkError::Timeout(read_timeout))??;
    if n == 0 {
        return Err(LinkError::RemoteClosed);
    }
    buf.truncate(n);
    Ok(Bytes::from(buf))
}

/// Write `payload` in full; a peer that stops draining the socket fails
/// the exchange after `limit`.
async fn write_exchange(
    socket: &mut TcpStream,
    payload: &[u8],
    limit: Duration,
) -> Result<(), LinkError> {
    timeout(limit, async {
        socket.write_all(payload).await?;
        socket.flush().await
    })
    .await
    .map_err(|_| LinkError::Timeout(limit))??;
    Ok(())
}
