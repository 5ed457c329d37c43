//! WebSocket server bridging sockets to the relay.
//!
//! Architecture:
//! ```text
//! Boiler ──┐                      ┌── socket task ──┐
//!          ├── TcpListener ──────►├── socket task ──┼── RelayEvent ──► Relay (Registry)
//! App    ──┘   (ws handshake)     └── socket task ──┘        │
//!                                        ▲                   │
//!                                        └──── outbound ─────┘
//! ```
//!
//! Each socket task pumps three sources until the peer goes away:
//! - inbound frames, forwarded to the relay;
//! - outbound frames queued on the connection's handle;
//! - the terminate signal, which closes the socket.
//!
//! Close and error are treated alike: the relay always hears `Disconnected`.
//!
//! Plain HTTP requests never reach the WebSocket handshake. `GET /` gets the
//! status banner, anything else a 404.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::connection::{ConnectionHandle, ConnectionReceiver};
use crate::relay::{Relay, RelayHandle};

/// Port used when `PORT` is not set.
pub const DEFAULT_PORT: u16 = 8080;

/// Body served on `GET /` to plain HTTP clients.
pub const STATUS_BANNER: &str = "SmartBoiler-KiLL Server is running";

const REQUEST_HEAD_LIMIT: usize = 8 * 1024;
const REQUEST_HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Path WebSocket upgrades must target (None = any path)
    pub socket_path: Option<String>,
    /// Outbound frames buffered per connection before dropping
    pub send_queue_capacity: usize,
    /// Events buffered for the relay task
    pub event_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            socket_path: Some("/socket".to_string()),
            send_queue_capacity: 256,
            event_queue_capacity: 1024,
        }
    }
}

impl ServerConfig {
    /// Read `HOST` and `PORT` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };
        Ok(Self {
            bind_addr: format!("{host}:{port}"),
            ..Self::default()
        })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value: {0:?}")]
    InvalidPort(String),
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    /// Binary frames that were not valid UTF-8
    pub dropped_frames: u64,
}

/// The relay server: a bound listener plus a running relay task.
pub struct RelayServer {
    config: ServerConfig,
    listener: TcpListener,
    relay: RelayHandle,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    /// Bind the listener and start the relay task.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let (relay, _relay_task) = Relay::spawn(config.event_queue_capacity);
        log::info!(
            "Boiler relay listening on {} (path {})",
            listener.local_addr()?,
            config.socket_path.as_deref().unwrap_or("*")
        );

        Ok(Self {
            config,
            listener,
            relay,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the relay task, for inspection.
    pub fn relay(&self) -> RelayHandle {
        self.relay.clone()
    }

    /// Shared server statistics.
    pub fn stats(&self) -> Arc<RwLock<ServerStats>> {
        self.stats.clone()
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let relay = self.relay.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, relay, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        relay: RelayHandle,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), ServerError> {
        match timeout(REQUEST_HEAD_TIMEOUT, peek_head(&stream)).await {
            Ok(Ok(Some((head, len)))) => {
                let request = classify(&head);
                if request != PlainRequest::Upgrade {
                    log::debug!(
                        "Plain HTTP request from {addr}: {}",
                        head.lines().next().unwrap_or_default()
                    );
                    answer_plain(stream, len, request).await?;
                    return Ok(());
                }
            }
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                log::debug!("No request head from {addr} in time");
                return Ok(());
            }
        }

        let socket_path = config.socket_path.clone();
        let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            check_path(req, resp, socket_path.as_deref())
        })
        .await
        {
            Ok(ws) => ws,
            Err(e) => {
                log::warn!("Handshake with {addr} refused: {e}");
                return Ok(());
            }
        };

        let (handle, receiver) = ConnectionHandle::channel(config.send_queue_capacity);
        log::info!("Connection {} established from {addr}", handle.id());

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = Self::pump(ws_stream, &handle, receiver, &relay, &stats).await;

        if relay.disconnected(handle.id()).await.is_err() {
            log::warn!("Relay stopped before connection {} was reconciled", handle.id());
        }
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Connection {} from {addr} closed", handle.id());

        result
    }

    async fn pump(
        ws_stream: WebSocketStream<TcpStream>,
        handle: &ConnectionHandle,
        receiver: ConnectionReceiver,
        relay: &RelayHandle,
        stats: &Arc<RwLock<ServerStats>>,
    ) -> Result<(), ServerError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let ConnectionReceiver {
            mut outbound,
            terminate,
        } = receiver;

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                log::warn!("Dropping non-UTF-8 binary frame on {}", handle.id());
                                stats.write().await.dropped_frames += 1;
                                continue;
                            }
                        },
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            log::error!("WebSocket error on {}: {e}", handle.id());
                            break;
                        }
                        Some(Ok(_)) => continue,
                    };

                    {
                        let mut s = stats.write().await;
                        s.total_frames += 1;
                        s.total_bytes += text.len() as u64;
                    }

                    if relay.frame(handle.clone(), text).await.is_err() {
                        log::error!("Relay stopped; closing connection {}", handle.id());
                        break;
                    }
                }

                // Frame queued by the relay
                frame = outbound.recv() => {
                    match frame {
                        Some(text) => ws_sender.send(Message::Text(text.into())).await?,
                        None => break,
                    }
                }

                // Relay asked for the socket to be closed
                _ = terminate.notified() => {
                    log::debug!("Terminating connection {}", handle.id());
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }

        Ok(())
    }
}

/// What a peeked request head asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlainRequest {
    /// WebSocket upgrade, handed to the handshake
    Upgrade,
    /// `GET /`
    Status,
    NotFound,
}

fn classify(head: &str) -> PlainRequest {
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let upgrade = lines.take_while(|line| !line.is_empty()).any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value.to_ascii_lowercase().contains("websocket")
        })
    });
    if upgrade {
        return PlainRequest::Upgrade;
    }

    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some("/")) => PlainRequest::Status,
        _ => PlainRequest::NotFound,
    }
}

/// Peek the request head without consuming it. `None` if the peer closed
/// before sending anything.
async fn peek_head(stream: &TcpStream) -> std::io::Result<Option<(String, usize)>> {
    let mut buf = vec![0u8; REQUEST_HEAD_LIMIT];
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if n == buf.len() || buf[..n].windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(Some((String::from_utf8_lossy(&buf[..n]).into_owned(), n)));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Consume the peeked head and answer with a plain-text response.
async fn answer_plain(
    mut stream: TcpStream,
    head_len: usize,
    request: PlainRequest,
) -> std::io::Result<()> {
    let mut head = vec![0u8; head_len];
    stream.read_exact(&mut head).await?;

    let (status, body) = match request {
        PlainRequest::Status => ("200 OK", STATUS_BANNER),
        _ => ("404 Not Found", "Not Found"),
    };
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Refuse upgrades that do not target the configured path.
fn check_path(
    request: &Request,
    response: Response,
    expected: Option<&str>,
) -> Result<Response, ErrorResponse> {
    match expected {
        Some(path) if request.uri().path() != path => {
            let mut refusal = ErrorResponse::new(Some(format!(
                "No WebSocket endpoint at {}",
                request.uri().path()
            )));
            *refusal.status_mut() = StatusCode::NOT_FOUND;
            Err(refusal)
        }
        _ => Ok(response),
    }
}
