//! [`CockpitServer`] – HTTP + WebSocket control surface.
//!
//! Listens on `0.0.0.0:8000` (configurable via [`CockpitServer::with_port`]).
//!
//! * WebSocket upgrades → telemetry stream plus JSON commands.
//! * Regular HTTP requests → the routes below, or the embedded dashboard.
//!
//! | Method | Path                    | Command       |
//! |--------|-------------------------|---------------|
//! | GET    | `/`                     | dashboard     |
//! | GET    | `/api/status`           | status        |
//! | GET    | `/api/slots`            | `list_slots`  |
//! | POST   | `/api/training/start`   | `start` (body: config, optional) |
//! | POST   | `/api/training/stop`    | `stop`        |
//! | POST   | `/api/training/pause`   | `pause`       |
//! | POST   | `/api/training/resume`  | `resume`      |
//! | POST   | `/api/demo/start`       | `demo_start`  |
//! | POST   | `/api/demo/stop`        | `demo_stop`   |
//! | POST   | `/api/slots/save`       | `save_slot`   |
//! | POST   | `/api/slots/delete`     | `delete_slot` |
//! | POST   | `/api/slots/export`     | `export_slot` |

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tetra_runtime::Supervisor;
use tetra_types::{Command, ControlResponse, Message, TetraError, TrainingConfig};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bridge::{TelemetryBridge, encode};
use crate::connections::{ConnectionManager, Outbound};
use crate::control;

/// Default TCP port for the control surface.
pub const DEFAULT_PORT: u16 = 8000;

/// Largest request body accepted on the HTTP routes.
const MAX_BODY: usize = 64 * 1024;

/// Commands a client may queue ahead of the one being handled.
const COMMAND_QUEUE: usize = 32;

/// The compiled-in dashboard page.
const COCKPIT_HTML: &str = include_str!("cockpit.html");

// ─────────────────────────────────────────────────────────────────────────────
// CockpitServer
// ─────────────────────────────────────────────────────────────────────────────

/// Serves the dashboard, the HTTP control routes and the WebSocket stream,
/// and runs the [`TelemetryBridge`] that feeds the stream.
pub struct CockpitServer {
    supervisor: Arc<Supervisor>,
    connections: Arc<ConnectionManager>,
    port: u16,
}

impl CockpitServer {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            connections: Arc::new(ConnectionManager::new()),
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Bind the configured port and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`TetraError::Io`] if the TCP listener cannot bind.
    pub async fn run(self) -> Result<(), TetraError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TetraError::Io(format!("bind error on {addr}: {e}")))?;
        info!("cockpit listening on http://localhost:{}", self.port);
        self.serve(listener).await;
        Ok(())
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener) {
        let bridge = TelemetryBridge::new(
            Arc::clone(&self.supervisor),
            Arc::clone(&self.connections),
        );
        tokio::spawn(bridge.run());

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let sup = Arc::clone(&self.supervisor);
                    let conns = Arc::clone(&self.connections);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, sup, conns).await {
                            debug!(%peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept error"),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-connection handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    sup: Arc<Supervisor>,
    conns: Arc<ConnectionManager>,
) -> Result<(), TetraError> {
    // `peek` leaves the bytes in place for the WebSocket handshake.
    let mut buf = [0u8; 1024];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| TetraError::Io(format!("peek error from {peer}: {e}")))?;

    let head = String::from_utf8_lossy(&buf[..n]);
    let is_ws_upgrade = head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });

    if is_ws_upgrade {
        handle_ws(stream, peer, sup, conns).await
    } else {
        handle_http(stream, &sup).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plain HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// A parsed HTTP request: only what the routes need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpReply {
    fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }

    fn control(response: &ControlResponse) -> Self {
        let status = if response.success { 200 } else { 400 };
        match serde_json::to_string(response) {
            Ok(body) => Self::json(status, body),
            Err(e) => Self::internal_error(e),
        }
    }

    fn internal_error(reason: impl std::fmt::Display) -> Self {
        let body = serde_json::json!({"success": false, "message": reason.to_string()});
        Self::json(500, body.to_string())
    }

    fn not_found(method: &str, path: &str) -> Self {
        let mut reply = Self::control(&ControlResponse::fail(format!(
            "No route for {method} {path}"
        )));
        reply.status = 404;
        reply
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            413 => "Payload Too Large",
            _ => "Internal Server Error",
        }
    }
}

/// Read one request.  Failures come back as the reply to send instead.
async fn read_request(stream: &mut TcpStream) -> Result<HttpRequest, HttpReply> {
    let malformed =
        |e: std::io::Error| HttpReply::control(&ControlResponse::fail(format!("Malformed request: {e}")));

    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.map_err(malformed)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or("/").to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.map_err(malformed)? == 0 || line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    if content_length > MAX_BODY {
        let mut reply = HttpReply::control(&ControlResponse::fail(format!(
            "Request body of {content_length} bytes exceeds the {MAX_BODY}-byte limit"
        )));
        reply.status = 413;
        return Err(reply);
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).await.map_err(malformed)?;
    Ok(HttpRequest { method, path, body })
}

async fn handle_http(mut stream: TcpStream, sup: &Supervisor) -> Result<(), TetraError> {
    let reply = match read_request(&mut stream).await {
        Ok(request) => route(sup, &request).await,
        Err(reply) => reply,
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        reply.status,
        reply.reason(),
        reply.content_type,
        reply.body.len(),
        reply.body
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| TetraError::Io(format!("HTTP write error: {e}")))?;
    Ok(())
}

/// Build a command from a JSON body, tagging it with `command`.
fn command_from_body(command: &str, body: &[u8]) -> Result<Command, String> {
    let mut value: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(body).map_err(|e| format!("Invalid JSON body: {e}"))?
    };
    let Value::Object(map) = &mut value else {
        return Err("Request body must be a JSON object".to_string());
    };
    map.insert("command".to_string(), Value::String(command.to_string()));
    serde_json::from_value(value).map_err(|e| format!("Invalid {command} request: {e}"))
}

/// `POST /api/training/start` takes the config itself as the body.
fn start_from_body(body: &[u8]) -> Result<Command, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Command::Start { config: None });
    }
    let config: TrainingConfig =
        serde_json::from_slice(body).map_err(|e| format!("Invalid training config: {e}"))?;
    Ok(Command::Start {
        config: Some(config),
    })
}

pub(crate) async fn route(sup: &Supervisor, request: &HttpRequest) -> HttpReply {
    let path = request.path.split('?').next().unwrap_or("/");
    let body = &request.body;

    let command = match (request.method.as_str(), path) {
        ("GET", "/") | ("GET", "/index.html") => {
            return HttpReply {
                status: 200,
                content_type: "text/html; charset=utf-8",
                body: COCKPIT_HTML.to_string(),
            };
        }
        ("GET", "/api/status") => {
            let snapshot = sup.status().await;
            return match serde_json::to_string(&snapshot) {
                Ok(body) => HttpReply::json(200, body),
                Err(e) => HttpReply::control(&ControlResponse::fail(e)),
            };
        }
        ("GET", "/api/slots") => Ok(Command::ListSlots),
        ("POST", "/api/training/start") => start_from_body(body),
        ("POST", "/api/training/stop") => Ok(Command::Stop),
        ("POST", "/api/training/pause") => Ok(Command::Pause),
        ("POST", "/api/training/resume") => Ok(Command::Resume),
        ("POST", "/api/demo/start") => command_from_body("demo_start", body),
        ("POST", "/api/demo/stop") => Ok(Command::DemoStop),
        ("POST", "/api/slots/save") => command_from_body("save_slot", body),
        ("POST", "/api/slots/delete") => command_from_body("delete_slot", body),
        ("POST", "/api/slots/export") => command_from_body("export_slot", body),
        (method, path) => return HttpReply::not_found(method, path),
    };

    match command {
        Ok(command) => HttpReply::control(&control::handle(sup, command).await),
        Err(reason) => HttpReply::control(&ControlResponse::fail(reason)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    sup: Arc<Supervisor>,
    conns: Arc<ConnectionManager>,
) -> Result<(), TetraError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| TetraError::Io(format!("WS handshake from {peer}: {e}")))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (id, mut outbound) = conns.register(peer);
    // The consumer outlives the socket until the commands already queued
    // have run.
    let (commands, queue) = mpsc::channel(COMMAND_QUEUE);
    tokio::spawn(run_commands(queue, id, Arc::clone(&sup), Arc::clone(&conns)));

    // Reconnect sync: the current controls before any telemetry.
    let hello = sup.status().await.into_message(None);
    if let Ok(text) = encode(&hello) {
        conns.send_to(id, Outbound::Text(text));
    }

    loop {
        tokio::select! {
            // ── Downstream: queue → browser ────────────────────────────────
            frame = outbound.recv() => {
                let frame = match frame {
                    Some(Outbound::Text(text)) => WsMessage::Text(text.into()),
                    Some(Outbound::Ping) => WsMessage::Ping(Default::default()),
                    // Removed from the broadcast set.
                    None => break,
                };
                if ws_tx.send(frame).await.is_err() {
                    break;
                }
            }
            // ── Upstream: browser → control ────────────────────────────────
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        conns.touch(id);
                        handle_upstream(text.as_str(), id, &commands, &conns);
                    }
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => conns.touch(id),
                }
            }
        }
    }

    conns.remove(id);
    debug!(%id, %peer, "client disconnected");
    Ok(())
}

/// Parse a command from a client and queue it for that client's consumer.
fn handle_upstream(
    text: &str,
    id: Uuid,
    commands: &mpsc::Sender<Command>,
    conns: &ConnectionManager,
) {
    let command = match serde_json::from_str::<Command>(text) {
        Ok(Command::Pong) => return,
        Ok(command) => command,
        Err(e) => {
            warn!(%id, error = %e, "unparseable command");
            reply(conns, id, &Message::Response(ControlResponse::fail(format!(
                "Invalid command: {e}"
            ))));
            return;
        }
    };

    if let Err(e) = commands.try_send(command) {
        let name = control::command_name(&e.into_inner());
        warn!(%id, command = name, "command queue unavailable; rejecting");
        reply(conns, id, &Message::Response(ControlResponse::fail(format!(
            "Too many pending commands; {name} rejected"
        ))));
    }
}

/// Handle one client's commands strictly in arrival order.
///
/// Runs beside the socket loop, so a slow `stop` holds up later commands
/// from the same client but never its telemetry.
async fn run_commands(
    mut queue: mpsc::Receiver<Command>,
    id: Uuid,
    sup: Arc<Supervisor>,
    conns: Arc<ConnectionManager>,
) {
    while let Some(command) = queue.recv().await {
        let message = if matches!(command, Command::Status) {
            sup.status().await.into_message(None)
        } else {
            Message::Response(control::handle(&sup, command).await)
        };
        reply(&conns, id, &message);
    }
}

fn reply(conns: &ConnectionManager, id: Uuid, message: &Message) {
    match encode(message) {
        Ok(text) => {
            conns.send_to(id, Outbound::Text(text));
        }
        Err(e) => error!(%id, error = %e, "dropping reply"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
