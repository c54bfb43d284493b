//! HTTP endpoint for running units by name.
//!
//! Programs synthesized in event/output mode call back into this endpoint
//! through `execute_unit(name, inputs)`, which re-enters the engine. Each
//! connection carries one HTTP/1.1 request and is served on its own thread.
//! There is no call-depth limit: a unit that calls itself recurses until a
//! timeout fires.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use tracing::{debug, info, warn};

use crate::catalog::UnitCatalog;
use crate::engine::{Engine, random_hex};
use crate::error::EngineError;
use crate::synth::CallbackEndpoint;

/// Header carrying the shared secret.
pub const TOKEN_HEADER: &str = "X-Scriptbox-Token";

/// Largest request body accepted.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

// ── Protocol types ──────────────────────────────────────────────────────

/// Body of `POST /units/run`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunUnitRequest {
    pub unit_name: String,
    pub workspace_id: String,
    #[serde(default)]
    pub inputs: JsonMap<String, JsonValue>,
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug)]
struct HttpResponse {
    status: u16,
    body: JsonValue,
}

impl HttpResponse {
    fn ok(body: JsonValue) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }
}

// ── Server ──────────────────────────────────────────────────────────────

/// Context available to request handlers.
pub struct ServerContext {
    pub engine: Arc<Engine>,
    pub catalog: Arc<dyn UnitCatalog>,
    /// Shared secret every run request must present.
    pub token: String,
}

/// TCP server that accepts endpoint connections.
pub struct UnitServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl UnitServer {
    pub fn bind(addr: &str) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).with_context(|| format!("Failed to bind {}", addr))?;
        let addr = listener.local_addr()?;
        info!(%addr, "unit endpoint bound");
        Ok(Self { listener, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Callback target for programs spawned by an engine behind this server.
    pub fn callback(&self, token: &str) -> CallbackEndpoint {
        CallbackEndpoint {
            url: self.url(),
            token: token.to_string(),
        }
    }

    /// Spawn a background thread that accepts connections and dispatches handlers.
    pub fn spawn(self, ctx: Arc<ServerContext>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            for stream in self.listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let ctx = Arc::clone(&ctx);
                        thread::spawn(move || {
                            if let Err(e) = handle_connection(stream, &ctx) {
                                debug!(error = %e, "endpoint connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        debug!(error = %e, "endpoint accept error, shutting down");
                        break;
                    }
                }
            }
        })
    }
}

/// Generate a random token for endpoint authentication.
pub fn generate_token() -> Result<String> {
    Ok(random_hex(16)?)
}

// ── Connection handler ──────────────────────────────────────────────────

fn handle_connection(stream: TcpStream, ctx: &ServerContext) -> Result<()> {
    let peer = stream.peer_addr().ok();
    debug!(?peer, "endpoint connection accepted");

    let mut reader = BufReader::new(&stream);
    let mut writer = stream.try_clone().context("Failed to clone TCP stream")?;

    let response = match read_request(&mut reader) {
        Ok(request) => {
            debug!(method = %request.method, path = %request.path, "endpoint request");
            dispatch_request(&request, ctx)
        }
        Err(e) => HttpResponse::error(400, format!("Malformed request: {}", e)),
    };
    debug!(status = response.status, "endpoint response");
    write_response(&mut writer, &response)
}

fn read_request(reader: &mut impl BufRead) -> Result<HttpRequest> {
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        bail!("invalid request line '{}'", request_line.trim());
    };
    let method = method.to_string();
    let path = path.to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            bail!("connection closed inside headers");
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow!("invalid header line '{}'", line))?;
        headers.push((key.trim().to_string(), value.trim().to_string()));
    }

    let mut request = HttpRequest {
        method,
        path,
        headers,
        body: Vec::new(),
    };
    let length: usize = match request.header("Content-Length") {
        Some(value) => value.parse().context("invalid Content-Length")?,
        None => 0,
    };
    if length > MAX_BODY_BYTES {
        bail!("request body of {} bytes is too large", length);
    }
    request.body = vec![0; length];
    reader.read_exact(&mut request.body)?;
    Ok(request)
}

fn write_response(writer: &mut impl Write, response: &HttpResponse) -> Result<()> {
    let body = serde_json::to_string(&response.body)?;
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason_phrase(response.status),
        body.len()
    );
    writer.write_all(head.as_bytes())?;
    writer.write_all(body.as_bytes())?;
    writer.flush()?;
    Ok(())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        422 => "Unprocessable Entity",
        _ => "Internal Server Error",
    }
}

// ── Request dispatch ────────────────────────────────────────────────────

fn dispatch_request(request: &HttpRequest, ctx: &ServerContext) -> HttpResponse {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => HttpResponse::ok(json!({ "status": "ok" })),
        ("POST", "/units/run") => handle_run_unit(request, ctx),
        (_, "/health") | (_, "/units/run") => HttpResponse::error(405, "Method not allowed"),
        (_, path) => HttpResponse::error(404, format!("No route for {}", path)),
    }
}

// ── Handlers ────────────────────────────────────────────────────────────

fn handle_run_unit(request: &HttpRequest, ctx: &ServerContext) -> HttpResponse {
    if request.header(TOKEN_HEADER) != Some(ctx.token.as_str()) {
        warn!("endpoint rejected request with invalid token");
        return HttpResponse::error(401, "Invalid token");
    }

    let run: RunUnitRequest = match serde_json::from_slice(&request.body) {
        Ok(run) => run,
        Err(e) => return HttpResponse::error(400, format!("Invalid request body: {}", e)),
    };

    info!(unit = %run.unit_name, workspace = %run.workspace_id, "endpoint run unit");
    match ctx.engine.execute_by_name(
        ctx.catalog.as_ref(),
        &run.unit_name,
        &run.workspace_id,
        &run.inputs,
    ) {
        Ok(result) => HttpResponse::ok(result.to_json()),
        Err(e) => {
            let status = match &e {
                EngineError::Validation(_) => 422,
                EngineError::UnitNotFound(_) => 404,
                EngineError::Workspace(_) => 400,
                _ => 500,
            };
            debug!(status, error = %e, "endpoint run failed");
            HttpResponse::error(status, e.to_string())
        }
    }
}
