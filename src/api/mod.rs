//! Minimal HTTP surface over the signal pipeline.
//!
//! - `GET /health`
//! - `GET /presets`
//! - `POST /decide?preset=<name>` with the raw JPEG/PNG as the body
//!
//! An empty scene answers 200 with `vehicle_count: 0`; failures answer with
//! a non-2xx status and an error code, so the two are never confused.

use crate::detect::{InferenceConfig, Preset};
use crate::error::SignalError;
use crate::pipeline::SignalPipeline;
use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: usize,
    pub default_preset: Preset,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8790".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
            default_preset: Preset::default(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: Arc<SignalPipeline>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: Arc<SignalPipeline>) -> Self {
        Self { cfg, pipeline }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let pipeline = self.pipeline;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, pipeline, shutdown_thread) {
                log::error!("signal api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    pipeline: Arc<SignalPipeline>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &cfg, &pipeline) {
                    log::warn!("signal api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    pipeline: &SignalPipeline,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let (request, leftover) = read_head(&mut stream)?;

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json(&mut stream, 200, &json!({ "status": "ok" })),
        ("GET", "/presets") => {
            let presets: Vec<InferenceConfig> =
                Preset::ALL.iter().map(|p| p.config()).collect();
            write_json(
                &mut stream,
                200,
                &json!({ "default": cfg.default_preset, "presets": presets }),
            )
        }
        ("POST", "/decide") => handle_decide(&mut stream, request, leftover, cfg, pipeline),
        (_, "/health" | "/presets" | "/decide") => {
            write_json(&mut stream, 405, &json!({ "error": "method_not_allowed" }))
        }
        _ => write_json(&mut stream, 404, &json!({ "error": "not_found" })),
    }
}

fn handle_decide(
    stream: &mut TcpStream,
    request: HttpRequest,
    leftover: Vec<u8>,
    cfg: &ApiConfig,
    pipeline: &SignalPipeline,
) -> Result<()> {
    let length = match request.content_length() {
        Some(length) => length,
        None => {
            return write_json(stream, 411, &json!({ "error": "length_required" }));
        }
    };
    if length > cfg.max_upload_bytes {
        return write_json(
            stream,
            413,
            &json!({ "error": "payload_too_large", "limit": cfg.max_upload_bytes }),
        );
    }
    let body = read_body(stream, leftover, length)?;

    let preset = request
        .query_param("preset")
        .unwrap_or_else(|| cfg.default_preset.as_str().to_string());
    if let Err(err) = preset.parse::<Preset>() {
        return write_json(
            stream,
            400,
            &json!({ "error": "unknown_preset", "detail": err.to_string() }),
        );
    }

    match pipeline.run(&body, &preset) {
        Ok(report) => write_json(stream, 200, &serde_json::to_value(&report)?),
        Err(err) => {
            log::warn!("decide failed ({}): {}", preset, err);
            write_json(
                stream,
                error_status(&err),
                &json!({ "error": err.code(), "detail": err.to_string() }),
            )
        }
    }
}

fn error_status(err: &SignalError) -> u16 {
    match err {
        SignalError::InvalidImage(_) | SignalError::InvalidCount(_) => 400,
        // Client presets are checked before the pipeline runs, so what is
        // left is a server-side setup problem such as missing weights.
        SignalError::ConfigurationError(_) => 500,
        SignalError::DetectionFailure(_) => 502,
        SignalError::DetectionTimeout(_) => 504,
    }
}

fn read_head(stream: &mut TcpStream) -> Result<(HttpRequest, Vec<u8>)> {
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = find_header_end(&data) {
            break pos;
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request head"));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_HEADER_BYTES && find_header_end(&data).is_none() {
            return Err(anyhow!("request head too large"));
        }
    };
    let leftover = data[header_end + 4..].to_vec();
    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok((
        HttpRequest {
            method: method.to_string(),
            path,
            headers,
            raw_path: raw_path.to_string(),
        },
        leftover,
    ))
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn read_body(stream: &mut TcpStream, mut body: Vec<u8>, length: usize) -> Result<Vec<u8>> {
    body.truncate(length);
    let mut buf = [0u8; 8192];
    while body.len() < length {
        let want = (length - body.len()).min(buf.len());
        let n = stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(anyhow!(
                "body ended after {} of {} bytes",
                body.len(),
                length
            ));
        }
        body.extend_from_slice(&buf[..n]);
    }
    Ok(body)
}

fn write_json(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        502 => "HTTP/1.1 502 Bad Gateway",
        504 => "HTTP/1.1 504 Gateway Timeout",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    raw_path: String,
}

impl HttpRequest {
    fn content_length(&self) -> Option<usize> {
        self.headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
    }

    /// First value for `name`, percent- and `+`-decoded.
    fn query_param(&self, name: &str) -> Option<String> {
        let (_, query) = self.raw_path.split_once('?')?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}
