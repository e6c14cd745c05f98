//! Upload receiver: accepts odometer submissions over HTTP, stores the image and
//! reports an OCR reading next to the user's.

use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use serde_json::{json, Value};
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server};

use crate::asset;
use crate::config::ServerConfig;
use crate::ocr::ReadingExtractor;
use crate::reading;

const OCR_FAILED: &str = "Failed to extract reading";
const STORED_JPEG_QUALITY: u8 = 95;

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("No data provided")]
    NoData,
    #[error("No image provided")]
    NoImage,
    #[error("user_odometer is required")]
    MissingReading,
    #[error("user_odometer must be a valid integer")]
    InvalidReading,
    #[error("Invalid image data")]
    InvalidImage,
    #[error("File too large")]
    TooLarge,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// A response before it is turned into a `tiny_http::Response`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    fn error(err: &ReceiverError, max_size: u64) -> Self {
        match err {
            ReceiverError::TooLarge => Self::new(413, json!({"error": err.to_string(), "max_size": max_size})),
            ReceiverError::Internal(e) => Self::new(500, json!({"success": false, "error": format!("{:#}", e)})),
            _ => Self::new(400, json!({"error": err.to_string()})),
        }
    }
}

/// Request handling, independent of the socket.
pub struct Receiver {
    config: ServerConfig,
    extractor: Box<dyn ReadingExtractor>,
}

impl Receiver {
    pub fn new(config: ServerConfig, extractor: Box<dyn ReadingExtractor>) -> Self {
        log::info!(
            "Receiver: uploads to {}, limit {} bytes, OCR {}",
            config.upload_folder.display(),
            config.max_content_length,
            extractor.name()
        );
        Self { config, extractor }
    }

    pub fn health(&self) -> Reply {
        Reply::new(200, json!({"status": "healthy", "timestamp": iso_timestamp()}))
    }

    pub fn upload(&self, body: &[u8]) -> Reply {
        match self.handle_upload(body) {
            Ok(reply) => reply,
            Err(e) => {
                match &e {
                    ReceiverError::Internal(inner) => log::error!("Error in upload: {:#}", inner),
                    other => log::warn!("Rejected upload: {}", other),
                }
                Reply::error(&e, self.config.max_content_length)
            }
        }
    }

    fn handle_upload(&self, body: &[u8]) -> Result<Reply, ReceiverError> {
        if body.len() as u64 > self.config.max_content_length {
            return Err(ReceiverError::TooLarge);
        }

        let data: Value = serde_json::from_slice(body).map_err(|_| ReceiverError::NoData)?;
        let fields = match data.as_object() {
            Some(fields) if !fields.is_empty() => fields,
            _ => return Err(ReceiverError::NoData),
        };

        let image = fields.get("image").ok_or(ReceiverError::NoImage)?;
        let user_reading = parse_user_reading(fields.get("user_odometer").ok_or(ReceiverError::MissingReading)?)?;

        let image_bytes = image
            .as_str()
            .and_then(|payload| asset::decode_base64(payload).ok())
            .ok_or(ReceiverError::InvalidImage)?;
        let decoded = image::load_from_memory(&image_bytes).map_err(|_| ReceiverError::InvalidImage)?;

        let filepath = self.store(&decoded.to_rgb8())?;
        let filename = filepath
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        log::info!("Image saved: {}", filepath.display());
        log::info!("User odometer reading: {}", user_reading);

        let ocr_reading = self.extract(&filepath, user_reading).unwrap_or_else(|| {
            log::warn!("OCR failed to extract reading");
            OCR_FAILED.to_string()
        });

        Ok(Reply::new(
            200,
            json!({
                "success": true,
                "data": {
                    "user_reading": user_reading,
                    "ocr_reading": ocr_reading,
                    "timestamp": iso_timestamp(),
                    "filename": filename,
                }
            }),
        ))
    }

    fn store(&self, image: &image::RgbImage) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.config.upload_folder).with_context(|| {
            format!("Failed to create upload folder: {}", self.config.upload_folder.display())
        })?;

        let path = unique_upload_path(&self.config.upload_folder, &Local::now().format("%Y%m%d_%H%M%S").to_string());
        let jpeg = asset::encode_jpeg(image, STORED_JPEG_QUALITY)?;
        std::fs::write(&path, jpeg).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    fn extract(&self, path: &Path, user_reading: i64) -> Option<String> {
        if !self.config.ocr_enabled || !self.extractor.is_available() {
            return None;
        }
        match self.extractor.detect(path) {
            Ok(detections) => reading::select_reading(&detections, &user_reading.to_string()),
            Err(e) => {
                log::error!("Error in OCR processing: {:#}", e);
                None
            }
        }
    }

    fn cors_origin(&self, origin: Option<&str>) -> Option<String> {
        let origin = origin?;
        self.config
            .cors_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
            .then(|| origin.to_string())
    }
}

// Integral JSON floats are accepted and truncated toward zero.
fn parse_user_reading(value: &Value) -> Result<i64, ReceiverError> {
    match value {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(i),
            (None, Some(f)) if f.is_finite() && f.abs() < i64::MAX as f64 => Ok(f.trunc() as i64),
            _ => Err(ReceiverError::InvalidReading),
        },
        Value::String(s) => s.trim().parse().map_err(|_| ReceiverError::InvalidReading),
        _ => Err(ReceiverError::InvalidReading),
    }
}

// Two uploads within the same second must not overwrite each other.
fn unique_upload_path(folder: &Path, stamp: &str) -> PathBuf {
    let mut path = folder.join(format!("odometer_{}.jpg", stamp));
    let mut n = 1;
    while path.exists() {
        path = folder.join(format!("odometer_{}_{}.jpg", stamp, n));
        n += 1;
    }
    path
}

fn iso_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn header(field: &str, value: &str) -> Option<Header> {
    Header::from_bytes(field.as_bytes(), value.as_bytes()).ok()
}

/// The receiver bound to a socket.
pub struct ReceiverServer {
    server: Server,
    receiver: Receiver,
}

impl ReceiverServer {
    pub fn bind(addr: &str, receiver: Receiver) -> Result<Self> {
        let server = Server::http(addr).map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;
        let bound = server
            .server_addr()
            .to_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| addr.to_string());
        log::info!("Receiver listening on {}", bound);
        Ok(Self { server, receiver })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serve until [`shutdown`](Self::shutdown) is called. Requests are handled one at a time.
    pub fn run(&self) {
        for request in self.server.incoming_requests() {
            if let Err(e) = self.handle(request) {
                log::warn!("Receiver connection error: {}", e);
            }
        }
        log::info!("Receiver stopped");
    }

    pub fn shutdown(&self) {
        self.server.unblock();
    }

    fn handle(&self, mut request: Request) -> Result<()> {
        let method = request.method().clone();
        let path = request.url().split('?').next().unwrap_or("").to_string();
        let origin = request
            .headers()
            .iter()
            .find(|h| h.field.equiv("Origin"))
            .map(|h| h.value.as_str().to_string());
        log::debug!("{} {}", method, path);

        let reply = match (&method, path.as_str()) {
            (Method::Options, _) => Reply::new(204, Value::Null),
            (Method::Get, "/health") => self.receiver.health(),
            (Method::Post, "/odometer") => match self.read_body(&mut request) {
                Ok(body) => self.receiver.upload(&body),
                Err(e) => Reply::error(&e, self.receiver.config.max_content_length),
            },
            _ => Reply::new(404, json!({"error": "Not found"})),
        };

        let body = if reply.body.is_null() {
            String::new()
        } else {
            reply.body.to_string()
        };
        let mut response = Response::from_string(body).with_status_code(reply.status);
        if !reply.body.is_null() {
            if let Some(h) = header("Content-Type", "application/json") {
                response.add_header(h);
            }
        }
        if let Some(allowed) = self.receiver.cors_origin(origin.as_deref()) {
            for h in [
                header("Access-Control-Allow-Origin", &allowed),
                header("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
                header("Access-Control-Allow-Headers", "Content-Type"),
            ]
            .into_iter()
            .flatten()
            {
                response.add_header(h);
            }
        }

        log::info!("{} {} -> {}", method, path, reply.status);
        request.respond(response).context("Failed to send response")
    }

    fn read_body(&self, request: &mut Request) -> Result<Vec<u8>, ReceiverError> {
        let limit = self.receiver.config.max_content_length;
        if let Some(len) = request.body_length() {
            if len as u64 > limit {
                return Err(ReceiverError::TooLarge);
            }
        }

        let mut body = Vec::new();
        request
            .as_reader()
            .take(limit + 1)
            .read_to_end(&mut body)
            .context("Failed to read request body")?;
        if body.len() as u64 > limit {
            return Err(ReceiverError::TooLarge);
        }
        Ok(body)
    }
}
