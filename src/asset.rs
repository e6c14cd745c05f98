//! Image payload helpers: base64 handling, JPEG encoding, and the fetch-and-encode
//! fallback for picked assets that come back without inline bytes.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// Refuse remote assets larger than this.
const MAX_REMOTE_ASSET_BYTES: u64 = 64 * 1024 * 1024;

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a payload, tolerating a `data:image/...;base64,` prefix and MIME line breaks.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    let raw: String = strip_data_url(payload)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    base64::engine::general_purpose::STANDARD
        .decode(raw)
        .context("Invalid base64 payload")
}

pub fn strip_data_url(payload: &str) -> &str {
    match payload.find("base64,") {
        Some(idx) => &payload[idx + "base64,".len()..],
        None => payload,
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(image)
        .context("Failed to encode JPEG")?;
    Ok(buf)
}

/// Local filesystem path for a `file://` URI or a bare path. `None` for remote URIs.
pub fn local_path(uri: &str) -> Option<PathBuf> {
    if is_remote(uri) {
        None
    } else {
        Some(PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri)))
    }
}

fn is_remote(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

/// Read the bytes behind `uri`, from disk or over HTTP.
pub async fn fetch_asset_bytes(uri: &str) -> Result<Vec<u8>> {
    match local_path(uri) {
        Some(path) => tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read asset: {}", path.display())),
        None => {
            let url = uri.to_string();
            tokio::task::spawn_blocking(move || fetch_remote(&url))
                .await
                .context("Asset fetch task panicked")?
        }
    }
}

fn fetch_remote(url: &str) -> Result<Vec<u8>> {
    fetch_remote_limited(url, MAX_REMOTE_ASSET_BYTES)
}

fn fetch_remote_limited(url: &str, limit: u64) -> Result<Vec<u8>> {
    log::debug!("Fetching remote asset {}", url);
    let resp = ureq::get(url)
        .call()
        .with_context(|| format!("Failed to fetch asset: {}", url))?;

    if let Some(len) = resp.header("Content-Length").and_then(|v| v.trim().parse::<u64>().ok()) {
        if len > limit {
            return Err(anyhow!("Asset exceeds {} bytes: {}", limit, url));
        }
    }

    let mut bytes = Vec::new();
    resp.into_reader()
        .take(limit + 1)
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read asset body: {}", url))?;
    if bytes.len() as u64 > limit {
        return Err(anyhow!("Asset exceeds {} bytes: {}", limit, url));
    }
    Ok(bytes)
}

/// Fallback for assets without inline data: fetch the bytes and encode them ourselves.
pub async fn fetch_and_encode(uri: &str) -> Result<String> {
    let bytes = fetch_asset_bytes(uri).await?;
    if bytes.is_empty() {
        return Err(anyhow!("Asset is empty: {}", uri));
    }
    log::info!("Encoded {} bytes from {}", bytes.len(), uri);
    Ok(encode_base64(&bytes))
}
