use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use tokio::process::Command;
use tokio::time::{sleep, Duration};

use crate::asset;
use crate::config::{CameraConfig, Config, PickerConfig};
use crate::crop;
use crate::device::{CaptureDevice, CapturedPhoto, PickedAsset};
use crate::state::{FacingMode, PermissionState};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff", "webp"];

/// Captures kept on disk; older ones are deleted after each shot.
const KEEP_CAPTURES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CameraBackend {
    RpicamStill,
    Raspistill,
}

impl CameraBackend {
    fn program(&self) -> &'static str {
        match self {
            CameraBackend::RpicamStill => "rpicam-still",
            CameraBackend::Raspistill => "raspistill",
        }
    }

    fn capture_args(&self, output: &Path, camera: &CameraConfig, facing: FacingMode) -> Vec<String> {
        let mut args: Vec<String> = match self {
            CameraBackend::RpicamStill => vec![
                "-o".into(), output.display().to_string(),
                "--width".into(), camera.width.to_string(),
                "--height".into(), camera.height.to_string(),
                "--quality".into(), camera.quality.to_string(),
                "--immediate".into(),  // Take photo immediately without preview
                "--nopreview".into(),
                "--timeout".into(), "1000".into(),
            ],
            CameraBackend::Raspistill => vec![
                "-o".into(), output.display().to_string(),
                "-w".into(), camera.width.to_string(),
                "-h".into(), camera.height.to_string(),
                "-q".into(), camera.quality.to_string(),
                "-t".into(), "1000".into(),
                "-n".into(),
            ],
        };
        // A single rear-mounted sensor: "front" means a mirrored selfie-style frame.
        if facing == FacingMode::Front {
            args.push(match self {
                CameraBackend::RpicamStill => "--hflip".into(),
                CameraBackend::Raspistill => "-hf".into(),
            });
        }
        args
    }
}

/// Capture device backed by the Raspberry Pi camera tools and the desktop file dialog.
///
/// Camera "permission" is granted when a capture tool is installed and runnable.
pub struct LocalDevice {
    camera: CameraConfig,
    picker: PickerConfig,
    capture_dir: PathBuf,
    backend: Mutex<Option<CameraBackend>>,
}

impl LocalDevice {
    pub fn new(config: &Config) -> Self {
        Self {
            camera: config.camera.clone(),
            picker: config.picker.clone(),
            capture_dir: config.paths.capture_dir.clone(),
            backend: Mutex::new(None),
        }
    }

    fn cached_backend(&self) -> Option<CameraBackend> {
        *self.backend.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn probe(&self) -> Option<CameraBackend> {
        log::info!("Probing camera tools...");

        let mut found = None;
        for (backend, help_flag) in [
            (CameraBackend::RpicamStill, "--help"),
            (CameraBackend::Raspistill, "-?"),
        ] {
            match Command::new(backend.program()).arg(help_flag).output().await {
                Ok(_) => {
                    log::info!("Camera available (using {})", backend.program());
                    found = Some(backend);
                    break;
                }
                Err(e) => log::warn!("{} not found: {}", backend.program(), e),
            }
        }

        if found.is_none() {
            log::error!("Camera unavailable - neither rpicam-still nor raspistill found");
        }
        *self.backend.lock().unwrap_or_else(|p| p.into_inner()) = found;
        found
    }

    async fn run_capture(&self, backend: CameraBackend, output: &Path, facing: FacingMode) -> Result<()> {
        let args = backend.capture_args(output, &self.camera, facing);
        log::info!("Capture command: {} {}", backend.program(), args.join(" "));

        let result = Command::new(backend.program())
            .args(&args)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", backend.program()))?;

        if !result.status.success() {
            return Err(anyhow!(
                "{} failed with status {}: {}",
                backend.program(),
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            ));
        }
        Ok(())
    }

    async fn load_picked(&self, path: PathBuf) -> Result<PickedAsset> {
        let uri = format!("file://{}", path.display());
        if !self.picker.crop_to_aspect {
            // No inline data: the controller fetches and encodes the file itself.
            return Ok(PickedAsset { uri, base64: None });
        }

        let aspect = self.picker.aspect();
        let quality = self.picker.quality;
        let base64 = tokio::task::spawn_blocking(move || -> Result<String> {
            let img = image::open(&path)
                .with_context(|| format!("Failed to load image: {}", path.display()))?
                .to_rgb8();
            let cropped = crop::crop_to_aspect(&img, aspect);
            Ok(asset::encode_base64(&asset::encode_jpeg(&cropped, quality)?))
        })
        .await
        .context("Image crop task panicked")??;

        Ok(PickedAsset { uri, base64: Some(base64) })
    }
}

#[async_trait::async_trait]
impl CaptureDevice for LocalDevice {
    async fn permission_status(&self) -> PermissionState {
        match self.cached_backend() {
            Some(_) => PermissionState::Granted,
            None => PermissionState::Unknown,
        }
    }

    async fn request_permission(&self) -> PermissionState {
        match self.probe().await {
            Some(_) => PermissionState::Granted,
            None => PermissionState::Denied,
        }
    }

    async fn capture(&self, facing: FacingMode) -> Result<CapturedPhoto> {
        let backend = self
            .cached_backend()
            .ok_or_else(|| anyhow!("Camera not available"))?;

        tokio::fs::create_dir_all(&self.capture_dir)
            .await
            .with_context(|| format!("Failed to create capture directory: {}", self.capture_dir.display()))?;
        let output = self
            .capture_dir
            .join(format!("capture_{}.jpg", Local::now().format("%Y%m%d_%H%M%S_%3f")));

        // Give the camera a moment to adjust exposure
        sleep(Duration::from_millis(self.camera.warmup_ms)).await;

        if let Err(e) = self.run_capture(backend, &output, facing).await {
            if backend != CameraBackend::RpicamStill {
                return Err(e);
            }
            log::warn!("{:#}; trying raspistill fallback...", e);
            self.run_capture(CameraBackend::Raspistill, &output, facing).await?;
        }

        let uri = format!("file://{}", output.display());
        let base64 = match tokio::fs::read(&output).await {
            Ok(bytes) if !bytes.is_empty() => {
                log::info!("Photo captured: {} ({} bytes)", output.display(), bytes.len());
                Some(asset::encode_base64(&bytes))
            }
            Ok(_) => None,
            Err(e) => {
                log::warn!("Capture produced no readable file: {}", e);
                None
            }
        };

        match prune_captures(&self.capture_dir, KEEP_CAPTURES) {
            Ok(0) => {}
            Ok(removed) => log::debug!("Removed {} old captures", removed),
            Err(e) => log::warn!("Failed to prune captures: {:#}", e),
        }

        Ok(CapturedPhoto { uri, base64 })
    }

    async fn pick_from_library(&self) -> Result<Option<PickedAsset>> {
        let handle = rfd::AsyncFileDialog::new()
            .set_title("Select odometer photo")
            .add_filter("Image Files", IMAGE_EXTENSIONS)
            .pick_file()
            .await;

        match handle {
            Some(handle) => {
                let path = handle.path().to_path_buf();
                log::info!("Picked {}", path.display());
                Ok(Some(self.load_picked(path).await?))
            }
            None => Ok(None),
        }
    }
}

/// Delete all but the newest `keep` capture files in `dir`. Returns how many were removed.
fn prune_captures(dir: &Path, keep: usize) -> Result<usize> {
    let mut captures: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("capture_") && name.ends_with(".jpg"))
        })
        .collect();

    // Timestamped names sort oldest first
    captures.sort();
    let excess = captures.len().saturating_sub(keep);
    for path in &captures[..excess] {
        std::fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(excess)
}
