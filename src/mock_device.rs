//! Scripted capture device for tests and for running the screen without a camera.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use image::{ImageBuffer, Rgb, RgbImage};

use crate::asset;
use crate::device::{CaptureDevice, CapturedPhoto, PickedAsset};
use crate::state::{FacingMode, PermissionState};

/// A device whose answers are queued up front.
///
/// Once a queue is drained the device falls back to its defaults: permission
/// granted, captures return an in-memory test pattern, picks are canceled.
pub struct MockDevice {
    permission: Mutex<PermissionState>,
    grant_on_request: bool,
    captures: Mutex<VecDeque<Result<CapturedPhoto>>>,
    picks: Mutex<VecDeque<Result<Option<PickedAsset>>>>,
    capture_calls: Mutex<Vec<FacingMode>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            permission: Mutex::new(PermissionState::Granted),
            grant_on_request: true,
            captures: Mutex::new(VecDeque::new()),
            picks: Mutex::new(VecDeque::new()),
            capture_calls: Mutex::new(Vec::new()),
        }
    }

    /// Start with `state`; `grant_on_request` decides what a re-request resolves to.
    pub fn with_permission(state: PermissionState, grant_on_request: bool) -> Self {
        Self {
            permission: Mutex::new(state),
            grant_on_request,
            ..Self::new()
        }
    }

    pub fn push_capture(&self, result: Result<CapturedPhoto>) {
        lock(&self.captures).push_back(result);
    }

    pub fn push_pick(&self, result: Result<Option<PickedAsset>>) {
        lock(&self.picks).push_back(result);
    }

    pub fn capture_calls(&self) -> Vec<FacingMode> {
        lock(&self.capture_calls).clone()
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait::async_trait]
impl CaptureDevice for MockDevice {
    async fn permission_status(&self) -> PermissionState {
        *lock(&self.permission)
    }

    async fn request_permission(&self) -> PermissionState {
        let mut permission = lock(&self.permission);
        *permission = if self.grant_on_request {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        };
        *permission
    }

    async fn capture(&self, facing: FacingMode) -> Result<CapturedPhoto> {
        lock(&self.capture_calls).push(facing);
        match lock(&self.captures).pop_front() {
            Some(result) => result,
            None => {
                let jpeg = asset::encode_jpeg(&test_pattern(320, 240), 85)?;
                Ok(CapturedPhoto {
                    uri: format!("mock://capture/{}", facing),
                    base64: Some(asset::encode_base64(&jpeg)),
                })
            }
        }
    }

    async fn pick_from_library(&self) -> Result<Option<PickedAsset>> {
        lock(&self.picks).pop_front().unwrap_or(Ok(None))
    }
}

/// Gradient frame used when no real sensor is attached.
pub fn test_pattern(width: u32, height: u32) -> RgbImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        let b = ((x + y) * 255 / (width + height).max(1)) as u8;
        Rgb([r, g, b])
    })
}
