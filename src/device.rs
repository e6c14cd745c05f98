//! Camera, picker and permission capabilities, injected into the screen controller.

use anyhow::Result;

use crate::state::{FacingMode, PermissionState};

/// Result of one shutter press. `base64` may be missing if the driver returned no bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPhoto {
    pub uri: String,
    pub base64: Option<String>,
}

/// An asset chosen in the media-library picker.
///
/// Pickers may hand back inline encoded bytes. When they don't, the controller
/// fetches `uri` itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickedAsset {
    pub uri: String,
    pub base64: Option<String>,
}

#[async_trait::async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Current camera permission, without prompting.
    async fn permission_status(&self) -> PermissionState;

    /// Ask for camera access. Returns the resolved state.
    async fn request_permission(&self) -> PermissionState;

    /// Take one still picture.
    async fn capture(&self, facing: FacingMode) -> Result<CapturedPhoto>;

    /// Open the image picker. `Ok(None)` means the user canceled.
    async fn pick_from_library(&self) -> Result<Option<PickedAsset>>;
}
