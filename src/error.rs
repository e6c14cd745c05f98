use thiserror::Error;

/// Failures the capture screen can surface to the user.
///
/// A canceled library pick is not in here: it is a no-op, reported as `Ok(None)`.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("picking from library failed: {0}")]
    PickFailed(String),

    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    #[error("no image has been acquired")]
    NoImage,

    #[error("a submission is already in flight")]
    SubmissionInFlight,
}

impl CaptureError {
    /// The blocking alert shown for this failure.
    pub fn alert(&self) -> Alert {
        match self {
            CaptureError::PermissionDenied => {
                Alert::new("No access to camera", "Grant camera permission to continue")
            }
            CaptureError::CaptureFailed(_) => Alert::new("Failed to take picture", "Please try again"),
            CaptureError::PickFailed(_) => Alert::new("Error", "Failed to pick image from gallery"),
            CaptureError::SubmissionFailed(reason) => {
                Alert::new("Error", format!("Failed to confirm image: {}", reason))
            }
            CaptureError::NoImage => Alert::new("Error", "Take or pick a picture first"),
            CaptureError::SubmissionInFlight => Alert::new("Please wait", "Submission in progress"),
        }
    }
}

/// A user-facing, blocking notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.title != "Success"
    }
}
