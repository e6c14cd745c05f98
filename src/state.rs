//! Screen state and the reducer that drives it.
//!
//! The renderer never mutates these fields directly. Every change goes through
//! [`CaptureState::apply`], so the transitions can be tested without a window.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
    Front,
    #[default]
    Back,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::Front => FacingMode::Back,
            FacingMode::Back => FacingMode::Front,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FacingMode::Front => "front",
            FacingMode::Back => "back",
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    #[default]
    Unknown,
    Denied,
    Granted,
}

/// An acquired image. URI and payload only ever travel together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Displayable reference (local path or remote URI).
    pub uri: String,
    /// Base64 of the encoded image bytes, without a data-URL prefix.
    pub base64: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ToggleFacing,
    Acquired(AcquiredImage),
    SetReading(String),
    Retake,
    /// Successful submission: start over with a fresh screen.
    Submitted,
}

/// What the renderer should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Loading,
    PermissionRequired,
    Acquire,
    Preview,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CaptureState {
    pub facing: FacingMode,
    image: Option<AcquiredImage>,
    reading: String,
}

impl CaptureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_facing(facing: FacingMode) -> Self {
        Self {
            facing,
            ..Self::default()
        }
    }

    pub fn image(&self) -> Option<&AcquiredImage> {
        self.image.as_ref()
    }

    pub fn image_uri(&self) -> Option<&str> {
        self.image.as_ref().map(|img| img.uri.as_str())
    }

    pub fn image_base64(&self) -> Option<&str> {
        self.image.as_ref().map(|img| img.base64.as_str())
    }

    pub fn reading(&self) -> &str {
        &self.reading
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn apply(&mut self, action: Action) {
        log::debug!("Applying {:?}", ActionKind(&action));
        match action {
            Action::ToggleFacing => self.facing = self.facing.toggled(),
            Action::Acquired(image) => self.image = Some(image),
            Action::SetReading(text) => self.reading = text,
            // Reading text survives a retake.
            Action::Retake => self.image = None,
            Action::Submitted => *self = Self::with_facing(self.facing),
        }
    }

    pub fn view(&self, permission: PermissionState) -> View {
        match permission {
            PermissionState::Unknown => View::Loading,
            PermissionState::Denied => View::PermissionRequired,
            PermissionState::Granted if self.image.is_some() => View::Preview,
            PermissionState::Granted => View::Acquire,
        }
    }
}

// Keeps base64 payloads out of the log.
struct ActionKind<'a>(&'a Action);

impl fmt::Debug for ActionKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Action::ToggleFacing => write!(f, "ToggleFacing"),
            Action::Acquired(img) => write!(f, "Acquired({}, {} b64 chars)", img.uri, img.base64.len()),
            Action::SetReading(text) => write!(f, "SetReading({:?})", text),
            Action::Retake => write!(f, "Retake"),
            Action::Submitted => write!(f, "Submitted"),
        }
    }
}
