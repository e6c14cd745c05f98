//! Odometer capture: a camera screen that submits an image and a typed reading,
//! and the HTTP receiver that stores the upload and extracts a reading from it.

pub mod asset;
pub mod camera;
pub mod client;
pub mod config;
pub mod crop;
pub mod device;
pub mod error;
pub mod mock_device;
pub mod ocr;
pub mod reading;
pub mod screen;
pub mod server;
pub mod state;

pub use client::{OdometerClient, OdometerSubmission};
pub use config::Config;
pub use device::CaptureDevice;
pub use error::{Alert, CaptureError};
pub use screen::CaptureScreen;
pub use state::{CaptureState, FacingMode, PermissionState, View};
