//! The capture screen controller: permission gate, acquisition, preview and submission.

use std::sync::Arc;

use crate::asset;
use crate::client::{OdometerClient, OdometerSubmission, SubmissionReceipt};
use crate::device::CaptureDevice;
use crate::error::{Alert, CaptureError};
use crate::state::{AcquiredImage, Action, CaptureState, PermissionState, View};

pub struct CaptureScreen {
    device: Arc<dyn CaptureDevice>,
    client: OdometerClient,
    permission: PermissionState,
    state: CaptureState,
    submitting: bool,
    alert: Option<Alert>,
}

impl CaptureScreen {
    pub fn new(device: Arc<dyn CaptureDevice>, client: OdometerClient) -> Self {
        Self {
            device,
            client,
            permission: PermissionState::Unknown,
            state: CaptureState::new(),
            submitting: false,
            alert: None,
        }
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn view(&self) -> View {
        self.state.view(self.permission)
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn client(&self) -> &OdometerClient {
        &self.client
    }

    pub fn alert(&self) -> Option<&Alert> {
        self.alert.as_ref()
    }

    pub fn dismiss_alert(&mut self) -> Option<Alert> {
        self.alert.take()
    }

    // ------------------------------------------------------------------
    // Permission gate
    // ------------------------------------------------------------------

    /// Resolve the permission state on mount. An undetermined state prompts once.
    pub async fn mount(&mut self) -> PermissionState {
        let mut permission = self.device.permission_status().await;
        if permission == PermissionState::Unknown {
            permission = self.device.request_permission().await;
        }
        log::info!("Camera permission on mount: {:?}", permission);
        self.permission = permission;
        permission
    }

    /// User-triggered re-request from the denied view.
    pub async fn request_permission(&mut self) -> PermissionState {
        self.permission = self.device.request_permission().await;
        log::info!("Camera permission after request: {:?}", self.permission);
        self.permission
    }

    fn require_permission(&self) -> Result<(), CaptureError> {
        if self.permission == PermissionState::Granted {
            Ok(())
        } else {
            Err(CaptureError::PermissionDenied)
        }
    }

    // ------------------------------------------------------------------
    // Acquisition
    // ------------------------------------------------------------------

    pub fn toggle_facing(&mut self) {
        self.state.apply(Action::ToggleFacing);
    }

    /// One shutter press. On any failure the state is left exactly as it was.
    pub async fn take_picture(&mut self) -> Result<(), CaptureError> {
        self.require_permission()?;

        let photo = match self.device.capture(self.state.facing).await {
            Ok(photo) => photo,
            Err(e) => return Err(self.fail(CaptureError::CaptureFailed(format!("{:#}", e)))),
        };

        let base64 = match photo.base64 {
            Some(base64) if !base64.is_empty() => base64,
            _ => return Err(self.fail(CaptureError::CaptureFailed("camera returned no image data".into()))),
        };

        self.state.apply(Action::Acquired(AcquiredImage { uri: photo.uri, base64 }));
        Ok(())
    }

    /// Open the library picker. Returns whether an image was acquired; a cancel is `Ok(false)`.
    pub async fn pick_image(&mut self) -> Result<bool, CaptureError> {
        self.require_permission()?;

        let asset = match self.device.pick_from_library().await {
            Ok(Some(asset)) => asset,
            Ok(None) => {
                log::debug!("Library pick canceled");
                return Ok(false);
            }
            Err(e) => return Err(self.fail(CaptureError::PickFailed(format!("{:#}", e)))),
        };

        let base64 = match asset.base64 {
            Some(base64) if !base64.is_empty() => base64,
            _ => {
                log::info!("Picked asset has no inline data, fetching {}", asset.uri);
                match asset::fetch_and_encode(&asset.uri).await {
                    Ok(base64) => base64,
                    Err(e) => return Err(self.fail(CaptureError::PickFailed(format!("{:#}", e)))),
                }
            }
        };

        self.state.apply(Action::Acquired(AcquiredImage { uri: asset.uri, base64 }));
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Preview & edit
    // ------------------------------------------------------------------

    pub fn set_reading(&mut self, text: impl Into<String>) {
        self.state.apply(Action::SetReading(text.into()));
    }

    pub fn retake(&mut self) {
        self.state.apply(Action::Retake);
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Submit the current image + reading and wait for the answer.
    pub async fn confirm(&mut self) -> Result<SubmissionReceipt, CaptureError> {
        let submission = self.begin_submission()?;
        let result = self.client.submit_async(submission).await;
        self.finish_submission(result)
    }

    /// Build the request body and mark a submission as in flight.
    ///
    /// Split from [`confirm`](Self::confirm) so a caller can release the screen
    /// while the request runs.
    pub fn begin_submission(&mut self) -> Result<OdometerSubmission, CaptureError> {
        if self.submitting {
            return Err(CaptureError::SubmissionInFlight);
        }
        let image = match self.state.image_base64() {
            Some(image) => image.to_string(),
            None => return Err(self.fail(CaptureError::NoImage)),
        };
        self.submitting = true;
        Ok(OdometerSubmission {
            image,
            user_odometer: self.state.reading().to_string(),
        })
    }

    /// Record the outcome of a submission started with [`begin_submission`](Self::begin_submission).
    pub fn finish_submission(
        &mut self,
        result: Result<SubmissionReceipt, CaptureError>,
    ) -> Result<SubmissionReceipt, CaptureError> {
        self.submitting = false;
        match result {
            Ok(receipt) => {
                self.alert = Some(Alert::new("Success", "Image confirmed!"));
                self.state.apply(Action::Submitted);
                Ok(receipt)
            }
            // Image and reading stay put so the user can confirm again.
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, err: CaptureError) -> CaptureError {
        log::warn!("{}", err);
        self.alert = Some(err.alert());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::device::{CapturedPhoto, PickedAsset};
    use crate::mock_device::MockDevice;
    use crate::state::FacingMode;
    use anyhow::anyhow;
    use std::io::Read;
    use std::sync::Mutex;
    use std::thread;
    use tempfile::TempDir;
    use tiny_http::{Response, Server};

    // Answers one request per entry in `statuses`, recording each body.
    fn scripted_server(statuses: Vec<u16>) -> (String, Arc<Mutex<Vec<String>>>, thread::JoinHandle<()>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let srv_bodies = bodies.clone();
        let handle = thread::spawn(move || {
            for status in statuses {
                if let Ok(mut req) = server.recv() {
                    let mut body = String::new();
                    req.as_reader().read_to_string(&mut body).unwrap();
                    srv_bodies.lock().unwrap().push(body);
                    let _ = req.respond(Response::from_string("{}").with_status_code(status));
                }
            }
        });
        (format!("http://127.0.0.1:{}/odometer", port), bodies, handle)
    }

    fn screen_with(device: Arc<MockDevice>, endpoint: &str) -> CaptureScreen {
        let client = OdometerClient::new(&ClientConfig {
            endpoint: endpoint.to_string(),
            timeout_secs: 5,
        });
        CaptureScreen::new(device, client)
    }

    fn offline_screen(device: Arc<MockDevice>) -> CaptureScreen {
        screen_with(device, "http://127.0.0.1:9/odometer")
    }

    fn photo(uri: &str, base64: Option<&str>) -> CapturedPhoto {
        CapturedPhoto {
            uri: uri.to_string(),
            base64: base64.map(String::from),
        }
    }

    async fn granted_with_image(device: Arc<MockDevice>, endpoint: &str) -> CaptureScreen {
        device.push_capture(Ok(photo("file:///tmp/odo.jpg", Some("abc"))));
        let mut screen = screen_with(device, endpoint);
        screen.mount().await;
        screen.take_picture().await.unwrap();
        screen
    }

    #[tokio::test]
    async fn test_mount_resolves_unknown_permission() {
        let device = Arc::new(MockDevice::with_permission(PermissionState::Unknown, true));
        let mut screen = offline_screen(device);
        assert_eq!(screen.view(), View::Loading);

        assert_eq!(screen.mount().await, PermissionState::Granted);
        assert_eq!(screen.view(), View::Acquire);
    }

    #[tokio::test]
    async fn test_denied_blocks_until_rerequest() {
        let device = Arc::new(MockDevice::with_permission(PermissionState::Denied, true));
        let mut screen = offline_screen(device.clone());
        screen.mount().await;
        assert_eq!(screen.view(), View::PermissionRequired);

        assert!(matches!(screen.take_picture().await, Err(CaptureError::PermissionDenied)));
        assert!(matches!(screen.pick_image().await, Err(CaptureError::PermissionDenied)));
        assert!(device.capture_calls().is_empty());

        assert_eq!(screen.request_permission().await, PermissionState::Granted);
        assert_eq!(screen.view(), View::Acquire);
    }

    #[tokio::test]
    async fn test_rerequest_can_stay_denied() {
        let device = Arc::new(MockDevice::with_permission(PermissionState::Denied, false));
        let mut screen = offline_screen(device);
        screen.mount().await;
        assert_eq!(screen.request_permission().await, PermissionState::Denied);
        assert_eq!(screen.view(), View::PermissionRequired);
    }

    #[tokio::test]
    async fn test_capture_success_moves_to_preview() {
        let device = Arc::new(MockDevice::new());
        device.push_capture(Ok(photo("file:///tmp/a.jpg", Some("QUJD"))));
        let mut screen = offline_screen(device.clone());
        screen.mount().await;
        screen.toggle_facing();

        screen.take_picture().await.unwrap();

        assert_eq!(screen.view(), View::Preview);
        assert_eq!(screen.state().image_uri(), Some("file:///tmp/a.jpg"));
        assert_eq!(screen.state().image_base64(), Some("QUJD"));
        assert_eq!(device.capture_calls(), vec![FacingMode::Front]);
        assert!(screen.alert().is_none());
    }

    #[tokio::test]
    async fn test_capture_failures_leave_state_unchanged() {
        let device = Arc::new(MockDevice::new());
        device.push_capture(Err(anyhow!("sensor timeout")));
        device.push_capture(Ok(photo("file:///tmp/b.jpg", None)));
        device.push_capture(Ok(photo("file:///tmp/c.jpg", Some(""))));
        let mut screen = offline_screen(device);
        screen.mount().await;
        screen.set_reading("4321");
        let before = screen.state().clone();

        for _ in 0..3 {
            let err = screen.take_picture().await.unwrap_err();
            assert!(matches!(err, CaptureError::CaptureFailed(_)));
            assert_eq!(screen.state(), &before);
            assert_eq!(
                screen.dismiss_alert().map(|a| a.title),
                Some("Failed to take picture".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_pick_cancel_is_noop() {
        let device = Arc::new(MockDevice::new());
        device.push_pick(Ok(None));
        let mut screen = offline_screen(device);
        screen.mount().await;
        screen.set_reading("777");
        let before = screen.state().clone();

        assert!(!screen.pick_image().await.unwrap());
        assert_eq!(screen.state(), &before);
        assert!(screen.alert().is_none());
    }

    #[tokio::test]
    async fn test_pick_with_inline_data() {
        let device = Arc::new(MockDevice::new());
        device.push_pick(Ok(Some(PickedAsset {
            uri: "content://media/42".to_string(),
            base64: Some("SU1H".to_string()),
        })));
        let mut screen = offline_screen(device);
        screen.mount().await;

        assert!(screen.pick_image().await.unwrap());
        assert_eq!(screen.state().image_uri(), Some("content://media/42"));
        assert_eq!(screen.state().image_base64(), Some("SU1H"));
    }

    #[tokio::test]
    async fn test_pick_without_inline_data_fetches_and_encodes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("picked.jpg");
        let bytes = b"\xff\xd8\xff\xe0 fake jpeg body \xff\xd9".to_vec();
        std::fs::write(&path, &bytes).unwrap();
        let uri = format!("file://{}", path.display());

        let device = Arc::new(MockDevice::new());
        device.push_pick(Ok(Some(PickedAsset { uri: uri.clone(), base64: None })));
        let mut screen = offline_screen(device);
        screen.mount().await;

        assert!(screen.pick_image().await.unwrap());
        let encoded = screen.state().image_base64().unwrap();
        assert!(!encoded.is_empty());
        assert_eq!(asset::decode_base64(encoded).unwrap(), bytes);
        assert_eq!(screen.state().image_uri(), Some(uri.as_str()));
    }

    #[tokio::test]
    async fn test_pick_failures_leave_state_unchanged() {
        let device = Arc::new(MockDevice::new());
        device.push_pick(Err(anyhow!("picker crashed")));
        device.push_pick(Ok(Some(PickedAsset {
            uri: "/no/such/asset.jpg".to_string(),
            base64: None,
        })));
        let mut screen = offline_screen(device);
        screen.mount().await;
        let before = screen.state().clone();

        for _ in 0..2 {
            assert!(matches!(screen.pick_image().await, Err(CaptureError::PickFailed(_))));
            assert_eq!(screen.state(), &before);
            assert_eq!(
                screen.dismiss_alert().map(|a| a.message),
                Some("Failed to pick image from gallery".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_retake_returns_to_acquire() {
        let device = Arc::new(MockDevice::new());
        let mut screen = granted_with_image(device, "http://127.0.0.1:9/odometer").await;
        screen.set_reading("12345");

        screen.retake();

        assert_eq!(screen.view(), View::Acquire);
        assert!(screen.state().image_uri().is_none());
        assert!(screen.state().image_base64().is_none());
        assert_eq!(screen.state().reading(), "12345");
    }

    #[tokio::test]
    async fn test_confirm_success() {
        let (endpoint, bodies, handle) = scripted_server(vec![200]);
        let device = Arc::new(MockDevice::new());
        let mut screen = granted_with_image(device, &endpoint).await;
        screen.set_reading("12345");

        let receipt = screen.confirm().await.unwrap();
        handle.join().unwrap();

        assert_eq!(receipt.status, 200);
        assert_eq!(
            screen.alert(),
            Some(&Alert::new("Success", "Image confirmed!"))
        );
        assert_eq!(screen.view(), View::Acquire);
        assert!(!screen.is_submitting());

        let sent: serde_json::Value = serde_json::from_str(&bodies.lock().unwrap()[0]).unwrap();
        assert_eq!(sent, serde_json::json!({"image": "abc", "user_odometer": "12345"}));
    }

    #[tokio::test]
    async fn test_confirm_failure_keeps_data_for_retry() {
        let (endpoint, bodies, handle) = scripted_server(vec![500, 200]);
        let device = Arc::new(MockDevice::new());
        let mut screen = granted_with_image(device, &endpoint).await;
        screen.set_reading("12345");
        let before = screen.state().clone();

        let err = screen.confirm().await.unwrap_err();
        assert!(matches!(err, CaptureError::SubmissionFailed(_)));
        assert_eq!(screen.state(), &before);
        assert_eq!(screen.view(), View::Preview);
        assert!(screen.dismiss_alert().unwrap().is_error());
        assert!(!screen.is_submitting());

        // Manual retry with the same data.
        screen.confirm().await.unwrap();
        handle.join().unwrap();

        let bodies = bodies.lock().unwrap();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0], bodies[1]);
    }

    #[tokio::test]
    async fn test_confirm_without_image() {
        let device = Arc::new(MockDevice::new());
        let mut screen = offline_screen(device);
        screen.mount().await;

        assert!(matches!(screen.confirm().await, Err(CaptureError::NoImage)));
        assert!(!screen.is_submitting());
    }

    #[tokio::test]
    async fn test_second_confirm_rejected_while_in_flight() {
        let device = Arc::new(MockDevice::new());
        let mut screen = granted_with_image(device, "http://127.0.0.1:9/odometer").await;

        let submission = screen.begin_submission().unwrap();
        assert_eq!(submission.image, "abc");
        assert!(screen.is_submitting());
        assert!(matches!(screen.begin_submission(), Err(CaptureError::SubmissionInFlight)));

        let _ = screen.finish_submission(Err(CaptureError::SubmissionFailed("HTTP 502".into())));
        assert!(!screen.is_submitting());
        assert!(screen.begin_submission().is_ok());
    }
}
