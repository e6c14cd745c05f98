//! JSON submission of an image + reading to the receiver.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::CaptureError;

/// Wire body of `POST /odometer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OdometerSubmission {
    pub image: String,
    pub user_odometer: String,
}

/// What came back from a 2xx response.
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub status: u16,
    /// Parsed response body, when it was JSON.
    pub body: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct OdometerClient {
    agent: ureq::Agent,
    endpoint: String,
}

impl OdometerClient {
    pub fn new(cfg: &ClientConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build();
        log::info!("OdometerClient: endpoint {}", cfg.endpoint);
        Self {
            agent,
            endpoint: cfg.endpoint.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One blocking POST. Any non-2xx status or transport error is a failure; no retry.
    pub fn submit(&self, submission: &OdometerSubmission) -> Result<SubmissionReceipt, CaptureError> {
        let body = serde_json::to_string(submission)
            .map_err(|e| CaptureError::SubmissionFailed(format!("Failed to encode body: {}", e)))?;

        log::info!(
            "POST {} ({} image chars, reading {:?})",
            self.endpoint,
            submission.image.len(),
            submission.user_odometer
        );

        let resp = match self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .send_string(&body)
        {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, resp)) => {
                let detail = resp.into_string().unwrap_or_default();
                log::warn!("Receiver answered HTTP {}: {}", code, detail.trim());
                return Err(CaptureError::SubmissionFailed(format!("HTTP {}", code)));
            }
            Err(ureq::Error::Transport(e)) => {
                log::error!("Submission transport error: {}", e);
                return Err(CaptureError::SubmissionFailed(e.to_string()));
            }
        };

        let status = resp.status();
        if !(200..300).contains(&status) {
            return Err(CaptureError::SubmissionFailed(format!("HTTP {}", status)));
        }

        let body = resp
            .into_string()
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok());
        log::info!("Submission accepted with HTTP {}", status);
        Ok(SubmissionReceipt { status, body })
    }

    /// [`submit`](Self::submit) on the blocking pool.
    pub async fn submit_async(&self, submission: OdometerSubmission) -> Result<SubmissionReceipt, CaptureError> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.submit(&submission))
            .await
            .map_err(|e| CaptureError::SubmissionFailed(format!("Submission task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tiny_http::{Header, Response, Server};

    struct Recorded {
        method: String,
        url: String,
        content_type: Option<String>,
        body: String,
    }

    // Answers exactly one request with `status` and records what it saw.
    fn one_shot_server(status: u16, reply: &str) -> (String, Arc<Mutex<Option<Recorded>>>, thread::JoinHandle<()>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let seen = Arc::new(Mutex::new(None));
        let srv_seen = seen.clone();
        let reply = reply.to_string();
        let handle = thread::spawn(move || {
            if let Ok(mut req) = server.recv() {
                let mut body = String::new();
                req.as_reader().read_to_string(&mut body).unwrap();
                let content_type = req
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Content-Type"))
                    .map(|h| h.value.as_str().to_string());
                *srv_seen.lock().unwrap() = Some(Recorded {
                    method: req.method().to_string(),
                    url: req.url().to_string(),
                    content_type,
                    body,
                });
                let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
                let _ = req.respond(Response::from_string(reply).with_status_code(status).with_header(header));
            }
        });
        (format!("http://127.0.0.1:{}/odometer", port), seen, handle)
    }

    fn client_for(endpoint: &str) -> OdometerClient {
        OdometerClient::new(&ClientConfig {
            endpoint: endpoint.to_string(),
            timeout_secs: 5,
        })
    }

    fn sample() -> OdometerSubmission {
        OdometerSubmission {
            image: "abc".to_string(),
            user_odometer: "12345".to_string(),
        }
    }

    #[test]
    fn test_submit_success_sends_json() {
        let (endpoint, seen, handle) = one_shot_server(200, r#"{"success":true}"#);
        let receipt = client_for(&endpoint).submit(&sample()).unwrap();
        handle.join().unwrap();

        assert_eq!(receipt.status, 200);
        assert_eq!(receipt.body.unwrap()["success"], true);

        let seen = seen.lock().unwrap();
        let seen = seen.as_ref().unwrap();
        assert_eq!(seen.method, "POST");
        assert_eq!(seen.url, "/odometer");
        assert_eq!(seen.content_type.as_deref(), Some("application/json"));
        let body: OdometerSubmission = serde_json::from_str(&seen.body).unwrap();
        assert_eq!(body, sample());
    }

    #[test]
    fn test_submit_server_error_is_failure() {
        let (endpoint, _seen, handle) = one_shot_server(500, r#"{"success":false}"#);
        let err = client_for(&endpoint).submit(&sample()).unwrap_err();
        handle.join().unwrap();

        assert!(matches!(err, CaptureError::SubmissionFailed(ref msg) if msg == "HTTP 500"));
    }

    #[test]
    fn test_submit_unreachable_is_failure() {
        // Bind then drop to get a port with nothing listening.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = client_for(&format!("http://127.0.0.1:{}/odometer", port))
            .submit(&sample())
            .unwrap_err();
        assert!(matches!(err, CaptureError::SubmissionFailed(_)));
    }

    #[test]
    fn test_submission_wire_format() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json, serde_json::json!({"image": "abc", "user_odometer": "12345"}));
    }
}
