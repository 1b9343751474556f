use crate::config::{Config, Listener};
use crate::notifications::channels::{Notifier, NotifyChannel, NotifyError};
use crate::notifications::directory::ConfigDirectory;
use crate::notifications::messages::Notification;
use crate::state::AppState;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use relay::{AppConfig, HostUser, SdkConfig};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use url::Url;

const BOUNDARY: &str = "shift-test-boundary";

/// Records what it is asked to send. Fails every send after `fail()`.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(u64, Notification)>>,
    failing: AtomicBool,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<(u64, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotifyChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, user: &HostUser, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            let err = "x".parse::<lettre::Address>().unwrap_err();
            return Err(NotifyError::Address(err));
        }
        self.sent
            .lock()
            .unwrap()
            .push((user.id, notification.clone()));
        Ok(())
    }
}

pub fn test_config(base_url: &str) -> Config {
    Config {
        listener: Listener {
            host: "127.0.0.1".into(),
            port: 8080,
        },
        admin_listener: Listener {
            host: "127.0.0.1".into(),
            port: 8081,
        },
        shift: SdkConfig {
            token: Some("test-token".into()),
            project: Some("proj-1".into()),
            url: Url::parse(base_url).unwrap(),
        },
        app: AppConfig {
            name: "Host".into(),
            url: "https://host.example.com".into(),
            env: "testing".into(),
        },
        uploads: Default::default(),
        auth: Default::default(),
        dashboard: Default::default(),
        notifications: Default::default(),
        users: vec![HostUser {
            id: 42,
            name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
        }],
    }
}

/// The full router over a test config, with a recording notification channel.
pub struct TestApp {
    pub router: Router,
    pub channel: Arc<RecordingChannel>,
    pub state: Arc<AppState>,
}

impl TestApp {
    pub fn new(base_url: &str) -> Self {
        Self::with_config(base_url, |_| {})
    }

    /// No SHIFT credentials at all.
    pub fn unconfigured() -> Self {
        Self::with_config("http://127.0.0.1:1", |config| {
            config.shift.token = None;
            config.shift.project = None;
        })
    }

    pub fn with_config(base_url: &str, f: impl FnOnce(&mut Config)) -> Self {
        let mut config = test_config(base_url);
        f(&mut config);

        let channel = Arc::new(RecordingChannel::default());
        let directory = Arc::new(ConfigDirectory::new(config.users.clone()));
        let notifier = Notifier::with_channels(vec![channel.clone() as Arc<dyn NotifyChannel>]);
        let state = Arc::new(AppState::with_parts(config, notifier, directory).unwrap());

        TestApp {
            router: crate::router(state.clone()),
            channel,
            state,
        }
    }

    pub async fn send_raw(&self, request: TestRequest) -> Response<Body> {
        self.router.clone().oneshot(request.build()).await.unwrap()
    }

    /// Status and body. Bodies that are not JSON come back as a string.
    pub async fn send(&self, request: TestRequest) -> (StatusCode, Value) {
        let response = self.send_raw(request).await;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
        (status, value)
    }
}

enum Part {
    Field(String, String),
    File(String, String, Vec<u8>),
}

pub struct TestRequest {
    method: String,
    uri: String,
    headers: Vec<(String, String)>,
    json: Option<Value>,
    parts: Vec<Part>,
}

pub fn request(method: &str, uri: &str) -> TestRequest {
    TestRequest {
        method: method.into(),
        uri: uri.into(),
        headers: Vec::new(),
        json: None,
        parts: Vec::new(),
    }
}

impl TestRequest {
    pub fn json(mut self, value: Value) -> Self {
        self.json = Some(value);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Signed in as user 42.
    pub fn user(self) -> Self {
        self.header("x-user-id", "42")
            .header("x-user-name", "Ada Lovelace")
            .header("x-user-email", "ada@example.com")
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.parts.push(Part::Field(name.into(), value.into()));
        self
    }

    pub fn file(mut self, name: &str, filename: &str, bytes: &[u8]) -> Self {
        self.parts
            .push(Part::File(name.into(), filename.into(), bytes.to_vec()));
        self
    }

    fn multipart_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for part in &self.parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Field(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File(name, filename, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    pub fn build(self) -> Request<Body> {
        let mut builder = Request::builder()
            .method(self.method.as_str())
            .uri(self.uri.as_str());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let body = if !self.parts.is_empty() {
            builder = builder.header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
            Body::from(self.multipart_body())
        } else if let Some(json) = &self.json {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        } else {
            Body::empty()
        };

        builder.body(body).unwrap()
    }
}
