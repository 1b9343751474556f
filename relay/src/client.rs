use crate::config::{AppConfig, Credentials, SdkConfig};
use crate::metrics_defs::{DOWNLOAD_RETRIES, UPSTREAM_REQUEST_DURATION, UPSTREAM_REQUEST_FAILED};
use crate::multipart::MultipartRequest;
use bytes::Bytes;
use http::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use serde_json::Value;
use shared::{counter, histogram};
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Clone, Debug)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(MultipartRequest),
}

/// A call to the SHIFT API, relative to the configured base URL.
#[derive(Clone, Debug)]
pub struct UpstreamRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl UpstreamRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        UpstreamRequest {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, body: MultipartRequest) -> Self {
        self.body = RequestBody::Multipart(body);
        self
    }
}

/// A fully read upstream response. Non-2xx statuses are values, not errors.
#[derive(Clone, Debug)]
pub struct RelayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RelayResponse {
    async fn read(response: reqwest::Response) -> Result<Self, RelayError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(RelayResponse {
            status,
            headers,
            body,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The body as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// The `message` field of a JSON error body.
    pub fn message(&self) -> Option<String> {
        self.json()?
            .get("message")?
            .as_str()
            .map(str::to_string)
    }
}

/// Timeouts and retry policy for the download path.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub download_timeout: Duration,
    pub download_retries: u32,
    pub retry_backoff: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            connect_timeout: Duration::from_secs(10),
            download_timeout: Duration::from_secs(60),
            download_retries: 2,
            retry_backoff: Duration::from_millis(200),
            accept_invalid_certs: false,
        }
    }
}

impl ClientOptions {
    /// Local development installs commonly run SHIFT behind self-signed
    /// certificates on `localhost` or `*.test`; certificate checks are relaxed
    /// for downloads only in that case.
    pub fn for_host(sdk: &SdkConfig, app: &AppConfig) -> Self {
        let host = sdk.url.host_str().unwrap_or_default();
        let local_host = host == "localhost" || host == "127.0.0.1" || host.ends_with(".test");

        ClientOptions {
            accept_invalid_certs: app.is_local() && local_host,
            ..ClientOptions::default()
        }
    }
}

#[derive(Clone)]
pub struct RelayClient {
    api: reqwest::Client,
    download: reqwest::Client,
    options: ClientOptions,
}

impl RelayClient {
    pub fn new(options: ClientOptions) -> Result<Self, RelayError> {
        let api = reqwest::Client::builder().build()?;
        let download = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(options.connect_timeout)
            .timeout(options.download_timeout)
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()?;

        Ok(RelayClient {
            api,
            download,
            options,
        })
    }

    fn prepare(
        client: &reqwest::Client,
        credentials: &Credentials,
        method: Method,
        path: &str,
        query: &[(String, String)],
    ) -> reqwest::RequestBuilder {
        let mut builder = client
            .request(method, credentials.endpoint(path))
            .bearer_auth(&credentials.token)
            .header(ACCEPT, "application/json");
        if !query.is_empty() {
            builder = builder.query(query);
        }
        builder
    }

    pub async fn send(
        &self,
        credentials: &Credentials,
        request: UpstreamRequest,
    ) -> Result<RelayResponse, RelayError> {
        let method = request.method.clone();
        let mut builder = Self::prepare(
            &self.api,
            credentials,
            request.method,
            &request.path,
            &request.query,
        )
        .headers(request.headers);

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Multipart(body) => builder.multipart(body.into_form()?),
        };

        tracing::debug!(%method, path = %request.path, "calling SHIFT API");
        let started = Instant::now();
        let result = builder.send().await;
        observe(&method, started, &result);

        RelayResponse::read(result?).await
    }

    /// GETs a file. Redirects are returned rather than followed; transport
    /// errors and 5xx responses are retried with a fixed backoff.
    pub async fn download(
        &self,
        credentials: &Credentials,
        path: &str,
        query: &[(String, String)],
    ) -> Result<RelayResponse, RelayError> {
        let mut attempt = 0;

        loop {
            let started = Instant::now();
            let result = Self::prepare(&self.download, credentials, Method::GET, path, query)
                .send()
                .await;
            observe(&Method::GET, started, &result);

            let retries_left = attempt < self.options.download_retries;
            match result {
                Ok(response) if response.status().is_server_error() && retries_left => {
                    tracing::warn!(%path, status = %response.status(), attempt, "retrying download");
                }
                Ok(response) => return RelayResponse::read(response).await,
                Err(e) if retries_left => {
                    tracing::warn!(%path, error = %e, attempt, "retrying download");
                }
                Err(e) => return Err(e.into()),
            }

            counter!(DOWNLOAD_RETRIES).increment(1);
            attempt += 1;
            sleep(self.options.retry_backoff).await;
        }
    }
}

fn observe(method: &Method, started: Instant, result: &Result<reqwest::Response, reqwest::Error>) {
    let elapsed = started.elapsed().as_secs_f64();
    match result {
        Ok(response) => {
            histogram!(
                UPSTREAM_REQUEST_DURATION,
                "method" => method.to_string(),
                "status" => response.status().as_str().to_string(),
            )
            .record(elapsed);
        }
        Err(e) => {
            tracing::warn!(%method, error = %e, "SHIFT API call failed");
            counter!(UPSTREAM_REQUEST_FAILED).increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::test_context;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_client() -> RelayClient {
        RelayClient::new(ClientOptions {
            retry_backoff: Duration::from_millis(1),
            ..ClientOptions::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_json_with_bearer_token() {
        let mock_server = MockServer::start().await;
        let ctx = test_context(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/api/tasks"))
            .and(header("authorization", "Bearer test-token"))
            .and(header("accept", "application/json"))
            .and(body_partial_json(json!({"title": "t"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let response = fast_client()
            .send(
                &ctx.credentials,
                UpstreamRequest::post("/api/tasks").json(json!({"title": "t"})),
            )
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.json().unwrap()["id"], 7);
    }

    #[tokio::test]
    async fn test_send_query_pairs() {
        let mock_server = MockServer::start().await;
        let ctx = test_context(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/api/tasks"))
            .and(query_param("user[name]", "Ada Lovelace"))
            .and(query_param("status", "pending"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let response = fast_client()
            .send(
                &ctx.credentials,
                UpstreamRequest::get("/api/tasks")
                    .query([("status", "pending")])
                    .query(ctx.identity_pairs()),
            )
            .await
            .unwrap();

        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_send_multipart() {
        let mock_server = MockServer::start().await;
        let ctx = test_context(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/api/attachments/upload"))
            .and(body_string_contains("name=\"temp_identifier\""))
            .and(body_string_contains("filename=\"notes.txt\""))
            .and(body_string_contains("hello world"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"path": "tmp/notes.txt"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let form = MultipartRequest::new()
            .add_file("file", Bytes::from_static(b"hello world"), "notes.txt", None)
            .add_field("temp_identifier", "tmp-1");

        let response = fast_client()
            .send(
                &ctx.credentials,
                UpstreamRequest::post("/api/attachments/upload").multipart(form),
            )
            .await
            .unwrap();

        assert_eq!(response.json().unwrap()["path"], "tmp/notes.txt");
    }

    #[tokio::test]
    async fn test_non_success_is_a_value() {
        let mock_server = MockServer::start().await;
        let ctx = test_context(&mock_server.uri());

        Mock::given(method("PUT"))
            .and(path("/api/tasks/9"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"message": "Title is required"})),
            )
            .mount(&mock_server)
            .await;

        let response = fast_client()
            .send(&ctx.credentials, UpstreamRequest::put("/api/tasks/9").json(json!({})))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.message().as_deref(), Some("Title is required"));
    }

    #[tokio::test]
    async fn test_transport_error() {
        let ctx = test_context("http://127.0.0.1:1");
        let result = fast_client()
            .send(&ctx.credentials, UpstreamRequest::get("/api/tasks"))
            .await;
        assert!(matches!(result, Err(RelayError::Http(_))));
    }

    #[tokio::test]
    async fn test_download_retries_server_errors() {
        let mock_server = MockServer::start().await;
        let ctx = test_context(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/api/attachments/3/download"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&mock_server)
            .await;

        let response = fast_client()
            .download(&ctx.credentials, "/api/attachments/3/download", &[])
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_download_does_not_follow_redirects() {
        let mock_server = MockServer::start().await;
        let ctx = test_context(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/api/attachments/3/download"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "https://cdn.example.com/f"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let response = fast_client()
            .download(&ctx.credentials, "/api/attachments/3/download", &[])
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::FOUND);
        assert_eq!(
            response.headers.get("location").unwrap(),
            "https://cdn.example.com/f"
        );
    }

    #[test]
    fn test_insecure_only_for_local_hosts() {
        let mut sdk = SdkConfig::default();
        let mut app = AppConfig::default();
        assert!(!ClientOptions::for_host(&sdk, &app).accept_invalid_certs);

        sdk.url = url::Url::parse("https://shift.test").unwrap();
        assert!(!ClientOptions::for_host(&sdk, &app).accept_invalid_certs);

        app.env = "local".into();
        assert!(ClientOptions::for_host(&sdk, &app).accept_invalid_certs);

        sdk.url = url::Url::parse("https://shift.wyxos.com").unwrap();
        assert!(!ClientOptions::for_host(&sdk, &app).accept_invalid_certs);
    }
}
