use crate::http::make_boxed_error_response;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use std::future::Future;
use std::pin::Pin;

#[derive(thiserror::Error, Debug)]
pub enum AdminError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Readiness as seen by the admin listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(String),
}

/// Serves `/health` and `/ready` on the admin listener.
///
/// `/health` only reports that the process is up. `/ready` evaluates the
/// supplied check on every call.
pub struct AdminService<F> {
    readiness: F,
}

impl<F> AdminService<F>
where
    F: Fn() -> Readiness,
{
    pub fn new(readiness: F) -> Self {
        Self { readiness }
    }
}

fn text_body(s: &'static str) -> BoxBody<Bytes, AdminError> {
    Full::new(Bytes::from(s)).map_err(|e| match e {}).boxed()
}

impl<F> Service<Request<Incoming>> for AdminService<F>
where
    F: Fn() -> Readiness + Send + Sync + 'static,
{
    type Response = Response<BoxBody<Bytes, AdminError>>;
    type Error = AdminError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let readiness = (self.readiness)();

        Box::pin(async move {
            if req.method() != Method::GET {
                return Ok(make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED));
            }

            let res = match (req.uri().path(), readiness) {
                ("/health", _) => Response::new(text_body("ok\n")),
                ("/ready", Readiness::Ready) => Response::new(text_body("ok\n")),
                ("/ready", Readiness::NotReady(reason)) => {
                    tracing::debug!(%reason, "readiness probe failed");
                    let body = serde_json::json!({ "ready": false, "reason": reason });
                    let mut res = Response::new(
                        Full::new(Bytes::from(body.to_string()))
                            .map_err(|e| match e {})
                            .boxed(),
                    );
                    *res.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                    res.headers_mut().insert(
                        CONTENT_TYPE,
                        hyper::header::HeaderValue::from_static("application/json"),
                    );
                    res
                }
                _ => make_boxed_error_response(StatusCode::NOT_FOUND),
            };
            Ok(res)
        })
    }
}
