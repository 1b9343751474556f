use crate::client::RelayResponse;
use bytes::Bytes;
use http::StatusCode;
use http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap, HeaderName, LOCATION,
};
use serde_json::Value;

/// Headers relayed with an attachment body.
pub static ATTACHMENT_HEADERS: &[HeaderName] = &[CONTENT_TYPE, CONTENT_DISPOSITION, CACHE_CONTROL];

/// Headers relayed with a temporary upload body.
pub static TEMP_FILE_HEADERS: &[HeaderName] = &[CONTENT_TYPE, CACHE_CONTROL];

/// What a download proxy should send back to the browser.
#[derive(Clone, Debug, PartialEq)]
pub enum DownloadOutcome {
    Redirect(String),
    Binary { body: Bytes, headers: HeaderMap },
    Error { status: StatusCode, message: String },
}

/// Sorts an upstream download response into one of three shapes. The SHIFT
/// API may answer with a redirect to signed storage, a JSON object carrying
/// that URL, or the file itself.
pub fn classify(
    response: RelayResponse,
    allow: &[HeaderName],
    default_message: &str,
) -> DownloadOutcome {
    if response.status.is_redirection() {
        if let Some(location) = response
            .headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            return DownloadOutcome::Redirect(location.to_string());
        }
    }

    let json = response.json();
    if let Some(url) = json
        .as_ref()
        .and_then(|v| v.get("url"))
        .and_then(Value::as_str)
    {
        return DownloadOutcome::Redirect(url.to_string());
    }

    if response.is_success() {
        return DownloadOutcome::Binary {
            headers: shared::http::retain_allowed(&response.headers, allow),
            body: response.body,
        };
    }

    let message = json
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(default_message)
        .to_string();
    let status = if response.status.as_u16() >= 400 {
        response.status
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };

    DownloadOutcome::Error { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, HeaderValue};

    fn response(status: u16, headers: &[(HeaderName, &'static str)], body: &'static [u8]) -> RelayResponse {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(name.clone(), HeaderValue::from_static(value));
        }
        RelayResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: map,
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn test_location_redirect() {
        let outcome = classify(
            response(302, &[(LOCATION, "https://storage.example.com/signed")], b""),
            ATTACHMENT_HEADERS,
            "Failed to download attachment",
        );
        assert_eq!(
            outcome,
            DownloadOutcome::Redirect("https://storage.example.com/signed".into())
        );
    }

    #[test]
    fn test_json_url_redirect() {
        let outcome = classify(
            response(
                200,
                &[(CONTENT_TYPE, "application/json")],
                br#"{"url":"https://storage.example.com/a.pdf"}"#,
            ),
            ATTACHMENT_HEADERS,
            "Failed to download attachment",
        );
        assert_eq!(
            outcome,
            DownloadOutcome::Redirect("https://storage.example.com/a.pdf".into())
        );
    }

    #[test]
    fn test_binary_keeps_only_allowed_headers() {
        let outcome = classify(
            response(
                200,
                &[
                    (CONTENT_TYPE, "application/pdf"),
                    (CONTENT_DISPOSITION, "attachment; filename=\"a.pdf\""),
                    (CACHE_CONTROL, "private"),
                    (CONTENT_LENGTH, "9"),
                    (CONTENT_ENCODING, "gzip"),
                ],
                b"%PDF-1.7\n",
            ),
            ATTACHMENT_HEADERS,
            "Failed to download attachment",
        );

        let DownloadOutcome::Binary { body, headers } = outcome else {
            panic!("expected binary outcome");
        };
        assert_eq!(body, Bytes::from_static(b"%PDF-1.7\n"));
        assert_eq!(headers.len(), 3);
        assert!(headers.get(CONTENT_LENGTH).is_none());
        assert!(headers.get(CONTENT_ENCODING).is_none());

        let outcome = classify(
            response(
                200,
                &[
                    (CONTENT_TYPE, "image/png"),
                    (CONTENT_DISPOSITION, "inline"),
                ],
                b"png",
            ),
            TEMP_FILE_HEADERS,
            "Failed to download file",
        );
        let DownloadOutcome::Binary { headers, .. } = outcome else {
            panic!("expected binary outcome");
        };
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "image/png");
        assert!(headers.get(CONTENT_DISPOSITION).is_none());
    }

    #[test]
    fn test_error_uses_upstream_message_and_status() {
        let outcome = classify(
            response(404, &[], br#"{"message":"Attachment not found"}"#),
            ATTACHMENT_HEADERS,
            "Failed to download attachment",
        );
        assert_eq!(
            outcome,
            DownloadOutcome::Error {
                status: StatusCode::NOT_FOUND,
                message: "Attachment not found".into(),
            }
        );

        let outcome = classify(
            response(500, &[], b"<html>oops</html>"),
            ATTACHMENT_HEADERS,
            "Failed to download attachment",
        );
        assert_eq!(
            outcome,
            DownloadOutcome::Error {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "Failed to download attachment".into(),
            }
        );
    }

    #[test]
    fn test_redirect_without_location_is_error() {
        let outcome = classify(
            response(302, &[], b""),
            ATTACHMENT_HEADERS,
            "Failed to download attachment",
        );
        assert_eq!(
            outcome,
            DownloadOutcome::Error {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                message: "Failed to download attachment".into(),
            }
        );
    }
}
