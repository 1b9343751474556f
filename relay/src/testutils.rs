use crate::config::{AppConfig, Credentials};
use crate::context::{HostContext, HostUser};
use url::Url;

pub fn test_user() -> HostUser {
    HostUser {
        id: 42,
        name: "Ada Lovelace".into(),
        email: "ada@example.com".into(),
    }
}

pub fn test_context(base_url: &str) -> HostContext {
    HostContext {
        credentials: Credentials {
            token: "test-token".into(),
            project: "proj-1".into(),
            base_url: Url::parse(base_url).unwrap(),
        },
        user: test_user(),
        app: AppConfig {
            name: "Host".into(),
            url: "https://host.example.com".into(),
            env: "testing".into(),
        },
    }
}

/// Parts of a `multipart/form-data` request body, by name.
pub struct FormParts(Vec<(String, Vec<u8>)>);

impl FormParts {
    pub fn bytes(&self, name: &str) -> Vec<u8> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.clone())
            .unwrap_or_else(|| panic!("missing part {name}"))
    }

    pub fn text(&self, name: &str) -> String {
        String::from_utf8(self.bytes(name)).unwrap()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|(n, _)| n.as_str()).collect()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

pub fn multipart_parts(request: &wiremock::Request) -> FormParts {
    let content_type = request
        .headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let boundary = content_type
        .split("boundary=")
        .nth(1)
        .expect("multipart boundary")
        .trim_matches('"');
    let delimiter = format!("--{boundary}");

    let mut parts = Vec::new();
    let mut rest = &request.body[..];
    while let Some(start) = find(rest, delimiter.as_bytes()) {
        rest = &rest[start + delimiter.len()..];
        if rest.starts_with(b"--") {
            break;
        }
        rest = &rest[2..];
        let header_end = find(rest, b"\r\n\r\n").expect("part headers");
        let headers = std::str::from_utf8(&rest[..header_end]).unwrap();
        let name = headers
            .split("; name=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .expect("part name")
            .to_string();

        let content = &rest[header_end + 4..];
        let end = find(content, delimiter.as_bytes()).expect("closing delimiter");
        parts.push((name, content[..end - 2].to_vec()));
        rest = &content[end..];
    }
    FormParts(parts)
}
