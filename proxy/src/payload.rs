use crate::errors::ApiError;
use bytes::Bytes;
use relay::RelayResponse;
use relay::context::is_reserved_pair_key;
use serde_json::{Map, Value};

/// Parses a caller body that must be a JSON object. An empty body is an
/// empty object.
pub fn parse_object(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::Validation(
            "Request body must be a JSON object".into(),
        )),
        Err(e) => Err(ApiError::Validation(format!("Invalid JSON body: {e}"))),
    }
}

/// The upstream body as JSON, `null` when it is not JSON.
pub fn upstream_json(response: &RelayResponse) -> Value {
    response.json().unwrap_or(Value::Null)
}

/// Caller query pairs, minus the keys the proxy sets itself.
pub fn caller_query(raw: Option<&str>) -> Vec<(String, String)> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    url::form_urlencoded::parse(raw.as_bytes())
        .filter(|(key, _)| !is_reserved_pair_key(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

pub fn query_value(raw: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(raw?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// A required non-empty string field.
pub fn required_str<'a>(body: &'a Map<String, Value>, field: &str) -> Result<&'a str, ApiError> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::Validation(format!("The {field} field is required.")))
}
