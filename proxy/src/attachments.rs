//! Attachment uploads (single, multiple, chunked), temp attachment
//! management and downloads.

use crate::auth::Caller;
use crate::errors::{ApiError, Operation};
use crate::metrics_defs::UPLOADS_REJECTED;
use crate::payload::{parse_object, query_value, required_str, upstream_json};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Multipart, Path, RawQuery, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use relay::download::{ATTACHMENT_HEADERS, DownloadOutcome, TEMP_FILE_HEADERS, classify};
use relay::multipart::MultipartRequest;
use relay::upload::{UploadError, check_chunk, check_single_upload, check_total_size};
use relay::{HostContext, UpstreamRequest};
use serde_json::{Value, json};
use shared::counter;
use std::sync::Arc;

const UPLOAD: Operation = Operation::write("upload attachment");
const UPLOAD_MULTIPLE: Operation = Operation::write("upload attachments");
const UPLOAD_INIT: Operation = Operation::write("initialize upload");
const UPLOAD_CHUNK: Operation = Operation::write("upload chunk");
const UPLOAD_STATUS: Operation = Operation::read("fetch upload status");
const UPLOAD_COMPLETE: Operation = Operation::write("complete upload");
const LIST_TEMP: Operation = Operation::write("list attachments");
const REMOVE_TEMP: Operation = Operation::write("remove attachment");
const DOWNLOAD: Operation = Operation::write("download attachment");
const DOWNLOAD_TEMP: Operation = Operation::write("download file");

struct ReceivedFile {
    field: String,
    filename: String,
    mime_type: Option<String>,
    bytes: Bytes,
}

#[derive(Default)]
struct ReceivedForm {
    files: Vec<ReceivedFile>,
    fields: Vec<(String, String)>,
}

impl ReceivedForm {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, v)| n == name && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, name: &str) -> Result<&str, ApiError> {
        self.field(name)
            .ok_or_else(|| ApiError::Validation(format!("The {name} field is required.")))
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::Validation(format!("Invalid multipart body: {e}"))
}

async fn read_form(mut multipart: Multipart) -> Result<ReceivedForm, ApiError> {
    let mut form = ReceivedForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let mime_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                form.files.push(ReceivedFile {
                    field: name,
                    filename,
                    mime_type,
                    bytes,
                });
            }
            None => {
                let value = field.text().await.map_err(multipart_error)?;
                form.fields.push((name, value));
            }
        }
    }

    Ok(form)
}

/// Local size checks reject before any upstream call.
fn enforce(check: Result<(), UploadError>, route: &'static str) -> Result<(), ApiError> {
    check.map_err(|e| {
        counter!(UPLOADS_REJECTED, "route" => route).increment(1);
        ApiError::from(e)
    })
}

/// Single-shot upload of one file, capped at the single upload ceiling.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = read_form(multipart).await?;
    let file = form
        .files
        .iter()
        .find(|f| f.field == "file")
        .ok_or_else(|| ApiError::Validation("The file field is required.".into()))?;
    let temp_identifier = form.require("temp_identifier")?;
    enforce(
        check_single_upload(file.bytes.len() as u64, &state.config.uploads),
        "upload",
    )?;

    let body = MultipartRequest::new()
        .add_file(
            "file",
            file.bytes.clone(),
            &file.filename,
            file.mime_type.clone(),
        )
        .add_field("temp_identifier", temp_identifier)
        .add_fields(ctx.identity_pairs());

    let request = UpstreamRequest::post("/api/attachments/upload").multipart(body);
    let response = state.forward(&ctx, UPLOAD, request).await?;
    Ok(Json(upstream_json(&response)))
}

fn is_attachment_field(name: &str) -> bool {
    name == "attachments" || name.starts_with("attachments[")
}

pub async fn upload_multiple(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = read_form(multipart).await?;
    let files: Vec<&ReceivedFile> = form
        .files
        .iter()
        .filter(|f| is_attachment_field(&f.field))
        .collect();
    if files.is_empty() {
        return Err(ApiError::Validation(
            "The attachments field is required.".into(),
        ));
    }
    let temp_identifier = form.require("temp_identifier")?;

    let limits = &state.config.uploads;
    let mut total: u64 = 0;
    for file in &files {
        let size = file.bytes.len() as u64;
        enforce(check_single_upload(size, limits), "upload-multiple")?;
        total += size;
    }
    enforce(check_total_size(total, limits), "upload-multiple")?;

    let body = files
        .iter()
        .enumerate()
        .fold(MultipartRequest::new(), |body, (i, file)| {
            body.add_file(
                format!("attachments[{i}]"),
                file.bytes.clone(),
                &file.filename,
                file.mime_type.clone(),
            )
        })
        .add_field("temp_identifier", temp_identifier)
        .add_fields(ctx.identity_pairs());

    let request = UpstreamRequest::post("/api/attachments/upload-multiple").multipart(body);
    let response = state.forward(&ctx, UPLOAD_MULTIPLE, request).await?;
    Ok(Json(upstream_json(&response)))
}

/// Starts a chunked upload. The SHIFT API answers with the `upload_id`.
pub async fn upload_init(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse_object(&body)?;
    required_str(&body, "filename")?;
    required_str(&body, "temp_identifier")?;
    let total_size = body
        .get("total_size")
        .and_then(Value::as_u64)
        .ok_or_else(|| ApiError::Validation("The total_size field must be a positive integer.".into()))?;
    enforce(
        check_total_size(total_size, &state.config.uploads),
        "upload-init",
    )?;

    let request =
        UpstreamRequest::post("/api/attachments/upload-init").json(Value::Object(ctx.enrich(body)));
    let response = state.forward(&ctx, UPLOAD_INIT, request).await?;
    Ok(Json(upstream_json(&response)))
}

/// Relays one chunk. Order and duplicates are the SHIFT API's concern.
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = read_form(multipart).await?;
    let upload_id = form.require("upload_id")?;
    let chunk_index: u32 = form
        .require("chunk_index")?
        .trim()
        .parse()
        .map_err(|_| ApiError::Validation("The chunk_index field must be an integer.".into()))?;
    let chunk = form
        .files
        .iter()
        .find(|f| f.field == "chunk")
        .ok_or_else(|| ApiError::Validation("The chunk field is required.".into()))?;
    enforce(
        check_chunk(chunk.bytes.len() as u64, &state.config.uploads),
        "upload-chunk",
    )?;

    let body = MultipartRequest::new()
        .add_field("upload_id", upload_id)
        .add_field("chunk_index", chunk_index.to_string())
        .add_file(
            "chunk",
            chunk.bytes.clone(),
            &chunk.filename,
            chunk.mime_type.clone(),
        )
        .add_fields(ctx.identity_pairs());

    let request = UpstreamRequest::post("/api/attachments/upload-chunk").multipart(body);
    let response = state.forward(&ctx, UPLOAD_CHUNK, request).await?;
    Ok(Json(upstream_json(&response)))
}

pub async fn upload_status(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    RawQuery(query): RawQuery,
) -> Result<Json<Value>, ApiError> {
    let upload_id = query_value(query.as_deref(), "upload_id")
        .ok_or_else(|| ApiError::Validation("The upload_id field is required.".into()))?;

    let request = UpstreamRequest::get("/api/attachments/upload-status")
        .query([("upload_id", upload_id)])
        .query(ctx.identity_pairs());
    let response = state.forward(&ctx, UPLOAD_STATUS, request).await?;
    Ok(Json(upstream_json(&response)))
}

pub async fn upload_complete(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse_object(&body)?;
    let upload_id = required_str(&body, "upload_id")?;

    let mut payload = serde_json::Map::new();
    payload.insert("upload_id".into(), json!(upload_id));
    let request = UpstreamRequest::post("/api/attachments/upload-complete")
        .json(Value::Object(ctx.enrich(payload)));
    let response = state.forward(&ctx, UPLOAD_COMPLETE, request).await?;
    Ok(Json(upstream_json(&response)))
}

pub async fn list_temp(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    RawQuery(query): RawQuery,
) -> Result<Json<Value>, ApiError> {
    let temp_identifier = query_value(query.as_deref(), "temp_identifier")
        .ok_or_else(|| ApiError::Validation("The temp_identifier field is required.".into()))?;

    let request = UpstreamRequest::get("/api/attachments/list-temp")
        .query([("temp_identifier", temp_identifier)])
        .query(ctx.identity_pairs());
    let response = state.forward(&ctx, LIST_TEMP, request).await?;
    Ok(Json(upstream_json(&response)))
}

/// Removes a temp attachment. `path` may come in a JSON body or the query.
pub async fn remove_temp(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse_object(&body)?;
    let from_body = |name: &str| {
        body.get(name)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let path = from_body("path")
        .or_else(|| query_value(query.as_deref(), "path"))
        .ok_or_else(|| ApiError::Validation("The path field is required.".into()))?;
    let temp_identifier =
        from_body("temp_identifier").or_else(|| query_value(query.as_deref(), "temp_identifier"));

    let mut payload = serde_json::Map::new();
    payload.insert("path".into(), json!(path));
    if let Some(temp) = temp_identifier {
        payload.insert("temp_identifier".into(), json!(temp));
    }

    let request = UpstreamRequest::delete("/api/attachments/remove-temp")
        .json(Value::Object(ctx.enrich(payload)));
    state.forward(&ctx, REMOVE_TEMP, request).await?;
    Ok(Json(json!({"message": "Attachment removed successfully"})))
}

fn outcome_response(outcome: DownloadOutcome) -> Result<Response, ApiError> {
    match outcome {
        DownloadOutcome::Redirect(url) => {
            let location = HeaderValue::from_str(&url)
                .map_err(|_| ApiError::Internal("Invalid download location".into()))?;
            Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
        }
        DownloadOutcome::Binary { body, headers } => {
            Ok((StatusCode::OK, headers, body).into_response())
        }
        DownloadOutcome::Error { status, message } => Err(ApiError::Upstream { status, message }),
    }
}

async fn download_from(
    state: &AppState,
    ctx: &HostContext,
    op: Operation,
    path: &str,
    allow: &[http::HeaderName],
) -> Result<Response, ApiError> {
    let response = state
        .client
        .download(&ctx.credentials, path, &ctx.identity_pairs())
        .await
        .map_err(|e| ApiError::transport(op, e))?;

    let outcome = classify(response, allow, &format!("Failed to {}", op.action));
    outcome_response(outcome)
}

/// Serves an attachment as a redirect to storage or as the file itself.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path(id): Path<u64>,
) -> Result<Response, ApiError> {
    download_from(
        &state,
        &ctx,
        DOWNLOAD,
        &format!("/api/attachments/{id}/download"),
        ATTACHMENT_HEADERS,
    )
    .await
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".."
}

pub async fn download_temp(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path((temp, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    if !valid_segment(&temp) || !valid_segment(&filename) {
        return Err(ApiError::Validation("Invalid temp attachment path".into()));
    }

    let path = format!(
        "/api/attachments/temp/{}/{}",
        urlencoding::encode(&temp),
        urlencoding::encode(&filename)
    );
    download_from(&state, &ctx, DOWNLOAD_TEMP, &path, TEMP_FILE_HEADERS).await
}
