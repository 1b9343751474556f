//! Chunked upload lifecycle.
//!
//! The SHIFT API owns reassembly; this side only tracks which chunks the API
//! says it holds and resends the rest. [`UploadSession`] is the pure state
//! machine, [`ChunkedUploader`] drives it over HTTP.

use crate::client::{RelayClient, RelayError, RelayResponse, UpstreamRequest};
use crate::config::UploadLimits;
use crate::context::HostContext;
use crate::metrics_defs::UPLOAD_CHUNKS_SENT;
use crate::multipart::MultipartRequest;
use bytes::Bytes;
use http::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use shared::counter;
use std::collections::BTreeSet;
use std::ops::Range;

/// Resends of missing chunks after the first full pass. Every pass is
/// followed by a status poll.
pub const MAX_RECONCILE_PASSES: u32 = 3;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SessionError {
    #[error("cannot apply {event} to an upload that is {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },
    #[error("chunk {index} is outside the plan of {count} chunks")]
    ChunkOutOfRange { index: u32, count: u32 },
    #[error("chunks {0:?} have not been received")]
    MissingChunks(Vec<u32>),
}

#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    #[error("Upload is empty")]
    Empty,
    #[error("File exceeds the maximum upload size of {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("Chunk exceeds the maximum chunk size of {max} bytes")]
    ChunkTooLarge { size: u64, max: u64 },
    #[error("{0}")]
    Relay(#[from] RelayError),
    #[error("upload {step} failed with status {status}: {message}")]
    Upstream {
        step: &'static str,
        status: StatusCode,
        message: String,
    },
    #[error("upload-init response did not contain an upload_id")]
    MissingUploadId,
    #[error("upload-status response could not be read: {0}")]
    InvalidStatus(#[source] serde_json::Error),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("upload incomplete, missing chunks {0:?}")]
    Incomplete(Vec<u32>),
}

/// Rejects empty files and files above the single-shot ceiling.
pub fn check_single_upload(size: u64, limits: &UploadLimits) -> Result<(), UploadError> {
    check_size(size, limits.max_single_upload_bytes)
}

/// Rejects empty uploads and totals above the overall ceiling.
pub fn check_total_size(size: u64, limits: &UploadLimits) -> Result<(), UploadError> {
    check_size(size, limits.max_upload_bytes)
}

pub fn check_chunk(size: u64, limits: &UploadLimits) -> Result<(), UploadError> {
    if size == 0 {
        return Err(UploadError::Empty);
    }
    if size > limits.chunk_size_bytes {
        return Err(UploadError::ChunkTooLarge {
            size,
            max: limits.chunk_size_bytes,
        });
    }
    Ok(())
}

fn check_size(size: u64, max: u64) -> Result<(), UploadError> {
    if size == 0 {
        return Err(UploadError::Empty);
    }
    if size > max {
        return Err(UploadError::TooLarge { size, max });
    }
    Ok(())
}

/// Zero-based split of `total_size` bytes into `chunk_size` ranges. The last
/// chunk may be short.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    total_size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    pub fn new(total_size: u64, chunk_size: u64) -> Option<Self> {
        (total_size > 0 && chunk_size > 0).then_some(ChunkPlan {
            total_size,
            chunk_size,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn count(&self) -> u32 {
        u32::try_from(self.total_size.div_ceil(self.chunk_size)).unwrap_or(u32::MAX)
    }

    pub fn range(&self, index: u32) -> Option<Range<u64>> {
        if index >= self.count() {
            return None;
        }
        let start = u64::from(index) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_size);
        Some(start..end)
    }

    pub fn missing(&self, received: &BTreeSet<u32>) -> Vec<u32> {
        (0..self.count())
            .filter(|index| !received.contains(index))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum UploadState {
    NotStarted,
    Initialized {
        upload_id: String,
    },
    Receiving {
        upload_id: String,
        received: BTreeSet<u32>,
    },
    Completed {
        upload_id: String,
        attachment: Value,
    },
    Failed {
        reason: String,
    },
}

impl UploadState {
    pub fn name(&self) -> &'static str {
        match self {
            UploadState::NotStarted => "not started",
            UploadState::Initialized { .. } => "initialized",
            UploadState::Receiving { .. } => "receiving",
            UploadState::Completed { .. } => "completed",
            UploadState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Completed { .. } | UploadState::Failed { .. }
        )
    }
}

/// Body of `upload-status`. Older API versions name the list
/// `uploaded_chunks`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct UploadStatus {
    #[serde(alias = "uploaded_chunks")]
    pub received_chunks: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UploadSession {
    plan: ChunkPlan,
    state: UploadState,
}

impl UploadSession {
    pub fn new(plan: ChunkPlan) -> Self {
        UploadSession {
            plan,
            state: UploadState::NotStarted,
        }
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    pub fn upload_id(&self) -> Option<&str> {
        match &self.state {
            UploadState::Initialized { upload_id }
            | UploadState::Receiving { upload_id, .. }
            | UploadState::Completed { upload_id, .. } => Some(upload_id),
            UploadState::NotStarted | UploadState::Failed { .. } => None,
        }
    }

    fn invalid(&self, event: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            state: self.state.name(),
            event,
        }
    }

    fn check_index(&self, index: u32) -> Result<(), SessionError> {
        let count = self.plan.count();
        if index >= count {
            return Err(SessionError::ChunkOutOfRange { index, count });
        }
        Ok(())
    }

    pub fn initialized(&mut self, upload_id: impl Into<String>) -> Result<(), SessionError> {
        match self.state {
            UploadState::NotStarted => {
                self.state = UploadState::Initialized {
                    upload_id: upload_id.into(),
                };
                Ok(())
            }
            _ => Err(self.invalid("initialized")),
        }
    }

    pub fn chunk_received(&mut self, index: u32) -> Result<(), SessionError> {
        self.check_index(index)?;
        match &mut self.state {
            UploadState::Initialized { upload_id } => {
                let upload_id = upload_id.clone();
                self.state = UploadState::Receiving {
                    upload_id,
                    received: BTreeSet::from([index]),
                };
                Ok(())
            }
            UploadState::Receiving { received, .. } => {
                received.insert(index);
                Ok(())
            }
            _ => Err(self.invalid("chunk_received")),
        }
    }

    /// Replaces the local view of received chunks with what the API reports.
    pub fn reconcile(&mut self, status: &UploadStatus) -> Result<(), SessionError> {
        let count = self.plan.count();
        let reported: BTreeSet<u32> = status
            .received_chunks
            .iter()
            .copied()
            .filter(|index| *index < count)
            .collect();

        let upload_id = match &self.state {
            UploadState::Initialized { upload_id } | UploadState::Receiving { upload_id, .. } => {
                upload_id.clone()
            }
            _ => return Err(self.invalid("reconcile")),
        };
        self.state = UploadState::Receiving {
            upload_id,
            received: reported,
        };
        Ok(())
    }

    pub fn missing(&self) -> Vec<u32> {
        match &self.state {
            UploadState::Receiving { received, .. } => self.plan.missing(received),
            UploadState::Completed { .. } => Vec::new(),
            _ => (0..self.plan.count()).collect(),
        }
    }

    pub fn completed(&mut self, attachment: Value) -> Result<(), SessionError> {
        let UploadState::Receiving { upload_id, received } = &self.state else {
            return Err(self.invalid("completed"));
        };
        let missing = self.plan.missing(received);
        if !missing.is_empty() {
            return Err(SessionError::MissingChunks(missing));
        }
        self.state = UploadState::Completed {
            upload_id: upload_id.clone(),
            attachment,
        };
        Ok(())
    }

    pub fn failed(&mut self, reason: impl Into<String>) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Err(self.invalid("failed"));
        }
        self.state = UploadState::Failed {
            reason: reason.into(),
        };
        Ok(())
    }
}

/// A local file to send to the SHIFT attachment API.
#[derive(Clone, Debug)]
pub struct FileUpload {
    pub filename: String,
    pub mime_type: Option<String>,
    pub temp_identifier: String,
    pub bytes: Bytes,
}

impl FileUpload {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Uploads files to any base URL that speaks the SHIFT attachment API.
pub struct ChunkedUploader {
    client: RelayClient,
    ctx: HostContext,
    limits: UploadLimits,
}

impl ChunkedUploader {
    pub fn new(client: RelayClient, ctx: HostContext, limits: UploadLimits) -> Self {
        ChunkedUploader {
            client,
            ctx,
            limits,
        }
    }

    async fn call(
        &self,
        step: &'static str,
        request: UpstreamRequest,
    ) -> Result<RelayResponse, UploadError> {
        let response = self.client.send(&self.ctx.credentials, request).await?;
        if !response.is_success() {
            return Err(UploadError::Upstream {
                step,
                status: response.status,
                message: response
                    .message()
                    .unwrap_or_else(|| format!("Failed to {step} upload")),
            });
        }
        Ok(response)
    }

    fn json_body(&self, fields: Value) -> Value {
        match fields {
            Value::Object(map) => Value::Object(self.ctx.enrich(map)),
            other => other,
        }
    }

    /// Sends the whole file in one multipart request.
    pub async fn upload_single(&self, file: &FileUpload) -> Result<Value, UploadError> {
        check_single_upload(file.size(), &self.limits)?;

        let form = MultipartRequest::new()
            .add_file(
                "file",
                file.bytes.clone(),
                &file.filename,
                file.mime_type.clone(),
            )
            .add_field("temp_identifier", &file.temp_identifier)
            .add_fields(self.ctx.identity_pairs());

        let response = self
            .call(
                "send",
                UpstreamRequest::post("/api/attachments/upload").multipart(form),
            )
            .await?;
        Ok(response.json().unwrap_or(Value::Null))
    }

    /// Runs init, chunks, status reconciliation and complete. Returns the
    /// body of the `upload-complete` response.
    pub async fn upload(&self, file: &FileUpload) -> Result<Value, UploadError> {
        check_total_size(file.size(), &self.limits)?;

        let mut init = Map::new();
        init.insert("filename".into(), json!(file.filename));
        init.insert("total_size".into(), json!(file.size()));
        init.insert("temp_identifier".into(), json!(file.temp_identifier));
        if let Some(mime) = &file.mime_type {
            init.insert("mime_type".into(), json!(mime));
        }

        let response = self
            .call(
                "init",
                UpstreamRequest::post("/api/attachments/upload-init")
                    .json(self.json_body(Value::Object(init))),
            )
            .await?;
        let (upload_id, chunk_size) = parse_init(&response)?;
        let chunk_size = chunk_size
            .filter(|size| *size > 0)
            .map_or(self.limits.chunk_size_bytes, |size| {
                size.min(self.limits.chunk_size_bytes)
            });

        let plan = ChunkPlan::new(file.size(), chunk_size).ok_or(UploadError::Empty)?;
        let mut session = UploadSession::new(plan);
        session.initialized(upload_id.clone())?;
        tracing::info!(%upload_id, chunks = plan.count(), chunk_size, "upload initialized");

        match self.drive(&mut session, file, &upload_id).await {
            Ok(attachment) => Ok(attachment),
            Err(e) => {
                let _ = session.failed(e.to_string());
                tracing::warn!(%upload_id, error = %e, "upload failed");
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        session: &mut UploadSession,
        file: &FileUpload,
        upload_id: &str,
    ) -> Result<Value, UploadError> {
        let plan = *session.plan();
        let mut pending: Vec<u32> = (0..plan.count()).collect();

        for pass in 0..=MAX_RECONCILE_PASSES {
            if pass > 0 {
                tracing::info!(%upload_id, pass, missing = ?pending, "resending missing chunks");
            }
            for index in &pending {
                self.send_chunk(&plan, file, upload_id, *index).await?;
                session.chunk_received(*index)?;
            }

            let status = self.status(upload_id).await?;
            session.reconcile(&status)?;
            pending = session.missing();
            if pending.is_empty() {
                break;
            }
        }

        if !pending.is_empty() {
            return Err(UploadError::Incomplete(pending));
        }

        let response = self
            .call(
                "complete",
                UpstreamRequest::post("/api/attachments/upload-complete")
                    .json(self.json_body(json!({ "upload_id": upload_id }))),
            )
            .await?;
        let attachment = response.json().unwrap_or(Value::Null);
        session.completed(attachment.clone())?;
        Ok(attachment)
    }

    async fn send_chunk(
        &self,
        plan: &ChunkPlan,
        file: &FileUpload,
        upload_id: &str,
        index: u32,
    ) -> Result<(), UploadError> {
        let range = plan.range(index).ok_or(SessionError::ChunkOutOfRange {
            index,
            count: plan.count(),
        })?;
        let start = usize::try_from(range.start).unwrap_or(usize::MAX);
        let end = usize::try_from(range.end).unwrap_or(usize::MAX);
        let chunk = file.bytes.slice(start..end);

        let form = MultipartRequest::new()
            .add_field("upload_id", upload_id)
            .add_field("chunk_index", index.to_string())
            .add_file("chunk", chunk, &file.filename, None)
            .add_fields(self.ctx.identity_pairs());

        self.call(
            "chunk",
            UpstreamRequest::post("/api/attachments/upload-chunk").multipart(form),
        )
        .await?;
        counter!(UPLOAD_CHUNKS_SENT).increment(1);
        Ok(())
    }

    async fn status(&self, upload_id: &str) -> Result<UploadStatus, UploadError> {
        let response = self
            .call(
                "status",
                UpstreamRequest::get("/api/attachments/upload-status")
                    .query([("upload_id", upload_id)])
                    .query(self.ctx.identity_pairs()),
            )
            .await?;
        serde_json::from_slice(&response.body).map_err(UploadError::InvalidStatus)
    }
}

fn parse_init(response: &RelayResponse) -> Result<(String, Option<u64>), UploadError> {
    let body = response.json().ok_or(UploadError::MissingUploadId)?;
    let upload_id = match body.get("upload_id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return Err(UploadError::MissingUploadId),
    };
    let chunk_size = body.get("chunk_size").and_then(Value::as_u64);
    Ok((upload_id, chunk_size))
}
