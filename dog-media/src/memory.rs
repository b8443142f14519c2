//! In-process stand-in for the media platform.
//!
//! `MemoryExecutor` answers INIT / APPEND / FINALIZE / STATUS and metadata requests the
//! way the platform does, records every request it receives, and lets tests script
//! processing states and inject failures.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::config::PLATFORM_MAX_CHUNK_BYTES;
use crate::wire::{COMMAND_APPEND, COMMAND_FINALIZE, COMMAND_INIT, COMMAND_STATUS, MEDIA_FIELD};
use crate::{
    ExecutorError, ExecutorResponse, MediaCategory, MediaId, MediaMetadata, MediaRequest,
    ProcessingState, RequestBody, RequestExecutor,
};

const EXPIRES_AFTER_SECS: u64 = 86_400;
const FIRST_MEDIA_ID: u64 = 710_511_363_345_354_753;

/// Processing state the simulated platform reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedStatus {
    pub state: ProcessingState,
    pub progress_percent: Option<u8>,
    pub check_after_secs: Option<u64>,
    pub error_message: Option<String>,
}

impl ScriptedStatus {
    pub fn pending(check_after_secs: u64) -> Self {
        Self {
            state: ProcessingState::Pending,
            progress_percent: None,
            check_after_secs: Some(check_after_secs),
            error_message: None,
        }
    }

    pub fn in_progress(progress_percent: u8, check_after_secs: u64) -> Self {
        Self {
            state: ProcessingState::InProgress,
            progress_percent: Some(progress_percent),
            check_after_secs: Some(check_after_secs),
            error_message: None,
        }
    }

    pub fn in_progress_without_hint(progress_percent: u8) -> Self {
        Self {
            check_after_secs: None,
            ..Self::in_progress(progress_percent, 0)
        }
    }

    pub fn succeeded() -> Self {
        Self {
            state: ProcessingState::Succeeded,
            progress_percent: Some(100),
            check_after_secs: None,
            error_message: None,
        }
    }

    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self {
            state: ProcessingState::Failed,
            progress_percent: None,
            check_after_secs: None,
            error_message: Some(message.into()),
        }
    }

    fn to_json(&self) -> Value {
        let mut info = json!({ "state": self.state });
        if let Some(progress) = self.progress_percent {
            info["progress_percent"] = json!(progress);
        }
        if let Some(secs) = self.check_after_secs {
            info["check_after_secs"] = json!(secs);
        }
        if let Some(message) = &self.error_message {
            info["error"] = json!({ "code": 1, "name": "InvalidMedia", "message": message });
        }
        info
    }
}

/// A request as received, with the (tokio) time it arrived
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: MediaRequest,
    pub at: Instant,
}

impl RecordedRequest {
    /// Upload command, or `METADATA` for metadata requests
    pub fn command(&self) -> String {
        match self.request.command() {
            Some(command) => command.to_string(),
            None => "METADATA".to_string(),
        }
    }
}

enum StatusStep {
    Respond(ScriptedStatus),
    /// Answer without a `processing_info` object
    Bare,
    Fail(ExecutorError),
}

enum FinalizeScript {
    /// Images and subtitles are ready, GIFs and videos start pending
    ByCategory,
    Ready,
    Processing(ScriptedStatus),
}

struct StoredUpload {
    category: MediaCategory,
    media_type: String,
    total_bytes: u64,
    segments: Vec<(u32, Bytes)>,
    finalized: bool,
}

struct MemoryState {
    next_id: u64,
    uploads: HashMap<MediaId, StoredUpload>,
    requests: Vec<RecordedRequest>,
    max_chunk_bytes: Option<u64>,
    init_failure: Option<ExecutorError>,
    append_failures: HashMap<u32, (u32, ExecutorError)>,
    finalize_failure: Option<ExecutorError>,
    finalize_script: FinalizeScript,
    status_script: VecDeque<StatusStep>,
    status_latency: Option<Duration>,
    metadata: HashMap<MediaId, MediaMetadata>,
}

/// Simulated media platform implementing [`RequestExecutor`]
pub struct MemoryExecutor {
    state: Mutex<MemoryState>,
}

impl Default for MemoryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_id: FIRST_MEDIA_ID,
                uploads: HashMap::new(),
                requests: Vec::new(),
                max_chunk_bytes: None,
                init_failure: None,
                append_failures: HashMap::new(),
                finalize_failure: None,
                finalize_script: FinalizeScript::ByCategory,
                status_script: VecDeque::new(),
                status_latency: None,
                metadata: HashMap::new(),
            }),
        }
    }

    /// Announce a chunk cap in INIT responses and enforce it on APPEND
    pub fn with_max_chunk_bytes(self, bytes: u64) -> Self {
        self.state.lock().max_chunk_bytes = Some(bytes);
        self
    }

    /// Fail the next INIT
    pub fn fail_init(&self, error: ExecutorError) {
        self.state.lock().init_failure = Some(error);
    }

    /// Fail APPENDs of `segment_index` the next `times` times
    pub fn fail_append(&self, segment_index: u32, times: u32, error: ExecutorError) {
        self.state
            .lock()
            .append_failures
            .insert(segment_index, (times, error));
    }

    /// Fail the next FINALIZE
    pub fn fail_finalize(&self, error: ExecutorError) {
        self.state.lock().finalize_failure = Some(error);
    }

    /// FINALIZE reports media ready, whatever the category
    pub fn finalize_ready(&self) {
        self.state.lock().finalize_script = FinalizeScript::Ready;
    }

    /// FINALIZE reports the given processing state
    pub fn finalize_processing(&self, status: ScriptedStatus) {
        self.state.lock().finalize_script = FinalizeScript::Processing(status);
    }

    /// Queue the answer of a future STATUS poll. Once the queue is empty, polls succeed.
    pub fn push_status(&self, status: ScriptedStatus) {
        self.state
            .lock()
            .status_script
            .push_back(StatusStep::Respond(status));
    }

    /// Queue a failing STATUS poll
    pub fn fail_status(&self, error: ExecutorError) {
        self.state.lock().status_script.push_back(StatusStep::Fail(error));
    }

    /// Queue a STATUS answer that omits `processing_info`
    pub fn push_status_without_info(&self) {
        self.state.lock().status_script.push_back(StatusStep::Bare);
    }

    /// Hold every STATUS answer back for `latency`
    pub fn delay_status(&self, latency: Duration) {
        self.state.lock().status_latency = Some(latency);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Commands in the order received, failed attempts included
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .requests
            .iter()
            .map(RecordedRequest::command)
            .collect()
    }

    pub fn status_polls(&self) -> usize {
        self.status_poll_times().len()
    }

    /// Arrival times of STATUS polls
    pub fn status_poll_times(&self) -> Vec<Instant> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.request.command() == Some(COMMAND_STATUS))
            .map(|r| r.at)
            .collect()
    }

    /// `(segment_index, length)` of accepted chunks
    pub fn appended_segments(&self, media_id: &MediaId) -> Vec<(u32, usize)> {
        self.state
            .lock()
            .uploads
            .get(media_id)
            .map(|upload| {
                upload
                    .segments
                    .iter()
                    .map(|(index, data)| (*index, data.len()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Accepted chunks joined in segment order
    pub fn uploaded_bytes(&self, media_id: &MediaId) -> Option<Bytes> {
        let state = self.state.lock();
        let upload = state.uploads.get(media_id)?;
        let mut joined = BytesMut::with_capacity(upload.total_bytes as usize);
        for (_, data) in &upload.segments {
            joined.extend_from_slice(data);
        }
        Some(joined.freeze())
    }

    pub fn metadata(&self, media_id: &MediaId) -> Option<MediaMetadata> {
        self.state.lock().metadata.get(media_id).cloned()
    }

    fn dispatch(state: &mut MemoryState, request: &MediaRequest) -> Result<Value, ExecutorError> {
        match request.command() {
            Some(COMMAND_INIT) => Self::init(state, request),
            Some(COMMAND_APPEND) => Self::append(state, request),
            Some(COMMAND_FINALIZE) => Self::finalize(state, request),
            Some(COMMAND_STATUS) => Self::status(state, request),
            Some(other) => Err(ExecutorError::http(400, format!("unknown command {}", other))),
            None => Self::attach_metadata(state, request),
        }
    }

    fn init(state: &mut MemoryState, request: &MediaRequest) -> Result<Value, ExecutorError> {
        if let Some(error) = state.init_failure.take() {
            return Err(error);
        }

        let total_bytes = required(request, "total_bytes")?
            .parse::<u64>()
            .map_err(|_| ExecutorError::http(400, "total_bytes is not a number"))?;
        if total_bytes == 0 {
            return Err(ExecutorError::http(400, "total_bytes must be positive"));
        }
        let media_type = required(request, "media_type")?.to_string();
        let category = MediaCategory::from_wire_name(required(request, "media_category")?)
            .ok_or_else(|| ExecutorError::http(400, "unknown media_category"))?;

        let numeric_id = state.next_id;
        state.next_id += 1;
        let media_id = MediaId::from(numeric_id.to_string());
        state.uploads.insert(
            media_id.clone(),
            StoredUpload {
                category,
                media_type,
                total_bytes,
                segments: Vec::new(),
                finalized: false,
            },
        );

        let mut body = json!({
            "media_id": numeric_id,
            "media_id_string": media_id.as_str(),
            "expires_after_secs": EXPIRES_AFTER_SECS,
        });
        if let Some(cap) = state.max_chunk_bytes {
            body["max_chunk_bytes"] = json!(cap);
        }
        Ok(body)
    }

    fn append(state: &mut MemoryState, request: &MediaRequest) -> Result<Value, ExecutorError> {
        let media_id = MediaId::from(required(request, "media_id")?);
        let segment_index = required(request, "segment_index")?
            .parse::<u32>()
            .map_err(|_| ExecutorError::http(400, "segment_index is not a number"))?;

        if let Some((remaining, error)) = state.append_failures.get_mut(&segment_index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }

        let cap = state.max_chunk_bytes.unwrap_or(PLATFORM_MAX_CHUNK_BYTES);
        let upload = state
            .uploads
            .get_mut(&media_id)
            .ok_or_else(|| ExecutorError::http(400, "invalid media_id"))?;
        if upload.finalized {
            return Err(ExecutorError::http(400, "media already finalized"));
        }
        let expected = upload.segments.len() as u32;
        if segment_index != expected {
            return Err(ExecutorError::http(
                400,
                format!("expected segment {}, got {}", expected, segment_index),
            ));
        }
        let data = request
            .binary(MEDIA_FIELD)
            .ok_or_else(|| ExecutorError::http(400, "missing media field"))?;
        if data.is_empty() || data.len() as u64 > cap {
            return Err(ExecutorError::http(400, "segment size out of bounds"));
        }

        upload.segments.push((segment_index, data.clone()));
        Ok(Value::Null)
    }

    fn finalize(state: &mut MemoryState, request: &MediaRequest) -> Result<Value, ExecutorError> {
        if let Some(error) = state.finalize_failure.take() {
            return Err(error);
        }

        let media_id = MediaId::from(required(request, "media_id")?);
        let upload = state
            .uploads
            .get_mut(&media_id)
            .ok_or_else(|| ExecutorError::http(400, "invalid media_id"))?;
        let received: u64 = upload.segments.iter().map(|(_, d)| d.len() as u64).sum();
        if received != upload.total_bytes {
            return Err(ExecutorError::http(
                400,
                format!("received {} of {} bytes", received, upload.total_bytes),
            ));
        }
        upload.finalized = true;

        let processing = match &state.finalize_script {
            FinalizeScript::Ready => None,
            FinalizeScript::Processing(status) => Some(status.clone()),
            FinalizeScript::ByCategory => match upload.category {
                MediaCategory::Image | MediaCategory::Subtitle => None,
                MediaCategory::Gif | MediaCategory::Video => Some(ScriptedStatus::pending(1)),
            },
        };

        let mut body = json!({
            "media_id_string": media_id.as_str(),
            "size": upload.total_bytes,
            "expires_after_secs": EXPIRES_AFTER_SECS,
        });
        if let Ok(numeric) = media_id.as_str().parse::<u64>() {
            body["media_id"] = json!(numeric);
        }
        match upload.category {
            MediaCategory::Image => {
                body["image"] = json!({ "image_type": upload.media_type, "w": 1, "h": 1 });
            }
            MediaCategory::Gif | MediaCategory::Video => {
                body["video"] = json!({ "video_type": upload.media_type });
            }
            MediaCategory::Subtitle => {}
        }
        if let Some(status) = processing {
            body["processing_info"] = status.to_json();
        }
        Ok(body)
    }

    fn status(state: &mut MemoryState, request: &MediaRequest) -> Result<Value, ExecutorError> {
        let media_id = MediaId::from(required(request, "media_id")?);
        match state.uploads.get(&media_id) {
            None => return Err(ExecutorError::http(404, "media not found")),
            Some(upload) if !upload.finalized => {
                return Err(ExecutorError::http(400, "media not finalized"))
            }
            Some(_) => {}
        }

        let mut body = json!({
            "media_id_string": media_id.as_str(),
            "expires_after_secs": EXPIRES_AFTER_SECS,
        });
        let status = match state.status_script.pop_front() {
            Some(StatusStep::Fail(error)) => return Err(error),
            Some(StatusStep::Bare) => return Ok(body),
            Some(StatusStep::Respond(status)) => status,
            None => ScriptedStatus::succeeded(),
        };

        body["processing_info"] = status.to_json();
        Ok(body)
    }

    fn attach_metadata(
        state: &mut MemoryState,
        request: &MediaRequest,
    ) -> Result<Value, ExecutorError> {
        let RequestBody::Json(body) = &request.body else {
            return Err(ExecutorError::http(400, "missing command"));
        };
        let media_id = body["media_id"]
            .as_str()
            .map(MediaId::from)
            .ok_or_else(|| ExecutorError::http(400, "missing media_id"))?;
        if !state.uploads.contains_key(&media_id) {
            return Err(ExecutorError::http(400, "invalid media_id"));
        }

        let alt_text = body["alt_text"]["text"].as_str().map(str::to_string);
        state.metadata.insert(media_id, MediaMetadata { alt_text });
        Ok(Value::Null)
    }
}

fn required<'a>(request: &'a MediaRequest, name: &str) -> Result<&'a str, ExecutorError> {
    request
        .param(name)
        .ok_or_else(|| ExecutorError::http(400, format!("missing {}", name)))
}

#[async_trait]
impl RequestExecutor for MemoryExecutor {
    async fn execute(&self, request: MediaRequest) -> Result<ExecutorResponse, ExecutorError> {
        let latency = {
            let mut state = self.state.lock();
            state.requests.push(RecordedRequest {
                request: request.clone(),
                at: Instant::now(),
            });
            match request.command() {
                Some(COMMAND_STATUS) => state.status_latency,
                _ => None,
            }
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let body = Self::dispatch(&mut self.state.lock(), &request)?;
        let body = match body {
            Value::Null => Bytes::new(),
            value => Bytes::from(value.to_string()),
        };
        Ok(ExecutorResponse::new(200, body))
    }
}
