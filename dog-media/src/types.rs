use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{MediaConfig, MediaError, MediaResult};

/// Stream of bytes for media content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Server-assigned media identifier. Opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaId(pub String);

impl MediaId {
    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MediaId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MediaId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for MediaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared content category of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaCategory {
    Image,
    Gif,
    Video,
    Subtitle,
}

impl MediaCategory {
    /// Value of the `media_category` INIT field
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Image => "tweet_image",
            Self::Gif => "tweet_gif",
            Self::Video => "tweet_video",
            Self::Subtitle => "subtitles",
        }
    }

    /// MIME type sent when the caller does not provide one
    pub fn default_media_type(&self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Video => "video/mp4",
            Self::Subtitle => "application/x-subrip",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "tweet_image" => Some(Self::Image),
            "tweet_gif" => Some(Self::Gif),
            "tweet_video" => Some(Self::Video),
            "subtitles" => Some(Self::Subtitle),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Binary content of an upload
pub enum MediaPayload {
    /// Fully buffered content
    Bytes(Bytes),
    /// Streamed content; length is only known from the declared total
    Stream(ByteStream),
}

impl std::fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// Request to upload one media item
#[derive(Debug)]
pub struct MediaUploadParameters {
    pub payload: MediaPayload,
    pub category: MediaCategory,
    pub media_type: String,
    pub total_bytes: u64,
    pub chunk_size: Option<u64>,
    pub additional_owners: Vec<String>,
}

impl MediaUploadParameters {
    /// Upload buffered bytes; the declared size is the buffer length
    pub fn new<B: Into<Bytes>>(data: B, category: MediaCategory) -> Self {
        let data = data.into();
        Self {
            total_bytes: data.len() as u64,
            payload: MediaPayload::Bytes(data),
            category,
            media_type: category.default_media_type().to_string(),
            chunk_size: None,
            additional_owners: Vec::new(),
        }
    }

    /// Upload from a stream of declared total length
    pub fn from_stream(stream: ByteStream, category: MediaCategory, total_bytes: u64) -> Self {
        Self {
            payload: MediaPayload::Stream(stream),
            category,
            media_type: category.default_media_type().to_string(),
            total_bytes,
            chunk_size: None,
            additional_owners: Vec::new(),
        }
    }

    pub fn with_media_type<S: Into<String>>(mut self, media_type: S) -> Self {
        self.media_type = media_type.into();
        self
    }

    /// Override the declared total size
    pub fn with_total_bytes(mut self, total_bytes: u64) -> Self {
        self.total_bytes = total_bytes;
        self
    }

    /// Request a chunk size (capped by the config and the platform)
    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = Some(bytes);
        self
    }

    /// Grant other accounts use of the uploaded media
    pub fn with_additional_owners<I, S>(mut self, owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additional_owners = owners.into_iter().map(Into::into).collect();
        self
    }

    /// Validate against the config and return the chunk size to request
    pub fn validate(&self, config: &MediaConfig) -> MediaResult<u64> {
        config.validate()?;

        if self.total_bytes == 0 {
            return Err(MediaError::invalid("Media payload is empty"));
        }

        if let MediaPayload::Bytes(bytes) = &self.payload {
            if bytes.is_empty() {
                return Err(MediaError::invalid("Media payload is empty"));
            }
            if bytes.len() as u64 != self.total_bytes {
                return Err(MediaError::invalid(format!(
                    "Declared size {} does not match payload size {}",
                    self.total_bytes,
                    bytes.len()
                )));
            }
        }

        if self.media_type.trim().is_empty() {
            return Err(MediaError::invalid("Media type must not be empty"));
        }

        match self.chunk_size {
            Some(0) => Err(MediaError::invalid("Chunk size must be greater than zero")),
            Some(size) if size > config.max_chunk_bytes => Err(MediaError::invalid(format!(
                "Chunk size {} exceeds maximum {}",
                size, config.max_chunk_bytes
            ))),
            Some(size) => Ok(size),
            None => Ok(config.default_chunk_bytes.min(config.max_chunk_bytes)),
        }
    }
}

/// Phase of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Init,
    Appending,
    Finalizing,
    Completed,
    Failed,
}

/// State of one chunked upload, owned by the engine for the duration of the call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub media_id: Option<MediaId>,
    pub category: MediaCategory,
    pub total_bytes: u64,
    pub chunk_size: u64,
    /// Bytes acknowledged by the platform
    pub offset: u64,
    pub segments_appended: u32,
    pub phase: SessionPhase,
    pub expires_at: Option<DateTime<Utc>>,
    pub outcome: Option<FinalizeOutcome>,
}

impl UploadSession {
    pub(crate) fn new(category: MediaCategory, total_bytes: u64, chunk_size: u64) -> Self {
        Self {
            media_id: None,
            category,
            total_bytes,
            chunk_size,
            offset: 0,
            segments_appended: 0,
            phase: SessionPhase::Init,
            expires_at: None,
            outcome: None,
        }
    }

    pub(crate) fn begin_append(
        &mut self,
        media_id: MediaId,
        chunk_size: u64,
        expires_at: Option<DateTime<Utc>>,
    ) {
        self.media_id = Some(media_id);
        self.chunk_size = chunk_size;
        self.expires_at = expires_at;
        self.phase = SessionPhase::Appending;
    }

    /// Index the next APPEND will carry
    pub fn next_segment_index(&self) -> u32 {
        self.segments_appended
    }

    pub(crate) fn record_append(&mut self, bytes: u64) {
        self.offset += bytes;
        self.segments_appended += 1;
    }

    pub(crate) fn begin_finalize(&mut self) {
        self.phase = SessionPhase::Finalizing;
    }

    pub(crate) fn complete(&mut self, outcome: FinalizeOutcome) {
        self.phase = SessionPhase::Completed;
        self.outcome = Some(outcome);
    }

    pub(crate) fn fail(&mut self) {
        self.phase = SessionPhase::Failed;
    }

    /// The media handle produced by FINALIZE
    pub fn media(&self) -> Option<&Media> {
        self.outcome.as_ref().map(FinalizeOutcome::media)
    }

    /// Consume the session, returning the finalized media handle
    pub fn into_media(self) -> MediaResult<Media> {
        match self.outcome {
            Some(outcome) => Ok(outcome.into_media()),
            None => Err(MediaError::invalid(format!(
                "Upload session is {:?}, not completed",
                self.phase
            ))),
        }
    }
}

/// Server-side processing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl ProcessingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Error detail attached to a failed processing state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessingError {
    pub code: Option<i64>,
    pub name: Option<String>,
    pub message: Option<String>,
}

impl std::fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.message, &self.name) {
            (Some(message), _) => f.write_str(message),
            (None, Some(name)) => f.write_str(name),
            (None, None) => write!(f, "unknown processing error (code {:?})", self.code),
        }
    }
}

/// One processing status snapshot. Replaced on every poll, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaProcessingInfo {
    pub media_id: MediaId,
    pub state: ProcessingState,
    pub progress_percent: Option<u8>,
    pub check_after_secs: Option<u64>,
    pub error: Option<ProcessingError>,
}

impl MediaProcessingInfo {
    /// Snapshot reporting successful processing
    pub fn succeeded(media_id: MediaId) -> Self {
        Self {
            media_id,
            state: ProcessingState::Succeeded,
            progress_percent: Some(100),
            check_after_secs: None,
            error: None,
        }
    }

    /// Snapshot for a media item whose state is not known yet
    pub fn pending(media_id: MediaId) -> Self {
        Self {
            media_id,
            state: ProcessingState::Pending,
            progress_percent: None,
            check_after_secs: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Server-suggested delay before the next poll
    pub fn check_after(&self) -> Option<Duration> {
        self.check_after_secs.map(Duration::from_secs)
    }

    /// Human-readable failure detail, present only in `Failed`
    pub fn failure_detail(&self) -> Option<String> {
        match self.state {
            ProcessingState::Failed => Some(
                self.error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "processing failed".to_string()),
            ),
            _ => None,
        }
    }
}

/// Image variant reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaImage {
    pub image_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Video variant reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaVideo {
    pub video_type: Option<String>,
}

/// Caller-visible media handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub id: MediaId,
    pub size: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Latest processing snapshot; `None` when the platform runs no async processing
    pub processing_info: Option<MediaProcessingInfo>,
    pub image: Option<MediaImage>,
    pub video: Option<MediaVideo>,
}

impl Media {
    /// Handle with no processing information
    pub fn new(id: MediaId) -> Self {
        Self {
            id,
            size: None,
            expires_at: None,
            processing_info: None,
            image: None,
            video: None,
        }
    }

    /// Handle for a known identifier whose processing state must be polled
    pub fn pending(id: MediaId) -> Self {
        let info = MediaProcessingInfo::pending(id.clone());
        Self::new(id).with_processing_info(info)
    }

    pub fn with_processing_info(mut self, info: MediaProcessingInfo) -> Self {
        self.processing_info = Some(info);
        self
    }

    pub fn processing_state(&self) -> Option<ProcessingState> {
        self.processing_info.as_ref().map(|info| info.state)
    }

    /// Usable in further operations without waiting
    pub fn is_ready(&self) -> bool {
        matches!(
            self.processing_state(),
            None | Some(ProcessingState::Succeeded)
        )
    }

    /// Take a newer snapshot, keeping fields the new one does not carry
    pub(crate) fn merge(mut self, newer: Media) -> Self {
        self.processing_info = newer.processing_info.or(self.processing_info);
        self.size = newer.size.or(self.size);
        self.expires_at = newer.expires_at.or(self.expires_at);
        self.image = newer.image.or(self.image);
        self.video = newer.video.or(self.video);
        self
    }
}

/// What FINALIZE reported about the uploaded media
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalizeOutcome {
    /// Usable right away (images, subtitles)
    ImmediatelyReady(Media),
    /// Server-side processing runs; the media carries the initial snapshot
    NeedsProcessing(Media),
}

impl FinalizeOutcome {
    pub(crate) fn from_media(media: Media) -> Self {
        if media.is_ready() {
            Self::ImmediatelyReady(media)
        } else {
            Self::NeedsProcessing(media)
        }
    }

    pub fn media(&self) -> &Media {
        match self {
            Self::ImmediatelyReady(media) | Self::NeedsProcessing(media) => media,
        }
    }

    pub fn into_media(self) -> Media {
        match self {
            Self::ImmediatelyReady(media) | Self::NeedsProcessing(media) => media,
        }
    }

    pub fn needs_processing(&self) -> bool {
        matches!(self, Self::NeedsProcessing(_))
    }
}

/// Longest alt text the platform accepts
pub const MAX_ALT_TEXT_CHARS: usize = 1000;

/// Metadata attached to uploaded media
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub alt_text: Option<String>,
}

impl MediaMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alt_text<S: Into<String>>(text: S) -> Self {
        Self {
            alt_text: Some(text.into()),
        }
    }

    pub fn validate(&self) -> MediaResult<()> {
        match &self.alt_text {
            None => Err(MediaError::invalid("Metadata has nothing to attach")),
            Some(text) if text.trim().is_empty() => {
                Err(MediaError::invalid("Alt text must not be empty"))
            }
            Some(text) if text.chars().count() > MAX_ALT_TEXT_CHARS => {
                Err(MediaError::invalid(format!(
                    "Alt text exceeds {} characters",
                    MAX_ALT_TEXT_CHARS
                )))
            }
            Some(_) => Ok(()),
        }
    }
}

/// Per-call options for waiting on processing
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    /// Upper bound on total wait time
    pub timeout: Option<Duration>,
    /// External abort signal, observed at every suspension point
    pub cancellation: Option<CancellationToken>,
    /// Overrides the configured poll floor for this call
    pub min_poll_interval: Option<Duration>,
}

impl WaitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = Some(interval);
        self
    }
}
