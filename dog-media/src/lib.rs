//! # dog-media: Chunked media upload and processing coordination
//!
//! `dog-media` uploads images, GIFs, videos and subtitles to a media platform through the
//! INIT / APPEND / FINALIZE command handshake, then waits for server-side processing to
//! finish while following the platform's check-after hints.
//!
//! ## Key Features
//!
//! - **Ordered chunked uploads**: payloads (in-memory or streamed) are split into bounded
//!   chunks and appended strictly in order, with a pluggable retry policy per chunk
//! - **Server-directed waits**: the readiness coordinator sleeps exactly as long as the
//!   platform asks, never below a configured floor, and never blocks a thread
//! - **Cancellation and timeouts**: every wait observes a `CancellationToken` and an
//!   optional budget, reported as distinct errors
//! - **Executor agnostic**: authentication, signing and transport live behind the
//!   [`RequestExecutor`] trait; [`HttpExecutor`] and [`MemoryExecutor`] are provided
//! - **Progress events**: subscribe to [`UploadEvent`]s for UI or job bookkeeping
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_media::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> MediaResult<()> {
//! // 1. Create the adapter over an executor (HttpExecutor::from_env() in production)
//! let adapter = MediaAdapter::new(MemoryExecutor::new(), MediaConfig::default());
//!
//! // 2. Upload and wait until the platform has processed the video
//! let params = MediaUploadParameters::new(vec![0u8; 4096], MediaCategory::Video);
//! let media = adapter.upload_and_wait(params, WaitOptions::new()).await?;
//!
//! // 3. Describe it
//! adapter
//!     .add_media_metadata(&media, &MediaMetadata::alt_text("Puppy chasing a ball"))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │     MediaAdapter     │  ← entry points, event channel
//! ├──────────┬───────────┤
//! │  Upload  │ Readiness │  ← handshake / wait state machine
//! │  Engine  │Coordinator│
//! │          ├───────────┤
//! │          │  Poller   │  ← one STATUS query per call
//! ├──────────┴───────────┤
//! │   RequestExecutor    │  ← auth, transport, rate limits
//! └──────────────────────┘
//! ```

pub mod adapter;
mod config;
mod coordinator;
mod error;
pub mod events;
mod executor;
pub mod http;
pub mod memory;
mod retry;
mod status;
mod types;
mod upload;
pub mod wire;

// Re-export main types for clean API
pub use adapter::MediaAdapter;
pub use config::{MediaConfig, DEFAULT_MIN_POLL_INTERVAL, ENV_PREFIX, PLATFORM_MAX_CHUNK_BYTES};
pub use coordinator::ReadinessCoordinator;
pub use error::{ExecutorError, MediaError, MediaResult, UploadPhase};
pub use events::UploadEvent;
pub use executor::{
    ExecutorResponse, FormField, HttpMethod, MediaRequest, RequestBody, RequestExecutor,
};
pub use http::{Auth, HttpExecutor};
pub use memory::{MemoryExecutor, ScriptedStatus};
pub use retry::{ExponentialBackoff, NoRetry, RetryPolicy};
pub use status::ProcessingStatusPoller;
pub use types::{
    ByteStream, FinalizeOutcome, Media, MediaCategory, MediaId, MediaImage, MediaMetadata,
    MediaPayload, MediaProcessingInfo, MediaUploadParameters, MediaVideo, ProcessingError,
    ProcessingState, SessionPhase, UploadSession, WaitOptions, MAX_ALT_TEXT_CHARS,
};
pub use upload::ChunkUploadEngine;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        HttpExecutor, Media, MediaAdapter, MediaCategory, MediaConfig, MediaError, MediaId,
        MediaMetadata, MediaResult, MediaUploadParameters, MemoryExecutor, ProcessingState,
        RequestExecutor, UploadEvent, UploadSession, WaitOptions,
    };
}
