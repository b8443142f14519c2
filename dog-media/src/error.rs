use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{MediaId, UploadSession};

/// Result type for media operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Request that a media operation was performing when the platform answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadPhase {
    Init,
    Append { segment_index: u32 },
    Finalize,
    Metadata,
}

impl std::fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Append { segment_index } => write!(f, "APPEND (segment {})", segment_index),
            Self::Finalize => write!(f, "FINALIZE"),
            Self::Metadata => write!(f, "metadata"),
        }
    }
}

/// Errors surfaced by the upload engine, the status poller and the readiness coordinator
#[derive(Error, Debug)]
pub enum MediaError {
    /// Caller misuse, detected before any request is issued
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// Transport or HTTP-layer failure reported by the request executor
    #[error("Network failure: {message}")]
    NetworkFailure {
        message: String,
        status: Option<u16>,
        retry_after: Option<Duration>,
    },

    /// The platform declined a specific request of the upload handshake
    #[error("Server rejected {phase} (HTTP {status}): {detail}")]
    ServerRejected {
        phase: UploadPhase,
        status: u16,
        detail: String,
    },

    #[error("Media not found: {media_id}")]
    NotFound { media_id: MediaId },

    /// Terminal processing failure reported by the platform
    #[error("Processing of media {media_id} failed: {detail}")]
    ProcessingFailed { media_id: MediaId, detail: String },

    #[error("Timed out after {waited:?} waiting for media {media_id}")]
    Timeout { media_id: MediaId, waited: Duration },

    #[error("Wait for media {media_id} was cancelled")]
    Cancelled { media_id: MediaId },

    /// An APPEND failed for good; the session is `Failed` and records the offset reached
    #[error(
        "Upload aborted at byte {} of {}: {source}",
        .session.offset,
        .session.total_bytes
    )]
    AppendFailed {
        session: Box<UploadSession>,
        #[source]
        source: Box<MediaError>,
    },

    /// The platform answered with a body this crate cannot use
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

/// Failure reported by a [`RequestExecutor`](crate::RequestExecutor)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },
}

impl ExecutorError {
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn http<S: Into<String>>(status: u16, detail: S) -> Self {
        Self::Http {
            status,
            detail: detail.into(),
        }
    }
}

impl MediaError {
    /// Create an invalid parameter error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Map an executor failure during one upload request.
    ///
    /// Client errors (other than 429) mean the platform refused the request itself;
    /// everything else is a network-level failure the caller may retry.
    pub fn from_upload(phase: UploadPhase, error: ExecutorError) -> Self {
        match error {
            ExecutorError::Http { status, detail } if is_client_error(status) => {
                Self::ServerRejected {
                    phase,
                    status,
                    detail,
                }
            }
            other => Self::network(other),
        }
    }

    /// Map an executor failure during a status query
    pub fn from_status(media_id: &MediaId, error: ExecutorError) -> Self {
        match error {
            ExecutorError::Http { status: 404, .. } => Self::NotFound {
                media_id: media_id.clone(),
            },
            other => Self::network(other),
        }
    }

    /// Map an executor failure to `NetworkFailure` without interpretation
    pub fn network(error: ExecutorError) -> Self {
        match error {
            ExecutorError::Transport { message } => Self::NetworkFailure {
                message,
                status: None,
                retry_after: None,
            },
            ExecutorError::Http { status, detail } => Self::NetworkFailure {
                message: detail,
                status: Some(status),
                retry_after: None,
            },
            ExecutorError::RateLimited { retry_after } => Self::NetworkFailure {
                message: "rate limited".to_string(),
                status: Some(429),
                retry_after,
            },
        }
    }

    /// Whether repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkFailure { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            Self::AppendFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Server-suggested delay before retrying, if the failure carried one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::NetworkFailure { retry_after, .. } => *retry_after,
            Self::AppendFailed { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    /// The failed session when an append aborted the upload
    pub fn failed_session(&self) -> Option<&UploadSession> {
        match self {
            Self::AppendFailed { session, .. } => Some(session),
            _ => None,
        }
    }
}

fn is_client_error(status: u16) -> bool {
    (400..500).contains(&status) && status != 429
}
