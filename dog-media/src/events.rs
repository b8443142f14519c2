use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{MediaCategory, MediaId, ProcessingState};

/// Lifecycle events of uploads and processing waits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UploadEvent {
    /// INIT accepted; chunks follow
    Initialized {
        media_id: MediaId,
        category: MediaCategory,
        total_bytes: u64,
        chunk_size: u64,
        at: DateTime<Utc>,
    },

    /// One chunk acknowledged
    ChunkAppended {
        media_id: MediaId,
        segment_index: u32,
        bytes_sent: u64,
        total_bytes: u64,
        at: DateTime<Utc>,
    },

    /// FINALIZE accepted
    Finalized {
        media_id: MediaId,
        needs_processing: bool,
        at: DateTime<Utc>,
    },

    /// A status poll returned a non-terminal state
    ProcessingProgress {
        media_id: MediaId,
        state: ProcessingState,
        progress_percent: Option<u8>,
        at: DateTime<Utc>,
    },

    /// Media is usable
    Ready {
        media_id: MediaId,
        at: DateTime<Utc>,
    },

    /// Upload or processing ended in error
    Failed {
        media_id: Option<MediaId>,
        error: String,
        at: DateTime<Utc>,
    },
}

impl UploadEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Initialized { .. } => "initialized",
            Self::ChunkAppended { .. } => "chunk_appended",
            Self::Finalized { .. } => "finalized",
            Self::ProcessingProgress { .. } => "processing_progress",
            Self::Ready { .. } => "ready",
            Self::Failed { .. } => "failed",
        }
    }

    /// Media the event refers to, when one was assigned
    pub fn media_id(&self) -> Option<&MediaId> {
        match self {
            Self::Initialized { media_id, .. }
            | Self::ChunkAppended { media_id, .. }
            | Self::Finalized { media_id, .. }
            | Self::ProcessingProgress { media_id, .. }
            | Self::Ready { media_id, .. } => Some(media_id),
            Self::Failed { media_id, .. } => media_id.as_ref(),
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Initialized { at, .. }
            | Self::ChunkAppended { at, .. }
            | Self::Finalized { at, .. }
            | Self::ProcessingProgress { at, .. }
            | Self::Ready { at, .. }
            | Self::Failed { at, .. } => at,
        }
    }
}

/// Optional broadcast sender shared by the engine and the coordinator
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    sender: Option<broadcast::Sender<UploadEvent>>,
}

impl EventSink {
    pub(crate) fn new(sender: broadcast::Sender<UploadEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Send to current subscribers; dropped when nobody listens
    pub(crate) fn emit(&self, event: UploadEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}
