use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use crate::wire::{self, MediaResponse};
use crate::{
    Media, MediaConfig, MediaError, MediaId, MediaProcessingInfo, MediaResult, RequestExecutor,
};

/// Issues single STATUS queries against the processing endpoint.
///
/// One request per call, no looping and no retries of its own.
#[derive(Clone)]
pub struct ProcessingStatusPoller {
    executor: Arc<dyn RequestExecutor>,
    config: MediaConfig,
}

impl ProcessingStatusPoller {
    pub fn new(executor: Arc<dyn RequestExecutor>, config: MediaConfig) -> Self {
        Self { executor, config }
    }

    /// Current processing snapshot of a media item
    pub async fn status(&self, media_id: &MediaId) -> MediaResult<MediaProcessingInfo> {
        let media = self.fetch(media_id).await?;
        Ok(media
            .processing_info
            .unwrap_or_else(|| MediaProcessingInfo::succeeded(media_id.clone())))
    }

    /// Query the platform and fold the answer into a newer snapshot of `media`
    pub async fn refresh(&self, media: &Media) -> MediaResult<Media> {
        let latest = self.fetch(&media.id).await?;
        // An answer without processing info means ready, whatever the earlier snapshot said
        let info = latest
            .processing_info
            .clone()
            .unwrap_or_else(|| MediaProcessingInfo::succeeded(media.id.clone()));
        let mut refreshed = media.clone().merge(latest);
        refreshed.processing_info = Some(info);
        Ok(refreshed)
    }

    #[instrument(skip(self), fields(media_id = %media_id))]
    async fn fetch(&self, media_id: &MediaId) -> MediaResult<Media> {
        let request = wire::status_request(&self.config, media_id);
        let response = self
            .executor
            .execute(request)
            .await
            .map_err(|e| MediaError::from_status(media_id, e))?;

        let body: MediaResponse = response.json()?;
        let media = body.into_media(media_id, Utc::now())?;

        debug!(
            state = ?media.processing_state(),
            progress = ?media.processing_info.as_ref().and_then(|info| info.progress_percent),
            "Processing status received"
        );
        Ok(media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryExecutor, ScriptedStatus};
    use crate::{ExecutorError, MediaCategory, MediaUploadParameters, ProcessingState};

    async fn uploaded_video(executor: &Arc<MemoryExecutor>) -> Media {
        crate::ChunkUploadEngine::new(executor.clone(), MediaConfig::default())
            .upload(MediaUploadParameters::new(vec![0u8; 16], MediaCategory::Video))
            .await
            .unwrap()
            .into_media()
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_returns_snapshot() {
        let executor = Arc::new(MemoryExecutor::new());
        let media = uploaded_video(&executor).await;
        executor.push_status(ScriptedStatus::in_progress(40, 3));

        let poller = ProcessingStatusPoller::new(executor.clone(), MediaConfig::default());
        let info = poller.status(&media.id).await.unwrap();

        assert_eq!(info.state, ProcessingState::InProgress);
        assert_eq!(info.progress_percent, Some(40));
        assert_eq!(info.check_after_secs, Some(3));
        assert_eq!(executor.status_polls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_media_is_not_found() {
        let executor = Arc::new(MemoryExecutor::new());
        let poller = ProcessingStatusPoller::new(executor, MediaConfig::default());

        let err = poller.status(&MediaId::from("404")).await.unwrap_err();
        assert!(matches!(err, MediaError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_processing_failure() {
        let executor = Arc::new(MemoryExecutor::new());
        let media = uploaded_video(&executor).await;
        executor.fail_status(ExecutorError::transport("connection reset"));

        let poller = ProcessingStatusPoller::new(executor, MediaConfig::default());
        let err = poller.status(&media.id).await.unwrap_err();
        assert!(matches!(err, MediaError::NetworkFailure { .. }));
    }

    #[tokio::test]
    async fn test_refresh_keeps_earlier_fields() {
        let executor = Arc::new(MemoryExecutor::new());
        let media = uploaded_video(&executor).await;
        assert!(media.size.is_some());
        executor.push_status(ScriptedStatus::succeeded());

        let poller = ProcessingStatusPoller::new(executor, MediaConfig::default());
        let refreshed = poller.refresh(&media).await.unwrap();

        assert_eq!(refreshed.processing_state(), Some(ProcessingState::Succeeded));
        assert_eq!(refreshed.size, media.size);
        assert!(refreshed.video.is_some());
    }

    #[tokio::test]
    async fn test_refresh_without_processing_info_is_ready() {
        let executor = Arc::new(MemoryExecutor::new());
        let media = uploaded_video(&executor).await;
        executor.push_status_without_info();

        let pending = Media::pending(media.id.clone());
        assert_eq!(pending.processing_state(), Some(ProcessingState::Pending));

        let poller = ProcessingStatusPoller::new(executor.clone(), MediaConfig::default());
        let refreshed = poller.refresh(&pending).await.unwrap();

        assert_eq!(refreshed.processing_state(), Some(ProcessingState::Succeeded));
        assert!(refreshed.is_ready());
        assert_eq!(executor.status_polls(), 1);
    }
}
