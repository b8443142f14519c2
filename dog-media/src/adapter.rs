use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::events::EventSink;
use crate::wire;
use crate::{
    ChunkUploadEngine, Media, MediaConfig, MediaError, MediaMetadata, MediaProcessingInfo,
    MediaResult, MediaUploadParameters, ProcessingStatusPoller, ReadinessCoordinator,
    RequestExecutor, RetryPolicy, UploadEvent, UploadPhase, UploadSession, WaitOptions,
};

/// The main media adapter - this is what application services embed.
///
/// Wires the upload engine, the status poller and the readiness coordinator to one
/// request executor and one event channel.
pub struct MediaAdapter {
    executor: Arc<dyn RequestExecutor>,
    uploads: ChunkUploadEngine,
    poller: ProcessingStatusPoller,
    readiness: ReadinessCoordinator,
    events: broadcast::Sender<UploadEvent>,
    config: MediaConfig,
}

impl MediaAdapter {
    /// Create a new media adapter
    pub fn new<E: RequestExecutor + 'static>(executor: E, config: MediaConfig) -> Self {
        Self::from_arc(Arc::new(executor), config)
    }

    /// Create from an executor that is shared with other components
    pub fn from_arc(executor: Arc<dyn RequestExecutor>, config: MediaConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let sink = EventSink::new(events.clone());

        let poller = ProcessingStatusPoller::new(executor.clone(), config.clone());
        let readiness =
            ReadinessCoordinator::new(poller.clone(), config.clone()).with_events(sink.clone());
        let uploads = ChunkUploadEngine::new(executor.clone(), config.clone()).with_events(sink);

        Self {
            executor,
            uploads,
            poller,
            readiness,
            events,
            config,
        }
    }

    /// Replace the chunk retry policy
    pub fn with_retry_policy<P: RetryPolicy + 'static>(mut self, policy: P) -> Self {
        self.uploads = self.uploads.with_retry_policy(Arc::new(policy));
        self
    }

    /// Receive lifecycle events of every upload and wait started after this call
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Upload a payload through INIT, APPEND and FINALIZE.
    ///
    /// The returned session is `Completed` and carries the finalize outcome.
    pub async fn upload_binary(&self, params: MediaUploadParameters) -> MediaResult<UploadSession> {
        self.uploads.upload(params).await
    }

    /// One status query for `media`
    pub async fn get_processing_status(&self, media: &Media) -> MediaResult<MediaProcessingInfo> {
        self.poller.status(&media.id).await
    }

    /// Wait until server-side processing of `media` ends
    pub async fn wait_for_processing_complete(
        &self,
        media: Media,
        options: WaitOptions,
    ) -> MediaResult<Media> {
        self.readiness.wait_until_ready(media, options).await
    }

    /// Upload, then wait until the media is usable
    #[instrument(skip(self, params, options), fields(category = %params.category))]
    pub async fn upload_and_wait(
        &self,
        params: MediaUploadParameters,
        options: WaitOptions,
    ) -> MediaResult<Media> {
        let media = self.upload_binary(params).await?.into_media()?;
        self.wait_for_processing_complete(media, options).await
    }

    /// Attach metadata (alt text) to uploaded media
    #[instrument(skip(self, media, metadata), fields(media_id = %media.id))]
    pub async fn add_media_metadata(
        &self,
        media: &Media,
        metadata: &MediaMetadata,
    ) -> MediaResult<()> {
        metadata.validate()?;

        let request = wire::metadata_request(&self.config, &media.id, metadata);
        self.executor
            .execute(request)
            .await
            .map_err(|e| MediaError::from_upload(UploadPhase::Metadata, e))?;

        info!("Metadata attached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryExecutor, ScriptedStatus};
    use crate::{MediaCategory, ProcessingState};

    fn adapter() -> (Arc<MemoryExecutor>, MediaAdapter) {
        let executor = Arc::new(MemoryExecutor::new());
        let adapter = MediaAdapter::from_arc(executor.clone(), MediaConfig::default());
        (executor, adapter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_and_wait_for_video() {
        let (executor, adapter) = adapter();
        executor.push_status(ScriptedStatus::in_progress(60, 2));
        executor.push_status(ScriptedStatus::succeeded());

        let params = MediaUploadParameters::new(vec![1u8; 100], MediaCategory::Video);
        let media = adapter.upload_and_wait(params, WaitOptions::new()).await.unwrap();

        assert_eq!(media.processing_state(), Some(ProcessingState::Succeeded));
        assert_eq!(media.size, Some(100));
        assert_eq!(executor.status_polls(), 2);
    }

    #[tokio::test]
    async fn test_get_processing_status() {
        let (executor, adapter) = adapter();
        let session = adapter
            .upload_binary(MediaUploadParameters::new(vec![1u8; 10], MediaCategory::Gif))
            .await
            .unwrap();
        let media = session.into_media().unwrap();
        executor.push_status(ScriptedStatus::in_progress(10, 4));

        let info = adapter.get_processing_status(&media).await.unwrap();
        assert_eq!(info.state, ProcessingState::InProgress);
        assert_eq!(info.media_id, media.id);
    }

    #[tokio::test]
    async fn test_add_media_metadata() {
        let (executor, adapter) = adapter();
        let media = adapter
            .upload_binary(MediaUploadParameters::new(vec![1u8; 10], MediaCategory::Image))
            .await
            .unwrap()
            .into_media()
            .unwrap();

        adapter
            .add_media_metadata(&media, &MediaMetadata::alt_text("A dog on a skateboard"))
            .await
            .unwrap();

        assert_eq!(
            executor.metadata(&media.id).unwrap().alt_text.as_deref(),
            Some("A dog on a skateboard")
        );
        assert_eq!(executor.commands().last().map(String::as_str), Some("METADATA"));
    }

    #[tokio::test]
    async fn test_oversized_alt_text_is_rejected_locally() {
        let (executor, adapter) = adapter();
        let media = Media::new("1".into());

        let err = adapter
            .add_media_metadata(&media, &MediaMetadata::alt_text("x".repeat(1001)))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidParameter { .. }));
        assert!(executor.requests().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_for_unknown_media_is_rejected() {
        let (_, adapter) = adapter();
        let err = adapter
            .add_media_metadata(&Media::new("77".into()), &MediaMetadata::alt_text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MediaError::ServerRejected {
                phase: UploadPhase::Metadata,
                status: 400,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_lifecycle() {
        let (_, adapter) = adapter();
        let mut events = adapter.subscribe();

        adapter
            .upload_and_wait(
                MediaUploadParameters::new(vec![1u8; 10], MediaCategory::Image),
                WaitOptions::new(),
            )
            .await
            .unwrap();

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.event_name());
        }
        assert_eq!(names, vec!["initialized", "chunk_appended", "finalized", "ready"]);
    }
}
