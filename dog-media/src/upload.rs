use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::StreamExt;
use tracing::{debug, error, info, instrument, warn};

use crate::events::EventSink;
use crate::wire::{self, InitResponse, MediaResponse};
use crate::{
    ByteStream, ExponentialBackoff, FinalizeOutcome, MediaConfig, MediaError, MediaId,
    MediaPayload, MediaResult, MediaUploadParameters, RequestExecutor, RetryPolicy, UploadEvent,
    UploadPhase, UploadSession,
};

/// Drives the INIT → APPEND(*) → FINALIZE handshake for one media item per call
#[derive(Clone)]
pub struct ChunkUploadEngine {
    executor: Arc<dyn RequestExecutor>,
    retry: Arc<dyn RetryPolicy>,
    config: MediaConfig,
    events: EventSink,
}

impl ChunkUploadEngine {
    pub fn new(executor: Arc<dyn RequestExecutor>, config: MediaConfig) -> Self {
        Self {
            executor,
            retry: Arc::new(ExponentialBackoff::default()),
            config,
            events: EventSink::default(),
        }
    }

    /// Set the policy applied to failed APPEND requests
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry = policy;
        self
    }

    pub(crate) fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Upload one media item.
    ///
    /// Chunks go out strictly in order, one request at a time. Parameter errors are
    /// reported before any request. An APPEND that fails for good returns
    /// [`MediaError::AppendFailed`] carrying the `Failed` session; FINALIZE is never sent.
    #[instrument(skip(self, params), fields(category = %params.category, total_bytes = params.total_bytes))]
    pub async fn upload(&self, params: MediaUploadParameters) -> MediaResult<UploadSession> {
        let requested_chunk = params.validate(&self.config)?;
        let MediaUploadParameters {
            payload,
            category,
            media_type,
            total_bytes,
            additional_owners,
            ..
        } = params;

        let mut session = UploadSession::new(category, total_bytes, requested_chunk);

        let init = match self
            .init(total_bytes, &media_type, category, &additional_owners)
            .await
        {
            Ok(init) => init,
            Err(e) => {
                session.fail();
                return Err(self.report_failure(None, e));
            }
        };
        let media_id = match init.media_id() {
            Ok(id) => id,
            Err(e) => {
                session.fail();
                return Err(self.report_failure(None, e));
            }
        };

        // The platform cap wins over whatever the caller asked for
        let chunk_size = match init.max_chunk_bytes {
            Some(cap) if cap > 0 => requested_chunk.min(cap),
            _ => requested_chunk,
        };
        session.begin_append(media_id.clone(), chunk_size, init.expires_at(Utc::now()));

        info!(media_id = %media_id, chunk_size, "Upload initialized");
        self.events.emit(UploadEvent::Initialized {
            media_id: media_id.clone(),
            category,
            total_bytes,
            chunk_size,
            at: Utc::now(),
        });

        let mut chunks = ChunkReader::new(payload, chunk_size, total_bytes);
        loop {
            let chunk = match chunks.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => return Err(self.abort(session, e)),
            };

            let segment_index = session.next_segment_index();
            let len = chunk.len() as u64;
            if let Err(e) = self.append(&media_id, segment_index, chunk).await {
                return Err(self.abort(session, e));
            }
            session.record_append(len);

            debug!(media_id = %media_id, segment_index, offset = session.offset, "Chunk appended");
            self.events.emit(UploadEvent::ChunkAppended {
                media_id: media_id.clone(),
                segment_index,
                bytes_sent: session.offset,
                total_bytes,
                at: Utc::now(),
            });
        }

        session.begin_finalize();
        let outcome = match self.finalize(&media_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                session.fail();
                return Err(self.report_failure(Some(media_id), e));
            }
        };

        info!(
            media_id = %media_id,
            segments = session.segments_appended,
            needs_processing = outcome.needs_processing(),
            "Upload finalized"
        );
        self.events.emit(UploadEvent::Finalized {
            media_id,
            needs_processing: outcome.needs_processing(),
            at: Utc::now(),
        });

        session.complete(outcome);
        Ok(session)
    }

    async fn init(
        &self,
        total_bytes: u64,
        media_type: &str,
        category: crate::MediaCategory,
        additional_owners: &[String],
    ) -> MediaResult<InitResponse> {
        let request = wire::init_request(
            &self.config,
            total_bytes,
            media_type,
            category,
            additional_owners,
        );
        let response = self
            .executor
            .execute(request)
            .await
            .map_err(|e| MediaError::from_upload(UploadPhase::Init, e))?;
        response.json()
    }

    /// Send one chunk, retrying according to the retry policy
    async fn append(&self, media_id: &MediaId, segment_index: u32, chunk: Bytes) -> MediaResult<()> {
        let mut attempt = 0u32;
        loop {
            let request = wire::append_request(&self.config, media_id, segment_index, chunk.clone());
            let error = match self.executor.execute(request).await {
                Ok(_) => return Ok(()),
                Err(e) => MediaError::from_upload(UploadPhase::Append { segment_index }, e),
            };

            attempt = attempt.saturating_add(1);
            match self.retry.retry_delay(attempt, &error) {
                Some(delay) => {
                    warn!(
                        media_id = %media_id,
                        segment_index,
                        attempt,
                        ?delay,
                        "Chunk append failed, will retry: {}",
                        error
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(error),
            }
        }
    }

    async fn finalize(&self, media_id: &MediaId) -> MediaResult<FinalizeOutcome> {
        let request = wire::finalize_request(&self.config, media_id);
        let response = self
            .executor
            .execute(request)
            .await
            .map_err(|e| MediaError::from_upload(UploadPhase::Finalize, e))?;
        let body: MediaResponse = response.json()?;
        let media = body.into_media(media_id, Utc::now())?;
        Ok(FinalizeOutcome::from_media(media))
    }

    /// Mark the session failed and wrap the cause
    fn abort(&self, mut session: UploadSession, cause: MediaError) -> MediaError {
        session.fail();
        error!(
            media_id = ?session.media_id,
            offset = session.offset,
            total_bytes = session.total_bytes,
            "Upload aborted: {}",
            cause
        );
        self.events.emit(UploadEvent::Failed {
            media_id: session.media_id.clone(),
            error: cause.to_string(),
            at: Utc::now(),
        });
        MediaError::AppendFailed {
            session: Box::new(session),
            source: Box::new(cause),
        }
    }

    fn report_failure(&self, media_id: Option<MediaId>, cause: MediaError) -> MediaError {
        error!(media_id = ?media_id, "Upload failed: {}", cause);
        self.events.emit(UploadEvent::Failed {
            media_id,
            error: cause.to_string(),
            at: Utc::now(),
        });
        cause
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }
}

/// Splits a payload into fixed-size chunks, checking it against the declared size
struct ChunkReader {
    source: ChunkSource,
    chunk_size: usize,
    declared: u64,
    offset: u64,
}

enum ChunkSource {
    Bytes(Bytes),
    Stream {
        stream: ByteStream,
        buffer: BytesMut,
        received: u64,
        exhausted: bool,
    },
}

impl ChunkReader {
    fn new(payload: MediaPayload, chunk_size: u64, declared: u64) -> Self {
        let source = match payload {
            MediaPayload::Bytes(bytes) => ChunkSource::Bytes(bytes),
            MediaPayload::Stream(stream) => ChunkSource::Stream {
                stream,
                buffer: BytesMut::new(),
                received: 0,
                exhausted: false,
            },
        };
        Self {
            source,
            chunk_size: chunk_size as usize,
            declared,
            offset: 0,
        }
    }

    /// Next chunk, or `None` once the whole declared size has been produced
    async fn next_chunk(&mut self) -> MediaResult<Option<Bytes>> {
        let chunk = match &mut self.source {
            ChunkSource::Bytes(bytes) => {
                let start = self.offset as usize;
                if start >= bytes.len() {
                    return Ok(None);
                }
                let end = (start + self.chunk_size).min(bytes.len());
                bytes.slice(start..end)
            }
            ChunkSource::Stream {
                stream,
                buffer,
                received,
                exhausted,
            } => {
                while buffer.len() < self.chunk_size && !*exhausted {
                    match stream.next().await {
                        Some(Ok(data)) => {
                            *received += data.len() as u64;
                            if *received > self.declared {
                                return Err(MediaError::invalid(format!(
                                    "Stream is longer than the declared size {}",
                                    self.declared
                                )));
                            }
                            buffer.extend_from_slice(&data);
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => *exhausted = true,
                    }
                }

                if buffer.is_empty() {
                    if *received != self.declared {
                        return Err(MediaError::invalid(format!(
                            "Stream ended after {} bytes, declared size is {}",
                            received, self.declared
                        )));
                    }
                    return Ok(None);
                }

                let take = buffer.len().min(self.chunk_size);
                buffer.split_to(take).freeze()
            }
        };

        self.offset += chunk.len() as u64;
        Ok(Some(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryExecutor;
    use crate::{ExecutorError, MediaCategory, NoRetry, SessionPhase};
    use futures::stream;

    fn engine(executor: Arc<MemoryExecutor>) -> ChunkUploadEngine {
        ChunkUploadEngine::new(executor, MediaConfig::default())
    }

    fn byte_stream(parts: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(stream::iter(
            parts
                .into_iter()
                .map(|p| Ok::<_, std::io::Error>(Bytes::from_static(p))),
        ))
    }

    #[tokio::test]
    async fn test_chunks_cover_payload_in_order() {
        let executor = Arc::new(MemoryExecutor::new());
        let data: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        let params = MediaUploadParameters::new(data.clone(), MediaCategory::Image)
            .with_chunk_size(100);

        let session = engine(executor.clone()).upload(params).await.unwrap();

        assert_eq!(session.phase, SessionPhase::Completed);
        assert_eq!(session.offset, 250);
        assert_eq!(session.segments_appended, 3);

        let media_id = session.media_id.clone().unwrap();
        let segments = executor.appended_segments(&media_id);
        assert_eq!(segments, vec![(0, 100), (1, 100), (2, 50)]);
        assert_eq!(executor.uploaded_bytes(&media_id).unwrap(), Bytes::from(data));
        assert_eq!(executor.commands(), vec!["INIT", "APPEND", "APPEND", "APPEND", "FINALIZE"]);
    }

    #[tokio::test]
    async fn test_platform_chunk_cap_is_honored() {
        let executor = Arc::new(MemoryExecutor::new().with_max_chunk_bytes(64));
        let params = MediaUploadParameters::new(vec![7u8; 200], MediaCategory::Video)
            .with_chunk_size(128);

        let session = engine(executor.clone()).upload(params).await.unwrap();
        assert_eq!(session.chunk_size, 64);

        let media_id = session.media_id.unwrap();
        assert!(executor
            .appended_segments(&media_id)
            .iter()
            .all(|(_, len)| *len <= 64));
    }

    #[tokio::test]
    async fn test_empty_payload_issues_no_request() {
        let executor = Arc::new(MemoryExecutor::new());
        let params = MediaUploadParameters::new(Vec::new(), MediaCategory::Image);

        let err = engine(executor.clone()).upload(params).await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidParameter { .. }));
        assert!(executor.requests().is_empty());
    }

    #[tokio::test]
    async fn test_config_above_platform_cap_is_rejected() {
        let executor = Arc::new(MemoryExecutor::new());
        let config = MediaConfig::default().with_max_chunk_bytes(20 * 1024 * 1024);
        let params = MediaUploadParameters::new(vec![1u8; 64], MediaCategory::Video)
            .with_chunk_size(12 * 1024 * 1024);

        let err = ChunkUploadEngine::new(executor.clone(), config)
            .upload(params)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidParameter { .. }));
        assert!(executor.requests().is_empty());
    }

    #[tokio::test]
    async fn test_zero_chunk_cap_is_rejected() {
        let executor = Arc::new(MemoryExecutor::new());
        let config = MediaConfig::default().with_max_chunk_bytes(0);
        let params = MediaUploadParameters::new(vec![1u8; 64], MediaCategory::Image);

        let err = ChunkUploadEngine::new(executor.clone(), config)
            .upload(params)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidParameter { .. }));
        assert!(executor.requests().is_empty());
    }

    #[derive(Debug)]
    struct RetryForever;

    impl RetryPolicy for RetryForever {
        fn retry_delay(&self, _attempt: u32, _error: &MediaError) -> Option<std::time::Duration> {
            Some(std::time::Duration::ZERO)
        }
    }

    #[tokio::test]
    async fn test_unbounded_policy_retries_until_success() {
        let executor = Arc::new(MemoryExecutor::new());
        executor.fail_append(0, 5, ExecutorError::http(503, "over capacity"));
        let params = MediaUploadParameters::new(vec![1u8; 8], MediaCategory::Image);

        let session = engine(executor.clone())
            .with_retry_policy(Arc::new(RetryForever))
            .upload(params)
            .await
            .unwrap();

        assert_eq!(session.phase, SessionPhase::Completed);
        let appends = executor.commands().iter().filter(|c| *c == "APPEND").count();
        assert_eq!(appends, 6);
    }

    #[tokio::test]
    async fn test_init_failure_sends_nothing_else() {
        let executor = Arc::new(MemoryExecutor::new());
        executor.fail_init(ExecutorError::http(400, "media type unrecognized"));
        let params = MediaUploadParameters::new(vec![1u8; 10], MediaCategory::Video);

        let err = engine(executor.clone()).upload(params).await.unwrap_err();
        assert!(matches!(
            err,
            MediaError::ServerRejected { phase: UploadPhase::Init, .. }
        ));
        assert_eq!(executor.commands(), vec!["INIT"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_retries_then_succeeds() {
        let executor = Arc::new(MemoryExecutor::new());
        executor.fail_append(1, 2, ExecutorError::http(503, "over capacity"));
        let params = MediaUploadParameters::new(vec![1u8; 30], MediaCategory::Gif)
            .with_chunk_size(10);

        let session = engine(executor.clone()).upload(params).await.unwrap();
        assert_eq!(session.phase, SessionPhase::Completed);
        assert_eq!(
            executor.commands(),
            vec!["INIT", "APPEND", "APPEND", "APPEND", "APPEND", "APPEND", "FINALIZE"]
        );
    }

    #[tokio::test]
    async fn test_append_exhaustion_reports_offset() {
        let executor = Arc::new(MemoryExecutor::new());
        executor.fail_append(2, u32::MAX, ExecutorError::transport("connection reset"));
        let params = MediaUploadParameters::new(vec![1u8; 50], MediaCategory::Video)
            .with_chunk_size(10);

        let err = engine(executor.clone())
            .with_retry_policy(Arc::new(NoRetry))
            .upload(params)
            .await
            .unwrap_err();

        let session = err.failed_session().expect("session attached");
        assert_eq!(session.phase, SessionPhase::Failed);
        assert_eq!(session.offset, 20);
        assert!(err.is_retryable());
        assert!(!executor.commands().contains(&"FINALIZE".to_string()));
    }

    #[tokio::test]
    async fn test_finalize_preserves_processing_hint() {
        let executor = Arc::new(MemoryExecutor::new());
        executor.finalize_processing(crate::memory::ScriptedStatus::pending(5));
        let params = MediaUploadParameters::new(vec![1u8; 10], MediaCategory::Video);

        let session = engine(executor).upload(params).await.unwrap();
        let outcome = session.outcome.clone().unwrap();
        assert!(outcome.needs_processing());
        let info = outcome.media().processing_info.clone().unwrap();
        assert_eq!(info.check_after_secs, Some(5));
    }

    #[tokio::test]
    async fn test_stream_payload_is_rechunked() {
        let executor = Arc::new(MemoryExecutor::new());
        let stream = byte_stream(vec![b"abc", b"defgh", b"ij"]);
        let params = MediaUploadParameters::from_stream(stream, MediaCategory::Video, 10)
            .with_chunk_size(4);

        let session = engine(executor.clone()).upload(params).await.unwrap();
        let media_id = session.media_id.unwrap();
        assert_eq!(executor.appended_segments(&media_id), vec![(0, 4), (1, 4), (2, 2)]);
        assert_eq!(
            executor.uploaded_bytes(&media_id).unwrap(),
            Bytes::from_static(b"abcdefghij")
        );
    }

    #[tokio::test]
    async fn test_short_stream_never_finalizes() {
        let executor = Arc::new(MemoryExecutor::new());
        let stream = byte_stream(vec![b"abc"]);
        let params = MediaUploadParameters::from_stream(stream, MediaCategory::Video, 10)
            .with_chunk_size(4);

        let err = engine(executor.clone()).upload(params).await.unwrap_err();
        match err {
            MediaError::AppendFailed { source, session } => {
                assert!(matches!(*source, MediaError::InvalidParameter { .. }));
                assert_eq!(session.offset, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!executor.commands().contains(&"FINALIZE".to_string()));
    }

    #[tokio::test]
    async fn test_long_stream_never_finalizes() {
        let executor = Arc::new(MemoryExecutor::new());
        let stream = byte_stream(vec![b"abcd", b"efgh"]);
        let params = MediaUploadParameters::from_stream(stream, MediaCategory::Video, 4)
            .with_chunk_size(4);

        let err = engine(executor.clone()).upload(params).await.unwrap_err();
        assert!(matches!(err, MediaError::AppendFailed { .. }));
        assert!(!executor.commands().contains(&"FINALIZE".to_string()));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_upload_is_logged() {
        let executor = Arc::new(MemoryExecutor::new());
        let params = MediaUploadParameters::new(vec![1u8; 8], MediaCategory::Image);

        engine(executor).upload(params).await.unwrap();

        assert!(logs_contain("Upload initialized"));
        assert!(logs_contain("Upload finalized"));
    }
}
