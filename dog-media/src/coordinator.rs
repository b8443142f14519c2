use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument, Span};

use crate::events::EventSink;
use crate::{
    ExecutorError, Media, MediaConfig, MediaError, MediaId, MediaResult, ProcessingState,
    ProcessingStatusPoller, UploadEvent, WaitOptions,
};

/// Waits until uploaded media reaches a terminal processing state.
///
/// Poll cadence follows the platform's check-after hints, never faster than the
/// configured floor. Waits suspend on the runtime rather than blocking a thread.
#[derive(Clone)]
pub struct ReadinessCoordinator {
    poller: ProcessingStatusPoller,
    config: MediaConfig,
    events: EventSink,
}

/// Where one wait stands
#[derive(Debug)]
enum WaitState {
    Done(Media),
    Waiting { media: Media, delay: Duration },
    Failed { media_id: MediaId, detail: String },
}

impl WaitState {
    fn from_media(media: Media, floor: Duration) -> Self {
        let Some(info) = &media.processing_info else {
            return Self::Done(media);
        };

        match info.state {
            ProcessingState::Succeeded => Self::Done(media),
            ProcessingState::Failed => Self::Failed {
                detail: info
                    .failure_detail()
                    .unwrap_or_else(|| "processing failed".to_string()),
                media_id: media.id,
            },
            ProcessingState::Pending | ProcessingState::InProgress => {
                let delay = info.check_after().map_or(floor, |hint| hint.max(floor));
                Self::Waiting { media, delay }
            }
        }
    }
}

/// Why a wait stopped before the next poll
enum Interrupt {
    Cancelled,
    TimedOut,
}

impl ReadinessCoordinator {
    pub fn new(poller: ProcessingStatusPoller, config: MediaConfig) -> Self {
        Self {
            poller,
            config,
            events: EventSink::default(),
        }
    }

    pub(crate) fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Wait until `media` is usable, returning the final snapshot.
    ///
    /// Returns immediately when the snapshot is already terminal or carries no
    /// processing information. Cancellation and the deadline are observed during
    /// sleeps and during polls, cancellation first. A poll still in flight when either
    /// fires runs to completion in the background and its result is discarded.
    #[instrument(skip(self, media, options), fields(media_id = %media.id))]
    pub async fn wait_until_ready(&self, media: Media, options: WaitOptions) -> MediaResult<Media> {
        let started = Instant::now();
        let media_id = media.id.clone();
        let deadline = options
            .timeout
            .or(self.config.wait_timeout)
            .map(|timeout| started + timeout);
        let floor = options
            .min_poll_interval
            .filter(|interval| !interval.is_zero())
            .unwrap_or_else(|| self.config.poll_floor());
        let cancellation = options.cancellation.unwrap_or_default();

        let mut state = WaitState::from_media(media, floor);
        let mut polls = 0u32;

        loop {
            let (media, delay) = match state {
                WaitState::Done(media) => {
                    info!(polls, elapsed = ?started.elapsed(), "Media ready");
                    self.events.emit(UploadEvent::Ready {
                        media_id: media.id.clone(),
                        at: Utc::now(),
                    });
                    return Ok(media);
                }
                WaitState::Failed { media_id, detail } => {
                    warn!(polls, "Media processing failed: {}", detail);
                    return Err(self.fail(MediaError::ProcessingFailed { media_id, detail }));
                }
                WaitState::Waiting { media, delay } => (media, delay),
            };

            if let Some(interrupt) = sleep_or_interrupt(delay, deadline, &cancellation).await {
                return Err(self.interrupted(interrupt, media_id, started));
            }

            debug!(?delay, poll = polls + 1, "Polling processing status");
            let poller = self.poller.clone();
            let poll = tokio::spawn(
                async move { poller.refresh(&media).await }.instrument(Span::current()),
            );
            polls += 1;

            let polled = tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    return Err(self.interrupted(Interrupt::Cancelled, media_id, started));
                }
                _ = deadline_reached(deadline) => {
                    return Err(self.interrupted(Interrupt::TimedOut, media_id, started));
                }
                joined = poll => joined,
            };

            if cancellation.is_cancelled() {
                return Err(self.interrupted(Interrupt::Cancelled, media_id, started));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(self.interrupted(Interrupt::TimedOut, media_id, started));
            }

            let media = match polled {
                Ok(Ok(media)) => media,
                Ok(Err(e)) => return Err(self.fail(e)),
                Err(e) => {
                    let error = ExecutorError::transport(format!("Status poll aborted: {}", e));
                    return Err(self.fail(MediaError::network(error)));
                }
            };

            if let Some(info) = &media.processing_info {
                if !info.is_terminal() {
                    self.events.emit(UploadEvent::ProcessingProgress {
                        media_id: media.id.clone(),
                        state: info.state,
                        progress_percent: info.progress_percent,
                        at: Utc::now(),
                    });
                }
            }

            state = WaitState::from_media(media, floor);
        }
    }

    fn interrupted(&self, interrupt: Interrupt, media_id: MediaId, started: Instant) -> MediaError {
        let error = match interrupt {
            Interrupt::Cancelled => {
                info!("Wait cancelled");
                MediaError::Cancelled { media_id }
            }
            Interrupt::TimedOut => {
                warn!(waited = ?started.elapsed(), "Wait timed out");
                MediaError::Timeout {
                    media_id,
                    waited: started.elapsed(),
                }
            }
        };
        self.fail(error)
    }

    fn fail(&self, error: MediaError) -> MediaError {
        let media_id = match &error {
            MediaError::ProcessingFailed { media_id, .. }
            | MediaError::Timeout { media_id, .. }
            | MediaError::Cancelled { media_id }
            | MediaError::NotFound { media_id } => Some(media_id.clone()),
            _ => None,
        };
        self.events.emit(UploadEvent::Failed {
            media_id,
            error: error.to_string(),
            at: Utc::now(),
        });
        error
    }
}

/// Resolves at the deadline, never when there is none
async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Sleep for `delay`, stopping early on cancellation or when the deadline passes
async fn sleep_or_interrupt(
    delay: Duration,
    deadline: Option<Instant>,
    cancellation: &CancellationToken,
) -> Option<Interrupt> {
    if cancellation.is_cancelled() {
        return Some(Interrupt::Cancelled);
    }

    let wake = Instant::now() + delay;
    let (until, times_out) = match deadline {
        Some(deadline) if deadline <= wake => (deadline, true),
        _ => (wake, false),
    };

    tokio::select! {
        biased;
        _ = cancellation.cancelled() => Some(Interrupt::Cancelled),
        _ = tokio::time::sleep_until(until) => {
            if cancellation.is_cancelled() {
                Some(Interrupt::Cancelled)
            } else if times_out {
                Some(Interrupt::TimedOut)
            } else {
                None
            }
        }
    }
}
