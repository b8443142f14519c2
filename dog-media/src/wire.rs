//! Command encoding and response shapes of the platform's media upload API.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
    FormField, Media, MediaCategory, MediaConfig, MediaError, MediaId, MediaImage,
    MediaMetadata, MediaProcessingInfo, MediaRequest, MediaResult, MediaVideo, ProcessingError,
    ProcessingState, RequestBody,
};

/// Multipart field carrying the raw chunk bytes of an APPEND
pub const MEDIA_FIELD: &str = "media";

pub const COMMAND_INIT: &str = "INIT";
pub const COMMAND_APPEND: &str = "APPEND";
pub const COMMAND_FINALIZE: &str = "FINALIZE";
pub const COMMAND_STATUS: &str = "STATUS";

pub fn init_request(
    config: &MediaConfig,
    total_bytes: u64,
    media_type: &str,
    category: MediaCategory,
    additional_owners: &[String],
) -> MediaRequest {
    let mut form = vec![
        ("command".to_string(), COMMAND_INIT.to_string()),
        ("total_bytes".to_string(), total_bytes.to_string()),
        ("media_type".to_string(), media_type.to_string()),
        ("media_category".to_string(), category.wire_name().to_string()),
    ];
    if !additional_owners.is_empty() {
        form.push(("additional_owners".to_string(), additional_owners.join(",")));
    }

    MediaRequest::post(config.upload_endpoint.clone(), RequestBody::Form(form))
}

pub fn append_request(
    config: &MediaConfig,
    media_id: &MediaId,
    segment_index: u32,
    chunk: Bytes,
) -> MediaRequest {
    MediaRequest::post(
        config.upload_endpoint.clone(),
        RequestBody::Multipart(vec![
            FormField::text("command", COMMAND_APPEND),
            FormField::text("media_id", media_id.as_str()),
            FormField::text("segment_index", segment_index.to_string()),
            FormField::bytes(MEDIA_FIELD, chunk),
        ]),
    )
}

pub fn finalize_request(config: &MediaConfig, media_id: &MediaId) -> MediaRequest {
    MediaRequest::post(
        config.upload_endpoint.clone(),
        RequestBody::Form(vec![
            ("command".to_string(), COMMAND_FINALIZE.to_string()),
            ("media_id".to_string(), media_id.to_string()),
        ]),
    )
}

pub fn status_request(config: &MediaConfig, media_id: &MediaId) -> MediaRequest {
    MediaRequest::get(config.upload_endpoint.clone())
        .with_query("command", COMMAND_STATUS)
        .with_query("media_id", media_id.as_str())
}

pub fn metadata_request(
    config: &MediaConfig,
    media_id: &MediaId,
    metadata: &MediaMetadata,
) -> MediaRequest {
    let mut body = serde_json::json!({ "media_id": media_id.as_str() });
    if let Some(text) = &metadata.alt_text {
        body["alt_text"] = serde_json::json!({ "text": text });
    }
    MediaRequest::post(config.metadata_endpoint.clone(), RequestBody::Json(body))
}

/// INIT response
#[derive(Debug, Clone, Deserialize)]
pub struct InitResponse {
    pub media_id: Option<u64>,
    pub media_id_string: Option<String>,
    pub expires_after_secs: Option<u64>,
    /// Platform chunk cap; absent when the platform uses the documented limit
    pub max_chunk_bytes: Option<u64>,
}

impl InitResponse {
    pub fn media_id(&self) -> MediaResult<MediaId> {
        resolve_media_id(self.media_id_string.as_deref(), self.media_id)
    }

    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        expires_at(self.expires_after_secs, now)
    }
}

/// FINALIZE and STATUS response
#[derive(Debug, Clone, Deserialize)]
pub struct MediaResponse {
    pub media_id: Option<u64>,
    pub media_id_string: Option<String>,
    pub size: Option<u64>,
    pub expires_after_secs: Option<u64>,
    pub processing_info: Option<ProcessingInfoBody>,
    pub image: Option<ImageBody>,
    pub video: Option<VideoBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingInfoBody {
    pub state: ProcessingState,
    /// Clamped to 100 when mapped
    pub progress_percent: Option<u64>,
    pub check_after_secs: Option<u64>,
    pub error: Option<ProcessingError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageBody {
    pub image_type: Option<String>,
    pub w: Option<u32>,
    pub h: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoBody {
    pub video_type: Option<String>,
}

impl MediaResponse {
    /// Build a media handle; `expected` is used when the body omits the identifier
    pub fn into_media(self, expected: &MediaId, now: DateTime<Utc>) -> MediaResult<Media> {
        let id = match resolve_media_id(self.media_id_string.as_deref(), self.media_id) {
            Ok(id) => id,
            Err(_) => expected.clone(),
        };
        if &id != expected {
            return Err(MediaError::protocol(format!(
                "Response for media {} carries media id {}",
                expected, id
            )));
        }

        let processing_info = self.processing_info.map(|info| MediaProcessingInfo {
            media_id: id.clone(),
            state: info.state,
            progress_percent: info.progress_percent.map(|p| p.min(100) as u8),
            check_after_secs: if info.state.is_terminal() {
                None
            } else {
                info.check_after_secs
            },
            error: info.error,
        });

        Ok(Media {
            size: self.size,
            expires_at: expires_at(self.expires_after_secs, now),
            processing_info,
            image: self.image.map(|image| MediaImage {
                image_type: image.image_type,
                width: image.w,
                height: image.h,
            }),
            video: self.video.map(|video| MediaVideo {
                video_type: video.video_type,
            }),
            id,
        })
    }
}

fn resolve_media_id(id_string: Option<&str>, id: Option<u64>) -> MediaResult<MediaId> {
    match (id_string, id) {
        (Some(s), _) if !s.is_empty() => Ok(MediaId::from(s)),
        (_, Some(n)) => Ok(MediaId::from(n.to_string())),
        _ => Err(MediaError::protocol("Response carries no media id")),
    }
}

/// `None` when the lifetime does not fit a timestamp
fn expires_at(secs: Option<u64>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs?).ok()?;
    now.checked_add_signed(chrono::Duration::try_seconds(secs)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> MediaId {
        MediaId::from("710511363345354753")
    }

    #[test]
    fn test_init_request_fields() {
        let config = MediaConfig::default();
        let request = init_request(
            &config,
            1_048_576,
            "video/mp4",
            MediaCategory::Video,
            &["123".to_string(), "456".to_string()],
        );

        assert_eq!(request.command(), Some("INIT"));
        assert_eq!(request.param("total_bytes"), Some("1048576"));
        assert_eq!(request.param("media_type"), Some("video/mp4"));
        assert_eq!(request.param("media_category"), Some("tweet_video"));
        assert_eq!(request.param("additional_owners"), Some("123,456"));
        assert_eq!(request.endpoint, config.upload_endpoint);
    }

    #[test]
    fn test_append_request_fields() {
        let request = append_request(
            &MediaConfig::default(),
            &id(),
            3,
            Bytes::from_static(b"chunk"),
        );
        assert_eq!(request.command(), Some("APPEND"));
        assert_eq!(request.param("media_id"), Some("710511363345354753"));
        assert_eq!(request.param("segment_index"), Some("3"));
        assert_eq!(request.binary(MEDIA_FIELD).map(|b| b.as_ref()), Some(&b"chunk"[..]));
    }

    #[test]
    fn test_status_request_is_get_with_query() {
        let request = status_request(&MediaConfig::default(), &id());
        assert_eq!(request.method, crate::HttpMethod::Get);
        assert_eq!(request.command(), Some("STATUS"));
        assert_eq!(request.param("media_id"), Some("710511363345354753"));
    }

    #[test]
    fn test_init_response_prefers_string_id() {
        let init: InitResponse = serde_json::from_str(
            r#"{"media_id": 710511363345354753, "media_id_string": "710511363345354753", "expires_after_secs": 86400}"#,
        )
        .unwrap();
        assert_eq!(init.media_id().unwrap(), id());
        assert!(init.max_chunk_bytes.is_none());

        let init: InitResponse = serde_json::from_str(r#"{"media_id": 17}"#).unwrap();
        assert_eq!(init.media_id().unwrap().as_str(), "17");

        let init: InitResponse = serde_json::from_str("{}").unwrap();
        assert!(init.media_id().is_err());
    }

    #[test]
    fn test_finalize_response_with_processing() {
        let response: MediaResponse = serde_json::from_str(
            r#"{
                "media_id_string": "710511363345354753",
                "size": 11065,
                "expires_after_secs": 86400,
                "video": {"video_type": "video/mp4"},
                "processing_info": {"state": "pending", "check_after_secs": 5}
            }"#,
        )
        .unwrap();

        let media = response.into_media(&id(), Utc::now()).unwrap();
        let info = media.processing_info.clone().unwrap();
        assert_eq!(info.state, ProcessingState::Pending);
        assert_eq!(info.check_after_secs, Some(5));
        assert_eq!(media.size, Some(11065));
        assert!(media.expires_at.is_some());
        assert!(!media.is_ready());
    }

    #[test]
    fn test_status_response_failed() {
        let response: MediaResponse = serde_json::from_str(
            r#"{
                "media_id_string": "710511363345354753",
                "processing_info": {
                    "state": "failed",
                    "progress_percent": 40,
                    "check_after_secs": 10,
                    "error": {"code": 1, "name": "InvalidMedia", "message": "unsupported format"}
                }
            }"#,
        )
        .unwrap();

        let info = response
            .into_media(&id(), Utc::now())
            .unwrap()
            .processing_info
            .unwrap();
        assert_eq!(info.state, ProcessingState::Failed);
        assert_eq!(info.check_after_secs, None);
        assert_eq!(info.failure_detail().as_deref(), Some("unsupported format"));
    }

    #[test]
    fn test_out_of_range_fields_are_tolerated() {
        let response: MediaResponse = serde_json::from_str(
            r#"{
                "media_id_string": "710511363345354753",
                "expires_after_secs": 100000000000000000,
                "processing_info": {"state": "in_progress", "progress_percent": 300}
            }"#,
        )
        .unwrap();

        let media = response.into_media(&id(), Utc::now()).unwrap();
        assert_eq!(media.expires_at, None);
        assert_eq!(media.processing_info.unwrap().progress_percent, Some(100));

        let init: InitResponse = serde_json::from_str(
            r#"{"media_id_string": "1", "expires_after_secs": 18446744073709551615}"#,
        )
        .unwrap();
        assert_eq!(init.expires_at(Utc::now()), None);
    }

    #[test]
    fn test_response_for_other_media_is_rejected() {
        let response: MediaResponse =
            serde_json::from_str(r#"{"media_id_string": "999"}"#).unwrap();
        assert!(matches!(
            response.into_media(&id(), Utc::now()),
            Err(MediaError::Protocol { .. })
        ));
    }

    #[test]
    fn test_unknown_state_fails_to_parse() {
        let parsed = serde_json::from_str::<MediaResponse>(
            r#"{"processing_info": {"state": "exploded"}}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_metadata_body() {
        let request = metadata_request(
            &MediaConfig::default(),
            &id(),
            &MediaMetadata::alt_text("a dog"),
        );
        match request.body {
            RequestBody::Json(body) => {
                assert_eq!(body["media_id"], "710511363345354753");
                assert_eq!(body["alt_text"]["text"], "a dog");
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }
}
