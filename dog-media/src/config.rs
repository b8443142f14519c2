use std::time::Duration;

use crate::{MediaError, MediaResult};

/// Largest chunk the platform accepts in a single APPEND (5 MiB)
pub const PLATFORM_MAX_CHUNK_BYTES: u64 = 5 * 1024 * 1024;

/// Poll floor used when none is configured
pub const DEFAULT_MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Prefix for environment overrides, e.g. `DOG_MEDIA__MAX_CHUNK_BYTES`
pub const ENV_PREFIX: &str = "DOG_MEDIA__";

/// Configuration for media uploads and processing waits
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Endpoint receiving INIT / APPEND / FINALIZE / STATUS commands
    pub upload_endpoint: String,

    /// Endpoint receiving metadata (alt text) creation requests
    pub metadata_endpoint: String,

    /// Hard cap on the size of one appended chunk
    pub max_chunk_bytes: u64,

    /// Chunk size used when the caller does not request one
    pub default_chunk_bytes: u64,

    /// Floor for the delay between two status polls
    pub min_poll_interval: Duration,

    /// Wait budget applied when a wait call does not set its own timeout.
    /// `None` waits until the platform reaches a terminal state.
    pub wait_timeout: Option<Duration>,

    /// Buffer size of the upload event channel
    pub event_capacity: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            upload_endpoint: "/1.1/media/upload.json".to_string(),
            metadata_endpoint: "/1.1/media/metadata/create.json".to_string(),
            max_chunk_bytes: PLATFORM_MAX_CHUNK_BYTES,
            default_chunk_bytes: 2 * 1024 * 1024, // 2MB
            min_poll_interval: DEFAULT_MIN_POLL_INTERVAL,
            wait_timeout: None,
            event_capacity: 256,
        }
    }
}

impl MediaConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load defaults, then apply `DOG_MEDIA__*` environment overrides
    pub fn from_env() -> MediaResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Apply overrides from `(key, value)` pairs.
    ///
    /// Keys are matched after stripping [`ENV_PREFIX`] and lowercasing, so
    /// `DOG_MEDIA__MIN_POLL_INTERVAL_MS` sets `min_poll_interval`. Unknown keys are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> MediaResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let Some(stripped) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();

            match stripped.to_lowercase().as_str() {
                "upload_endpoint" => config.upload_endpoint = value.to_string(),
                "metadata_endpoint" => config.metadata_endpoint = value.to_string(),
                "max_chunk_bytes" => config.max_chunk_bytes = parse_number(stripped, value)?,
                "default_chunk_bytes" => {
                    config.default_chunk_bytes = parse_number(stripped, value)?
                }
                "min_poll_interval_ms" => {
                    config.min_poll_interval = Duration::from_millis(parse_number(stripped, value)?)
                }
                "wait_timeout_secs" => {
                    let secs = parse_number(stripped, value)?;
                    config.wait_timeout = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "event_capacity" => {
                    config.event_capacity = parse_number(stripped, value)? as usize
                }
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the upload command endpoint
    pub fn with_upload_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.upload_endpoint = endpoint.into();
        self
    }

    /// Set the metadata endpoint
    pub fn with_metadata_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.metadata_endpoint = endpoint.into();
        self
    }

    /// Set the chunk cap
    pub fn with_max_chunk_bytes(mut self, bytes: u64) -> Self {
        self.max_chunk_bytes = bytes;
        self
    }

    /// Set the default chunk size
    pub fn with_default_chunk_bytes(mut self, bytes: u64) -> Self {
        self.default_chunk_bytes = bytes;
        self
    }

    /// Set the poll floor
    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval;
        self
    }

    /// Set the default wait budget
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Set the event channel buffer size
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Delay floor between two status polls; a zero interval falls back to the default
    pub fn poll_floor(&self) -> Duration {
        if self.min_poll_interval.is_zero() {
            DEFAULT_MIN_POLL_INTERVAL
        } else {
            self.min_poll_interval
        }
    }

    /// Check the config for values the upload engine cannot work with
    pub fn validate(&self) -> MediaResult<()> {
        if self.max_chunk_bytes == 0 || self.max_chunk_bytes > PLATFORM_MAX_CHUNK_BYTES {
            return Err(MediaError::invalid(format!(
                "max_chunk_bytes must be 1-{} (got {})",
                PLATFORM_MAX_CHUNK_BYTES, self.max_chunk_bytes
            )));
        }
        if self.default_chunk_bytes == 0 || self.default_chunk_bytes > self.max_chunk_bytes {
            return Err(MediaError::invalid(format!(
                "default_chunk_bytes must be 1-{} (got {})",
                self.max_chunk_bytes, self.default_chunk_bytes
            )));
        }
        if self.min_poll_interval.is_zero() {
            return Err(MediaError::invalid("min_poll_interval must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(MediaError::invalid("event_capacity must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> MediaResult<u64> {
    value.parse::<u64>().map_err(|_| {
        MediaError::invalid(format!("{}{} is not a number: {:?}", ENV_PREFIX, key, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MediaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_chunk_bytes, 5 * 1024 * 1024);
        assert_eq!(config.min_poll_interval, Duration::from_secs(1));
        assert!(config.wait_timeout.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = MediaConfig::from_vars([
            ("DOG_MEDIA__DEFAULT_CHUNK_BYTES", "1048576"),
            ("DOG_MEDIA__MIN_POLL_INTERVAL_MS", "250"),
            ("DOG_MEDIA__WAIT_TIMEOUT_SECS", "600"),
            ("DOG_MEDIA__UPLOAD_ENDPOINT", "/2/media/upload"),
            ("UNRELATED", "ignored"),
        ])
        .unwrap();

        assert_eq!(config.default_chunk_bytes, 1024 * 1024);
        assert_eq!(config.min_poll_interval, Duration::from_millis(250));
        assert_eq!(config.wait_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.upload_endpoint, "/2/media/upload");
    }

    #[test]
    fn test_env_rejects_garbage() {
        let err = MediaConfig::from_vars([("DOG_MEDIA__MAX_CHUNK_BYTES", "lots")]).unwrap_err();
        assert!(matches!(err, MediaError::InvalidParameter { .. }));
    }

    #[test]
    fn test_chunk_cap_cannot_exceed_platform_limit() {
        let config = MediaConfig::new().with_max_chunk_bytes(PLATFORM_MAX_CHUNK_BYTES + 1);
        assert!(config.validate().is_err());

        let config = MediaConfig::new()
            .with_max_chunk_bytes(1024)
            .with_default_chunk_bytes(4096);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_floor_rejected() {
        let config = MediaConfig::new().with_min_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());
        assert_eq!(config.poll_floor(), DEFAULT_MIN_POLL_INTERVAL);

        let config = MediaConfig::new().with_min_poll_interval(Duration::from_millis(250));
        assert_eq!(config.poll_floor(), Duration::from_millis(250));
    }
}
