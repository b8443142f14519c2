//! reqwest-backed [`RequestExecutor`] for a live media platform.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};

use crate::{
    ExecutorError, ExecutorResponse, FormField, HttpMethod, MediaError, MediaRequest, MediaResult,
    RequestBody, RequestExecutor,
};

/// Base URL used when `DOG_MEDIA_API_URL` is not set
pub const DEFAULT_API_URL: &str = "https://upload.twitter.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Authentication strategy for the platform API.
#[derive(Clone)]
pub enum Auth {
    /// `Authorization: Bearer {token}`
    Bearer(String),
    /// `X-API-Key: {key}`
    XApiKey(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer(..)"),
            Self::XApiKey(_) => f.write_str("XApiKey(..)"),
        }
    }
}

/// Sends media requests over HTTP with a configurable auth header
#[derive(Clone, Debug)]
pub struct HttpExecutor {
    client: Client,
    base_url: String,
    auth: Auth,
}

impl HttpExecutor {
    pub fn new<S: Into<String>>(base_url: S, auth: Auth) -> MediaResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MediaError::invalid(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client, base_url, auth))
    }

    /// Reuse an existing client (connection pool, proxies, TLS settings)
    pub fn with_client<S: Into<String>>(client: Client, base_url: S, auth: Auth) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    /// Create from environment: `DOG_MEDIA_API_URL` and `DOG_MEDIA_TOKEN` (Bearer auth)
    pub fn from_env() -> MediaResult<Self> {
        let base_url =
            std::env::var("DOG_MEDIA_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let token = std::env::var("DOG_MEDIA_TOKEN")
            .map_err(|_| MediaError::invalid("Missing token. Set DOG_MEDIA_TOKEN"))?;

        Self::new(base_url, Auth::Bearer(token))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute endpoints are used as given, paths are joined to the base URL
    pub fn build_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::XApiKey(key) => request.header("X-API-Key", key.as_str()),
        }
    }

    fn build(&self, request: MediaRequest) -> reqwest::RequestBuilder {
        let url = self.build_url(&request.endpoint);
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(fields) => {
                let form = fields
                    .into_iter()
                    .fold(reqwest::multipart::Form::new(), |form, field| match field {
                        FormField::Text { name, value } => form.text(name, value),
                        FormField::Bytes { name, data } => {
                            form.part(name, reqwest::multipart::Part::stream(data))
                        }
                    });
                builder.multipart(form)
            }
        };

        self.apply_auth(builder)
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, request: MediaRequest) -> Result<ExecutorResponse, ExecutorError> {
        let method = request.method;
        let command = request.command().map(str::to_string);
        let response = self
            .build(request)
            .send()
            .await
            .map_err(|e| ExecutorError::transport(format!("Failed to send request: {}", e)))?;

        let status = response.status();
        debug!(?method, ?command, status = status.as_u16(), "Media request completed");

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers().get(header::RETRY_AFTER));
            warn!(?command, ?retry_after, "Rate limited by media platform");
            return Err(ExecutorError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ExecutorError::http(status.as_u16(), detail));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ExecutorError::transport(format!("Failed to read response: {}", e)))?;
        Ok(ExecutorResponse::new(status.as_u16(), body))
    }
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored
fn parse_retry_after(value: Option<&header::HeaderValue>) -> Option<Duration> {
    value?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
