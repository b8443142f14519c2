use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::{ExecutorError, MediaResult};

/// HTTP method of a platform request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One field of a multipart form
#[derive(Debug, Clone)]
pub enum FormField {
    Text { name: String, value: String },
    Bytes { name: String, data: Bytes },
}

impl FormField {
    pub fn text<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn bytes<N: Into<String>>(name: N, data: Bytes) -> Self {
        Self::Bytes {
            name: name.into(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::Bytes { name, .. } => name,
        }
    }
}

/// Request body
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// `multipart/form-data`
    Multipart(Vec<FormField>),
    Json(serde_json::Value),
}

/// A platform request, handed to the executor for signing and dispatch
#[derive(Debug, Clone)]
pub struct MediaRequest {
    pub method: HttpMethod,
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl MediaRequest {
    pub fn get<S: Into<String>>(endpoint: S) -> Self {
        Self {
            method: HttpMethod::Get,
            endpoint: endpoint.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post<S: Into<String>>(endpoint: S, body: RequestBody) -> Self {
        Self {
            method: HttpMethod::Post,
            endpoint: endpoint.into(),
            query: Vec::new(),
            body,
        }
    }

    pub fn with_query<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Look up a text parameter in the query string or the form body
    pub fn param(&self, name: &str) -> Option<&str> {
        let from_query = self
            .query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str());
        if from_query.is_some() {
            return from_query;
        }

        match &self.body {
            RequestBody::Form(pairs) => pairs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            RequestBody::Multipart(fields) => fields.iter().find_map(|field| match field {
                FormField::Text { name: key, value } if key == name => Some(value.as_str()),
                _ => None,
            }),
            RequestBody::Empty | RequestBody::Json(_) => None,
        }
    }

    /// The `command` parameter of an upload request
    pub fn command(&self) -> Option<&str> {
        self.param("command")
    }

    /// Binary field of a multipart body
    pub fn binary(&self, name: &str) -> Option<&Bytes> {
        match &self.body {
            RequestBody::Multipart(fields) => fields.iter().find_map(|field| match field {
                FormField::Bytes { name: key, data } if key == name => Some(data),
                _ => None,
            }),
            _ => None,
        }
    }
}

/// Successful (2xx) response from the executor
#[derive(Debug, Clone)]
pub struct ExecutorResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ExecutorResponse {
    pub fn new(status: u16, body: Bytes) -> Self {
        Self { status, body }
    }

    /// Deserialize the JSON body
    pub fn json<T: DeserializeOwned>(&self) -> MediaResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Issues authenticated requests against the platform.
///
/// Implementations own signing, rate-limit bookkeeping and transport retries.
/// Non-2xx answers must come back as `Err`, never as `Ok` with an error status.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: MediaRequest) -> Result<ExecutorResponse, ExecutorError>;
}

#[async_trait]
impl<T: RequestExecutor + ?Sized> RequestExecutor for Arc<T> {
    async fn execute(&self, request: MediaRequest) -> Result<ExecutorResponse, ExecutorError> {
        (**self).execute(request).await
    }
}
