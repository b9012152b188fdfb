//! Client for the external blob store holding payable documents.
//!
//! The store is a black box: `POST {base}/media` with a multipart `file`
//! returns `{"id": ...}`, `GET {base}/media/{id}` streams the bytes back.
//! Records only keep the opaque reference `media:<id>`.

use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::config;

const REFERENCE_PREFIX: &str = "media:";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Document storage is not configured")]
    NotConfigured,

    #[error("Document {0} not found")]
    NotFound(String),

    #[error("Document exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("blob store timed out")]
    Timeout,

    #[error("blob store unreachable: {0}")]
    Unreachable(String),

    #[error("blob store returned status {0}")]
    Status(u16),

    #[error("blob store returned a malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for MediaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            MediaError::Timeout
        } else if err.is_decode() {
            MediaError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            MediaError::Status(status.as_u16())
        } else {
            MediaError::Unreachable(err.to_string())
        }
    }
}

/// `media:<id>`
pub fn media_reference(id: &str) -> String {
    format!("{}{}", REFERENCE_PREFIX, id)
}

/// The blob id inside a stored reference, if it is one
pub fn parse_media_reference(reference: &str) -> Option<&str> {
    reference
        .trim()
        .strip_prefix(REFERENCE_PREFIX)
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

/// A downloaded blob, streamed
pub struct MediaObject {
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, MediaError>>,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Upload bytes and return the store's opaque id
    async fn upload(
        &self,
        filename: &str,
        content_type: Option<&str>,
        data: Bytes,
    ) -> Result<String, MediaError>;

    async fn download(&self, id: &str) -> Result<MediaObject, MediaError>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: serde_json::Value,
}

/// reqwest-backed [`MediaStore`]
#[derive(Debug, Clone)]
pub struct HttpMediaStore {
    client: reqwest::Client,
    base_url: String,
    max_upload_bytes: usize,
}

impl HttpMediaStore {
    pub fn new(base_url: &str, timeout: Duration, max_upload_bytes: usize) -> Result<Self, MediaError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MediaError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_upload_bytes,
        })
    }

    pub fn from_config() -> Result<Self, MediaError> {
        let storage = &config().storage;
        if storage.media_base_url.trim().is_empty() {
            return Err(MediaError::NotConfigured);
        }
        Self::new(
            &storage.media_base_url,
            Duration::from_secs(storage.timeout_secs),
            storage.max_upload_bytes,
        )
    }
}

#[async_trait]
impl MediaStore for HttpMediaStore {
    async fn upload(
        &self,
        filename: &str,
        content_type: Option<&str>,
        data: Bytes,
    ) -> Result<String, MediaError> {
        if data.len() > self.max_upload_bytes {
            return Err(MediaError::TooLarge {
                limit: self.max_upload_bytes,
            });
        }

        let size = data.len();
        let mut part = reqwest::multipart::Part::stream(data).file_name(filename.to_string());
        if let Some(mime) = content_type {
            part = part
                .mime_str(mime)
                .map_err(|e| MediaError::Malformed(e.to_string()))?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/media", self.base_url))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MediaError::Status(response.status().as_u16()));
        }

        let body: UploadResponse = response.json().await?;
        let id = match body.id {
            serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            other => return Err(MediaError::Malformed(format!("unexpected id {}", other))),
        };

        info!("Uploaded {} ({} bytes) as media {}", filename, size, id);
        Ok(id)
    }

    async fn download(&self, id: &str) -> Result<MediaObject, MediaError> {
        let response = self
            .client
            .get(format!("{}/media/{}", self.base_url, id))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MediaError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(MediaError::Status(status.as_u16()));
        }

        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let content_disposition = header(reqwest::header::CONTENT_DISPOSITION);
        let content_length = response.content_length();

        let body = response.bytes_stream().map_err(MediaError::from).boxed();
        Ok(MediaObject {
            content_type,
            content_disposition,
            content_length,
            body,
        })
    }
}

/// Stand-in used when no blob store is configured; every call fails with
/// [`MediaError::NotConfigured`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledMediaStore;

#[async_trait]
impl MediaStore for DisabledMediaStore {
    async fn upload(&self, _: &str, _: Option<&str>, _: Bytes) -> Result<String, MediaError> {
        Err(MediaError::NotConfigured)
    }

    async fn download(&self, _: &str) -> Result<MediaObject, MediaError> {
        Err(MediaError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_round_trip_through_the_prefix() {
        assert_eq!(media_reference("abc123"), "media:abc123");
        assert_eq!(parse_media_reference("media:abc123"), Some("abc123"));
        assert_eq!(parse_media_reference(" media: 42 "), Some("42"));
        assert_eq!(parse_media_reference("media:"), None);
        assert_eq!(parse_media_reference("https://example.com/file.pdf"), None);
    }

    #[tokio::test]
    async fn disabled_store_reports_not_configured() {
        let store = DisabledMediaStore;
        assert!(matches!(
            store.upload("a.pdf", None, Bytes::from_static(b"x")).await,
            Err(MediaError::NotConfigured)
        ));
        assert!(matches!(store.download("1").await, Err(MediaError::NotConfigured)));
    }
}
