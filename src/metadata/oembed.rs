//! YouTube oEmbed metadata lookup.

use super::{watch_url, MetadataLookup, VideoMetadata};
use crate::config::MetadataSettings;
use crate::error::{JottaError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Metadata lookup backed by the public oEmbed endpoint.
pub struct OEmbedLookup {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: String,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

impl OEmbedLookup {
    pub fn new(settings: &MetadataSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.oembed_url.clone(),
        })
    }

    fn request_url(&self, subject_ref: &str) -> Result<url::Url> {
        url::Url::parse_with_params(
            &self.endpoint,
            &[("url", watch_url(subject_ref).as_str()), ("format", "json")],
        )
        .map_err(|e| JottaError::Config(format!("Invalid oEmbed URL '{}': {}", self.endpoint, e)))
    }
}

/// Map an oEmbed status code to an error, or `None` on success.
fn status_error(subject_ref: &str, status: StatusCode) -> Option<JottaError> {
    if status.is_success() {
        return None;
    }

    match status {
        // oEmbed answers 400/404 for unknown ids and 401/403 for private or
        // embedding-disabled videos.
        StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND
        | StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN => Some(JottaError::MediaNotFound(format!(
            "Video {} not found or unavailable (HTTP {})",
            subject_ref,
            status.as_u16()
        ))),
        _ => Some(JottaError::Upstream {
            service: "oembed".to_string(),
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or_default().to_string(),
        }),
    }
}

#[async_trait]
impl MetadataLookup for OEmbedLookup {
    #[instrument(skip(self))]
    async fn lookup(&self, subject_ref: &str) -> Result<VideoMetadata> {
        let url = self.request_url(subject_ref)?;
        let response = self.client.get(url).send().await?;

        if let Some(err) = status_error(subject_ref, response.status()) {
            return Err(err);
        }

        let body: OEmbedResponse = response.json().await?;
        debug!("Fetched video details: {}", body.title);

        Ok(VideoMetadata {
            title: body.title,
            thumbnail: body.thumbnail_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_request_url() {
        let lookup = OEmbedLookup::new(&MetadataSettings::default()).unwrap();
        let url = lookup.request_url("dQw4w9WgXcQ").unwrap();
        assert_eq!(url.host_str(), Some("www.youtube.com"));
        assert!(url
            .query_pairs()
            .any(|(k, v)| k == "url" && v == "https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(url.query_pairs().any(|(k, v)| k == "format" && v == "json"));
    }

    #[test]
    fn test_not_found_is_distinct_from_transient() {
        let missing = status_error("x", StatusCode::NOT_FOUND).unwrap();
        assert!(matches!(missing, JottaError::MediaNotFound(_)));

        let outage = status_error("x", StatusCode::BAD_GATEWAY).unwrap();
        assert_eq!(outage.kind(), ErrorKind::TransientExternal);

        assert!(status_error("x", StatusCode::OK).is_none());
    }

    #[test]
    fn test_parse_response() {
        let body: OEmbedResponse = serde_json::from_str(
            r#"{"title": "Intro to Rust", "thumbnail_url": "https://i.ytimg.com/vi/x/hqdefault.jpg", "author_name": "someone"}"#,
        )
        .unwrap();
        assert_eq!(body.title, "Intro to Rust");
        assert!(body.thumbnail_url.is_some());
    }
}
