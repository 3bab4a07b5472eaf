//! Source fetching: download the bytes behind one photo URL.
//!
//! Every failure here is an [`ImageError::Download`] for that single URL.
//! The scheduler logs it and moves on to the case's next photo.

use crate::error::ImageError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Anything that can hand back the raw bytes of a photo URL.
///
/// The production implementation is [`HttpImageSource`]; tests substitute
/// scripted sources.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError>;
}

/// Fetches photos from the origin site over HTTP(S).
pub struct HttpImageSource {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpImageSource {
    /// Build a source with a per-request timeout and a fixed `User-Agent`.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                format!("timed out after {}s", self.timeout.as_secs())
            } else {
                e.to_string()
            };
            ImageError::Download {
                url: url.to_string(),
                reason,
            }
        })?;

        if !response.status().is_success() {
            return Err(ImageError::Download {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImageError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if bytes.is_empty() {
            return Err(ImageError::Download {
                url: url.to_string(),
                reason: "empty response body".to_string(),
            });
        }

        debug!(url, bytes = bytes.len(), "Fetched source photo");
        Ok(bytes.to_vec())
    }
}
