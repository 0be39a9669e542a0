//! Artifact service client
//!
//! Once a job result names its artifact, the gateway downloads the bytes from
//! the artifact service and passes them through with the upstream content
//! type.

use crate::config::{ArtifactConfig, RetryConfig};
use crate::error::{Result, UpstreamError};
use crate::retry::with_retry;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A downloaded artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Upstream `Content-Type`, or `application/octet-stream` when absent
    pub content_type: String,
    /// Raw artifact bytes
    pub bytes: Bytes,
}

/// Fetches artifacts by identifier
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Download the artifact named `artifact_id`
    async fn fetch_artifact(&self, artifact_id: &str) -> Result<Artifact>;
}

/// [`ArtifactFetcher`] for the HTTP artifact service
pub struct HttpArtifactFetcher {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl HttpArtifactFetcher {
    /// Build a client with the configured request timeout
    pub fn new(config: &ArtifactConfig, retry: RetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(UpstreamError::Request)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retry,
        })
    }

    fn download_url(&self, artifact_id: &str) -> String {
        format!(
            "{}/download/{}",
            self.base_url,
            urlencoding::encode(artifact_id)
        )
    }

    async fn fetch_once(&self, url: &str, artifact_id: &str) -> Result<Artifact> {
        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, &self.api_key)
            .send()
            .await
            .map_err(UpstreamError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                artifact_id: artifact_id.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let bytes = response.bytes().await.map_err(UpstreamError::Request)?;

        Ok(Artifact {
            content_type,
            bytes,
        })
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch_artifact(&self, artifact_id: &str) -> Result<Artifact> {
        let url = self.download_url(artifact_id);
        let artifact = with_retry(&self.retry, || self.fetch_once(&url, artifact_id)).await?;

        tracing::debug!(
            artifact_id,
            content_type = %artifact.content_type,
            size = artifact.bytes.len(),
            "Fetched artifact"
        );
        Ok(artifact)
    }
}
