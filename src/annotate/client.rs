use super::AnnotationPayload;
use crate::config::AnnotationConfig;
use crate::report::BuildReport;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the analysis webhook. These are logged by the caller and
/// never affect stored comparison results.
#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Clone)]
pub struct AnnotationClient {
    webhook_url: String,
    api_key: Option<String>,
    client: Client,
}

impl AnnotationClient {
    pub fn new(
        webhook_url: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AnnotationError> {
        let client = Client::builder().timeout(timeout).no_proxy().build()?;
        Ok(Self {
            webhook_url,
            api_key,
            client,
        })
    }

    /// `None` when annotation is disabled or has no webhook configured.
    pub fn from_config(config: &AnnotationConfig) -> Result<Option<Self>, AnnotationError> {
        if !config.enabled {
            return Ok(None);
        }
        let Some(url) = config.webhook_url.as_ref().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        Self::new(
            url.clone(),
            config.api_key(),
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }

    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    /// Post a build report for analysis.
    ///
    /// The service may reply inline with an [`AnnotationPayload`]; any other
    /// successful body means the results will arrive later by callback.
    pub async fn request_annotations(
        &self,
        report: &BuildReport,
    ) -> Result<Option<AnnotationPayload>, AnnotationError> {
        let mut request = self.client.post(&self.webhook_url).json(report);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnnotationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice::<AnnotationPayload>(&body).ok())
    }
}
