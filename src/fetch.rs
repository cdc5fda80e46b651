//! Image retrieval for baseline and candidate references.

use crate::compare::interface::{CompareError, ImageSource};
use crate::utils::http::request_with_backoff;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use std::time::Duration;

/// Resolves `http(s)://` URLs with retry and inline `data:` URLs.
#[derive(Clone)]
pub struct HttpImageSource {
    client: Client,
    max_retries: u32,
    initial_delay: Duration,
}

impl HttpImageSource {
    pub fn new(max_retries: u32) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            max_retries,
            initial_delay: Duration::from_millis(1000),
        })
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, CompareError> {
        let client = self.client.clone();
        let target = url.to_string();
        let response = request_with_backoff(
            move || {
                let client = client.clone();
                let target = target.clone();
                async move { client.get(&target).send().await }
            },
            self.max_retries,
            self.initial_delay,
        )
        .await
        .map_err(|e| CompareError::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompareError::fetch(url, format!("HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CompareError::fetch(url, e.to_string()))?;
        tracing::debug!(url, bytes = bytes.len(), "fetched image");
        Ok(bytes.to_vec())
    }
}

/// Decode `data:[<mime>][;base64],<payload>`. Only base64 payloads are images.
fn decode_data_url(reference: &str) -> Result<Vec<u8>, CompareError> {
    let rest = &reference["data:".len()..];
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| CompareError::fetch(short(reference), "malformed data URL"))?;
    if !meta.ends_with(";base64") {
        return Err(CompareError::fetch(short(reference), "data URL is not base64"));
    }
    general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| CompareError::fetch(short(reference), format!("base64 decode error: {}", e)))
}

/// Data URLs can be megabytes; keep error messages readable.
fn short(reference: &str) -> String {
    match reference.char_indices().nth(48) {
        Some((idx, _)) => format!("{}...", &reference[..idx]),
        None => reference.to_string(),
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, CompareError> {
        if reference.starts_with("data:") {
            return decode_data_url(reference);
        }
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return self.fetch_http(reference).await;
        }
        Err(CompareError::fetch(short(reference), "unsupported image reference"))
    }
}
