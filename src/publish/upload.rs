use crate::compare::interface::{CompareError, HeatmapPublisher};
use crate::utils::http::request_with_backoff;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Uploads heat-maps to an unsigned-upload image host as `multipart/form-data`
/// and returns the hosted URL (`secure_url`, falling back to `url`).
pub struct HttpUploadPublisher {
    upload_url: String,
    upload_preset: Option<String>,
    max_retries: u32,
    initial_delay: Duration,
    client: Client,
}

impl HttpUploadPublisher {
    pub fn new(
        upload_url: String,
        upload_preset: Option<String>,
        max_retries: u32,
    ) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .no_proxy()
            .build()?;
        Ok(Self {
            upload_url,
            upload_preset,
            max_retries,
            initial_delay: Duration::from_millis(1000),
            client,
        })
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

#[async_trait]
impl HeatmapPublisher for HttpUploadPublisher {
    fn id(&self) -> String {
        "http_upload".to_string()
    }

    async fn publish(&self, image_name: &str, png: &[u8]) -> Result<String, CompareError> {
        let client = self.client.clone();
        let url = self.upload_url.clone();
        let preset = self.upload_preset.clone();
        let bytes = png.to_vec();
        let filename = format!("{}.png", image_name);

        // Multipart bodies are consumed by send, so the form is rebuilt per attempt.
        let res = request_with_backoff(
            move || {
                let client = client.clone();
                let url = url.clone();
                let mut form = Form::new().part(
                    "file",
                    Part::bytes(bytes.clone()).file_name(filename.clone()),
                );
                if let Some(preset) = &preset {
                    form = form.text("upload_preset", preset.clone());
                }
                async move { client.post(&url).multipart(form).send().await }
            },
            self.max_retries,
            self.initial_delay,
        )
        .await
        .map_err(CompareError::Publish)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CompareError::Publish(format!(
                "upload failed with {}: {}",
                status, text
            )));
        }

        let json: Value = res
            .json()
            .await
            .map_err(|e| CompareError::Publish(format!("Invalid JSON: {}", e)))?;

        json.get("secure_url")
            .or_else(|| json.get("url"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| CompareError::Publish("response missing 'secure_url'".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn publisher(server: &MockServer) -> HttpUploadPublisher {
        HttpUploadPublisher::new(
            format!("{}/image/upload", server.uri()),
            Some("heatmaps".into()),
            1,
        )
        .unwrap()
        .with_initial_delay(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn upload_returns_secure_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/image/upload"))
            .and(body_string_contains("name=\"upload_preset\""))
            .and(body_string_contains("filename=\"home.png\""))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"secure_url": "https://cdn/h.png", "url": "http://cdn/h.png"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = publisher(&server).publish("home", b"fake-png").await.unwrap();
        assert_eq!(url, "https://cdn/h.png");
    }

    #[tokio::test]
    async fn retries_then_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .expect(2)
            .mount(&server)
            .await;

        let err = publisher(&server).publish("home", b"fake-png").await.unwrap_err();
        match err {
            CompareError::Publish(msg) => assert!(msg.contains("503")),
            other => panic!("expected publish error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_url_in_response_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
            .mount(&server)
            .await;

        assert!(matches!(
            publisher(&server).publish("home", b"fake-png").await,
            Err(CompareError::Publish(_))
        ));
    }
}
