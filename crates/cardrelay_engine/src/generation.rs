use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::config::ServiceSettings;
use crate::{FailureKind, GenerationError, ImageResult};

/// The card rendering backend.
#[async_trait::async_trait]
pub trait GenerationService: Send + Sync {
    /// Liveness probe. Any failure reads as "down".
    async fn status(&self) -> bool;

    async fn generate(
        &self,
        text: &str,
        url: &str,
        title: &str,
    ) -> Result<ImageResult, GenerationError>;
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    text: &'a str,
    url: &'a str,
    title: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    success: Option<bool>,
    image_url: Option<String>,
    image_data: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl GenerateResponse {
    fn error_text(&self) -> Option<String> {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .filter(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestGenerationClient {
    settings: ServiceSettings,
    client: reqwest::Client,
}

impl ReqwestGenerationClient {
    pub fn new(settings: ServiceSettings) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| GenerationError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait::async_trait]
impl GenerationService for ReqwestGenerationClient {
    async fn status(&self) -> bool {
        match self.client.get(self.endpoint("status")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn generate(
        &self,
        text: &str,
        url: &str,
        title: &str,
    ) -> Result<ImageResult, GenerationError> {
        let body = serde_json::to_vec(&GenerateBody { text, url, title })
            .map_err(|err| GenerationError::new(FailureKind::MalformedPayload, err.to_string()))?;

        let response = self
            .client
            .post(self.endpoint("generate"))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        let parsed = serde_json::from_slice::<GenerateResponse>(&bytes);

        if !status.is_success() {
            let message = parsed
                .ok()
                .and_then(|body| body.error_text())
                .unwrap_or_else(|| format!("server error ({})", status.as_u16()));
            return Err(GenerationError::new(
                FailureKind::HttpStatus(status.as_u16()),
                message,
            ));
        }

        let body = parsed
            .map_err(|err| GenerationError::new(FailureKind::MalformedPayload, err.to_string()))?;
        if body.success == Some(false) {
            let message = body
                .error_text()
                .unwrap_or_else(|| "service reported failure".to_string());
            return Err(GenerationError::new(FailureKind::MalformedPayload, message));
        }

        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty(body.image_url) {
            return Ok(ImageResult::Url(url));
        }
        if let Some(data) = non_empty(body.image_data) {
            return Ok(ImageResult::Data(data));
        }
        Err(GenerationError::new(
            FailureKind::MalformedPayload,
            "response carries no image reference",
        ))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        return GenerationError::new(FailureKind::Timeout, err.to_string());
    }
    GenerationError::new(FailureKind::Network, err.to_string())
}
