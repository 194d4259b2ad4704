//! Gemini `generateContent` client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::GenAiError;
use super::{GenerationOptions, TextGenerator};
use crate::config::GeminiConfig;

/// Gemini API client. Holds an optional key so a missing key only fails the
/// calls that need it.
pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    api_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: &GeminiConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_url, self.model)
    }

    /// Create a GenAiError from a non-success response.
    fn create_error(status: reqwest::StatusCode, body: &str) -> GenAiError {
        let message = serde_json::from_str::<GeminiErrorResponse>(body)
            .ok()
            .and_then(|e| e.error.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "Unknown error".to_string());
        GenAiError::http(status.as_u16(), format!("Gemini API error: {}", message))
    }
}

/// Extract the first candidate's text from a response body.
fn parse_candidate_text(body: &str) -> Result<String, GenAiError> {
    let parsed: GeminiResponse = serde_json::from_str(body).map_err(|e| {
        GenAiError::parse_error(format!("Failed to parse response: {}, body: {}", e, body))
    })?;

    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or_else(|| GenAiError::parse_error("No candidates in response".to_string()))?;

    if text.trim().is_empty() {
        return Err(GenAiError::empty_response());
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String, GenAiError> {
        let api_key = self.api_key.as_deref().ok_or_else(GenAiError::missing_api_key)?;

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_output_tokens,
            },
        };

        tracing::debug!("Sending request to Gemini: model={}", self.model);

        let response = match self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                if e.is_timeout() {
                    return Err(GenAiError::network_error(format!("Request timeout: {}", e)));
                } else if e.is_connect() {
                    return Err(GenAiError::network_error(format!("Connection failed: {}", e)));
                } else {
                    return Err(GenAiError::network_error(format!("Request failed: {}", e)));
                }
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let err = Self::create_error(status, &body);
            tracing::error!(status = %status, "Gemini request failed: {}", err);
            return Err(err);
        }

        parse_candidate_text(&body)
    }
}

/// Gemini request format.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

/// Gemini response format.
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    message: Option<String>,
}
