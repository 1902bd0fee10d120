//! Gemini analysis provider implementation

use super::client::{GeminiClient, PROVIDER_ID};
use super::prompt::{response_schema, system_instruction, user_prompt};
use super::types::{Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig};
use crate::{AnalysisProvider, ProviderRequest, ProviderResponse, TokenUsage};
use async_trait::async_trait;
use libro_core::{ProviderConfig, ProviderError, ProviderResult};

/// Gemini provider producing structured JSON analyses.
pub struct GeminiAnalysisProvider {
    client: GeminiClient,
    model: String,
}

impl GeminiAnalysisProvider {
    /// Create a new Gemini analysis provider.
    ///
    /// # Arguments
    /// * `client` - Configured HTTP client
    /// * `model` - Model name (e.g., "gemini-2.5-flash")
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Build from configuration. Fails with `NotConfigured` without an API key.
    pub fn from_config(config: &ProviderConfig) -> ProviderResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or(ProviderError::NotConfigured)?;
        Ok(Self::new(
            GeminiClient::new(api_key, config.endpoint.clone(), config.requests_per_minute),
            config.model.clone(),
        ))
    }

    pub fn build_request(request: &ProviderRequest) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content::user(user_prompt(
                &request.passage,
                request.kind,
                request.question.as_deref(),
            ))],
            system_instruction: Content::system(system_instruction(
                request.kind,
                &request.perspectives,
            )),
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: response_schema(request.kind, &request.perspectives),
                temperature: Some(0.4),
            },
        }
    }

    /// Concatenated text of the first candidate.
    fn extract_text(response: &GenerateContentResponse) -> ProviderResult<String> {
        let candidate = response
            .candidates
            .first()
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: PROVIDER_ID.to_string(),
                reason: "response has no candidates".to_string(),
            })?;

        let text = candidate
            .content
            .as_ref()
            .map(Content::text)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProviderError::InvalidResponse {
                provider: PROVIDER_ID.to_string(),
                reason: format!(
                    "candidate has no text (finish reason: {})",
                    candidate.finish_reason.as_deref().unwrap_or("unknown")
                ),
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl AnalysisProvider for GeminiAnalysisProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    fn model_version(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        let body = Self::build_request(request);
        let response = self
            .client
            .generate_content(&self.model, &body, request.perspectives.len())
            .await?;

        Ok(ProviderResponse {
            body: Self::extract_text(&response)?,
            model_version: response
                .model_version
                .clone()
                .unwrap_or_else(|| self.model.clone()),
            usage: response.usage_metadata.as_ref().map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            }),
        })
    }
}

impl std::fmt::Debug for GeminiAnalysisProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiAnalysisProvider")
            .field("model", &self.model)
            .finish()
    }
}
