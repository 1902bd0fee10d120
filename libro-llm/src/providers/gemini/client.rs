//! Gemini HTTP client with rate limiting

use super::types::{ApiError, GenerateContentRequest, GenerateContentResponse};
use libro_core::{ProviderError, ProviderResult};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

pub(crate) const PROVIDER_ID: &str = "gemini";

/// Gemini API client with rate limiting.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    rate_limiter: Arc<Semaphore>,
    last_request: Mutex<Option<Instant>>,
    min_request_interval: Duration,
}

impl GeminiClient {
    /// Create a new Gemini client.
    ///
    /// # Arguments
    /// * `api_key` - Google AI Studio API key
    /// * `base_url` - API base, e.g. `https://generativelanguage.googleapis.com/v1beta`
    /// * `requests_per_minute` - Maximum requests per minute
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(Semaphore::new(rpm as usize)),
            last_request: Mutex::new(None),
            min_request_interval: Duration::from_millis((60_000 / u64::from(rpm)).max(10)),
        }
    }

    /// Wait until the minimum spacing since the previous request has passed.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_request_interval {
                tokio::time::sleep(self.min_request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Call `models/{model}:generateContent`.
    ///
    /// `perspectives` is only used to describe a size-limit rejection.
    pub async fn generate_content(
        &self,
        model: &str,
        body: &GenerateContentRequest,
        perspectives: usize,
    ) -> ProviderResult<GenerateContentResponse> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ProviderError::Network {
                provider: PROVIDER_ID.to_string(),
                message: format!("Rate limiter error: {}", e),
            })?;
        self.pace().await;

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP request failed: {}", e),
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: PROVIDER_ID.to_string(),
                    reason: format!("Failed to parse response: {}", e),
                });
        }

        let retry_after_ms = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after_ms);
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = match serde_json::from_str::<ApiError>(&error_text) {
            Ok(api_error) => api_error.error.message,
            Err(_) => error_text,
        };

        Err(classify_status(status, message, retry_after_ms, perspectives))
    }
}

/// `Retry-After` in delta-seconds, as milliseconds.
pub(crate) fn parse_retry_after_ms(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1_000))
}

/// Map a non-success HTTP status to a provider error.
pub(crate) fn classify_status(
    status: StatusCode,
    message: String,
    retry_after_ms: Option<u64>,
    perspectives: usize,
) -> ProviderError {
    let provider = PROVIDER_ID.to_string();
    let lowered = message.to_lowercase();

    match status {
        StatusCode::TOO_MANY_REQUESTS
            if lowered.contains("per day") || lowered.contains("billing") =>
        {
            ProviderError::QuotaExhausted { provider, message }
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            provider,
            retry_after_ms,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized { provider },
        StatusCode::PAYLOAD_TOO_LARGE => ProviderError::PayloadTooLarge {
            provider,
            perspectives,
        },
        StatusCode::BAD_REQUEST if exceeds_token_limit(&lowered) => {
            ProviderError::PayloadTooLarge {
                provider,
                perspectives,
            }
        }
        s if s.is_server_error() => ProviderError::ServerError {
            provider,
            status: s.as_u16(),
            message,
        },
        s => ProviderError::Rejected {
            provider,
            status: s.as_u16(),
            message,
        },
    }
}

fn exceeds_token_limit(message: &str) -> bool {
    message.contains("token") && (message.contains("exceed") || message.contains("too long"))
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("min_request_interval", &self.min_request_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(status: u16, message: &str) -> ProviderError {
        classify_status(
            StatusCode::from_u16(status).unwrap(),
            message.to_string(),
            Some(2_000),
            4,
        )
    }

    #[test]
    fn test_retry_after_header_parsing() {
        assert_eq!(parse_retry_after_ms(" 2 "), Some(2_000));
        assert_eq!(parse_retry_after_ms("soon"), None);
        assert_eq!(parse_retry_after_ms(&u64::MAX.to_string()), Some(u64::MAX));
    }

    #[test]
    fn test_rate_limit_is_transient_with_retry_after() {
        let err = classify(429, "Resource has been exhausted");
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_daily_quota_is_permanent() {
        let err = classify(429, "Quota exceeded for requests per day");
        assert!(matches!(err, ProviderError::QuotaExhausted { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_auth_failures() {
        assert!(matches!(classify(401, "bad key"), ProviderError::Unauthorized { .. }));
        assert!(matches!(classify(403, "denied"), ProviderError::Unauthorized { .. }));
    }

    #[test]
    fn test_size_limits() {
        assert!(matches!(
            classify(413, "too big"),
            ProviderError::PayloadTooLarge { perspectives: 4, .. }
        ));
        assert!(matches!(
            classify(400, "The input token count exceeds the maximum"),
            ProviderError::PayloadTooLarge { .. }
        ));
    }

    #[test]
    fn test_server_and_client_errors() {
        assert!(classify(503, "overloaded").is_transient());
        assert!(classify(500, "internal").is_transient());
        let rejected = classify(400, "Invalid JSON payload");
        assert!(matches!(rejected, ProviderError::Rejected { status: 400, .. }));
        assert!(!rejected.is_transient());
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = GeminiClient::new("secret-key", "https://example.test/v1beta/", 60);
        let debug = format!("{:?}", client);
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("https://example.test/v1beta\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pace_spaces_requests() {
        let client = GeminiClient::new("key", "https://example.test", 60);
        let started = Instant::now();
        client.pace().await;
        client.pace().await;
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
