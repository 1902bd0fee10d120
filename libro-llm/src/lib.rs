//! Libro LLM - Analysis Provider Layer
//!
//! Provider-agnostic trait for structured-output analysis generation, the
//! [`ProviderClient`] that wraps it with timeouts, retries and batching,
//! and the concrete Gemini provider.

use libro_core::{AnalysisKind, PassageContext, PerspectiveId, PerspectiveProfile, ProviderResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub mod backoff;
pub mod client;
pub mod mock;
pub mod providers;

pub use backoff::backoff_delay;
pub use client::ProviderClient;
pub use mock::MockAnalysisProvider;
pub use providers::{GeminiAnalysisProvider, GeminiClient};

// ============================================================================
// ANALYSIS PROVIDER TRAIT
// ============================================================================

/// One structured-output call: a passage analysed from one or more
/// perspectives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub passage: PassageContext,
    pub kind: AnalysisKind,
    /// Display form of the question, for `AnalysisKind::Question` only.
    pub question: Option<String>,
    pub perspectives: Vec<PerspectiveProfile>,
}

impl ProviderRequest {
    pub fn new(
        passage: PassageContext,
        kind: AnalysisKind,
        question: Option<String>,
        perspectives: Vec<PerspectiveProfile>,
    ) -> Self {
        Self {
            passage,
            kind,
            question,
            perspectives,
        }
    }

    pub fn perspective_ids(&self) -> Vec<PerspectiveId> {
        self.perspectives.iter().map(|p| p.id.clone()).collect()
    }
}

/// Token counts reported by a provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Raw body of one successful provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub model_version: String,
    /// JSON text as produced by the model. Not yet validated.
    pub body: String,
    pub usage: Option<TokenUsage>,
}

/// Trait for structured-output analysis providers.
/// Implementations must be thread-safe (Send + Sync).
///
/// A provider makes exactly one upstream call per `generate`. Retries,
/// timeouts and batching belong to [`ProviderClient`].
#[async_trait::async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Stable provider name used in errors and logs (e.g. "gemini").
    fn provider_id(&self) -> &str;

    /// Configured model identifier.
    fn model_version(&self) -> &str;

    async fn generate(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse>;
}

/// Everything the provider returned for one `ProviderClient::generate`,
/// one raw JSON segment per upstream call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProviderOutput {
    pub provider_id: String,
    pub model_version: String,
    pub segments: Vec<String>,
}

// ============================================================================
// USAGE TRACKER
// ============================================================================

/// Tracks token usage across provider calls.
/// Thread-safe via atomic operations.
#[derive(Default)]
pub struct UsageTracker {
    calls: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful call and its token usage, if reported.
    pub fn record(&self, usage: Option<TokenUsage>) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(usage) = usage {
            self.input_tokens
                .fetch_add(usage.input_tokens, Ordering::Relaxed);
            self.output_tokens
                .fetch_add(usage.output_tokens, Ordering::Relaxed);
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens.load(Ordering::Relaxed)
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.input_tokens.store(0, Ordering::Relaxed);
        self.output_tokens.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for UsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageTracker")
            .field("calls", &self.calls())
            .field("input_tokens", &self.input_tokens())
            .field("output_tokens", &self.output_tokens())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_tracker_counts() {
        let tracker = UsageTracker::new();
        tracker.record(Some(TokenUsage {
            input_tokens: 120,
            output_tokens: 80,
        }));
        tracker.record(None);

        assert_eq!(tracker.calls(), 2);
        assert_eq!(tracker.input_tokens(), 120);
        assert_eq!(tracker.output_tokens(), 80);

        tracker.reset();
        assert_eq!(tracker.calls(), 0);
        assert_eq!(tracker.input_tokens(), 0);
    }
}
