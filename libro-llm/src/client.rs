//! Provider client: timeouts, retries and batching around an
//! [`AnalysisProvider`].

use crate::backoff::backoff_delay;
use crate::{AnalysisProvider, ProviderRequest, ProviderResponse, RawProviderOutput, UsageTracker};
use futures_util::future::join_all;
use libro_core::{
    AnalysisKind, EngineConfig, PassageContext, PerspectiveProfile, ProviderError, ProviderResult,
    RetryConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Calls the provider on behalf of the engine.
///
/// - Every upstream call is bounded by `call_timeout`.
/// - Transient failures are retried with exponential backoff and jitter,
///   up to `retry.max_attempts` attempts in total.
/// - Permanent failures are returned immediately.
/// - Perspectives are sent in batches of at most `max_batch`; a batch the
///   provider rejects as too large is retried one perspective per call.
pub struct ProviderClient {
    provider: Arc<dyn AnalysisProvider>,
    retry: RetryConfig,
    call_timeout: Duration,
    max_batch: usize,
    usage: UsageTracker,
}

impl ProviderClient {
    pub fn new(
        provider: Arc<dyn AnalysisProvider>,
        retry: RetryConfig,
        call_timeout: Duration,
        max_batch: usize,
    ) -> Self {
        Self {
            provider,
            retry,
            call_timeout,
            max_batch: max_batch.max(1),
            usage: UsageTracker::new(),
        }
    }

    pub fn from_config(provider: Arc<dyn AnalysisProvider>, config: &EngineConfig) -> Self {
        Self::new(
            provider,
            config.retry.clone(),
            config.provider.call_timeout,
            config.provider.max_batch_perspectives,
        )
    }

    pub fn provider_id(&self) -> &str {
        self.provider.provider_id()
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Generate raw structured output for every perspective in
    /// `perspectives`.
    ///
    /// Either every batch succeeds or the first failure is returned; partial
    /// output is never surfaced.
    pub async fn generate(
        &self,
        passage: &PassageContext,
        perspectives: &[PerspectiveProfile],
        kind: AnalysisKind,
        question: Option<&str>,
    ) -> ProviderResult<RawProviderOutput> {
        let batches = join_all(
            perspectives
                .chunks(self.max_batch)
                .map(|chunk| self.generate_batch(passage, chunk, kind, question)),
        )
        .await;

        let mut model_version = None;
        let mut segments = Vec::with_capacity(perspectives.len());
        for batch in batches {
            for response in batch? {
                model_version.get_or_insert(response.model_version);
                segments.push(response.body);
            }
        }

        debug!(
            provider = self.provider.provider_id(),
            perspectives = perspectives.len(),
            segments = segments.len(),
            "Provider output collected"
        );

        Ok(RawProviderOutput {
            provider_id: self.provider.provider_id().to_string(),
            model_version: model_version
                .unwrap_or_else(|| self.provider.model_version().to_string()),
            segments,
        })
    }

    async fn generate_batch(
        &self,
        passage: &PassageContext,
        chunk: &[PerspectiveProfile],
        kind: AnalysisKind,
        question: Option<&str>,
    ) -> ProviderResult<Vec<ProviderResponse>> {
        let request = ProviderRequest::new(
            passage.clone(),
            kind,
            question.map(str::to_string),
            chunk.to_vec(),
        );

        match self.call_with_retry(&request).await {
            Ok(response) => Ok(vec![response]),
            Err(ProviderError::PayloadTooLarge { .. }) if chunk.len() > 1 => {
                warn!(
                    provider = self.provider.provider_id(),
                    perspectives = chunk.len(),
                    "Batch too large, falling back to one call per perspective"
                );
                let singles = join_all(chunk.iter().map(|profile| {
                    let request = ProviderRequest::new(
                        passage.clone(),
                        kind,
                        question.map(str::to_string),
                        vec![profile.clone()],
                    );
                    async move { self.call_with_retry(&request).await }
                }))
                .await;
                singles.into_iter().collect()
            }
            Err(e) => Err(e),
        }
    }

    async fn call_with_retry(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        let provider = self.provider.provider_id();
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            let outcome =
                match tokio::time::timeout(self.call_timeout, self.provider.generate(request)).await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ProviderError::Timeout {
                        provider: provider.to_string(),
                        after_ms: self.call_timeout.as_millis() as u64,
                    }),
                };

            let error = match outcome {
                Ok(response) => {
                    self.usage.record(response.usage);
                    return Ok(response);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                warn!(
                    provider,
                    attempts = max_attempts,
                    error = %error,
                    "Provider call failed after final attempt"
                );
                return Err(ProviderError::RetriesExhausted {
                    attempts: max_attempts,
                    last: Box::new(error),
                });
            }

            let delay = backoff_delay(&self.retry, attempt, error.retry_after());
            warn!(
                provider,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient provider failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("provider", &self.provider.provider_id())
            .field("call_timeout", &self.call_timeout)
            .field("max_batch", &self.max_batch)
            .field("max_attempts", &self.retry.max_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAnalysisProvider;
    use libro_core::{PerspectiveCatalog, PerspectiveId, VerseRange};

    fn passage() -> PassageContext {
        PassageContext {
            range: VerseRange::single(26137),
            reference: "John 3:16".to_string(),
            text: "For God so loved the world".to_string(),
            strongs: None,
            digest: "digest".to_string(),
        }
    }

    fn profiles(ids: &[&str]) -> Vec<PerspectiveProfile> {
        let catalog = PerspectiveCatalog::builtin();
        ids.iter()
            .map(|id| {
                let id: PerspectiveId = id.parse().unwrap();
                catalog.get(&id).unwrap().clone()
            })
            .collect()
    }

    fn retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: Duration::ZERO,
        }
    }

    fn client(mock: &Arc<MockAnalysisProvider>, max_attempts: u32, max_batch: usize) -> ProviderClient {
        ProviderClient::new(
            mock.clone(),
            retry(max_attempts),
            Duration::from_secs(5),
            max_batch,
        )
    }

    fn server_error() -> ProviderError {
        ProviderError::ServerError {
            provider: "mock".to_string(),
            status: 503,
            message: "overloaded".to_string(),
        }
    }

    #[tokio::test]
    async fn test_single_batch_single_call() {
        let mock = Arc::new(MockAnalysisProvider::new());
        let client = client(&mock, 3, 8);
        let output = client
            .generate(&passage(), &profiles(&["catholic", "baptist"]), AnalysisKind::Summary, None)
            .await
            .unwrap();

        assert_eq!(mock.call_count(), 1);
        assert_eq!(output.segments.len(), 1);
        assert_eq!(output.provider_id, "mock");
        assert_eq!(client.usage().calls(), 1);
    }

    #[tokio::test]
    async fn test_perspectives_chunked_by_max_batch() {
        let mock = Arc::new(MockAnalysisProvider::new());
        let client = client(&mock, 3, 2);
        let output = client
            .generate(
                &passage(),
                &profiles(&["catholic", "baptist", "lutheran", "anglican", "moravian"]),
                AnalysisKind::CrossReference,
                None,
            )
            .await
            .unwrap();

        assert_eq!(mock.call_count(), 3);
        assert_eq!(output.segments.len(), 3);
        let sizes: Vec<usize> = mock.requested().iter().map(Vec::len).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 5);
    }

    #[tokio::test]
    async fn test_payload_too_large_falls_back_per_perspective() {
        let mock = Arc::new(MockAnalysisProvider::new());
        mock.set_batch_limit(1);
        let client = client(&mock, 3, 8);
        let output = client
            .generate(
                &passage(),
                &profiles(&["catholic", "baptist", "methodist"]),
                AnalysisKind::Summary,
                None,
            )
            .await
            .unwrap();

        // One rejected batch, then one call per perspective.
        assert_eq!(mock.call_count(), 4);
        assert_eq!(output.segments.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retried() {
        let mock = Arc::new(MockAnalysisProvider::new());
        mock.fail_next(server_error());
        mock.fail_next(server_error());
        let client = client(&mock, 4, 8);

        let output = client
            .generate(&passage(), &profiles(&["catholic"]), AnalysisKind::Summary, None)
            .await
            .unwrap();
        assert_eq!(output.segments.len(), 1);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let mock = Arc::new(MockAnalysisProvider::new());
        mock.fail_always(ProviderError::QuotaExhausted {
            provider: "mock".to_string(),
            message: "daily quota".to_string(),
        });
        let client = client(&mock, 4, 8);

        let err = client
            .generate(&passage(), &profiles(&["catholic"]), AnalysisKind::Summary, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::QuotaExhausted { .. }));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let mock = Arc::new(MockAnalysisProvider::new());
        mock.fail_always(server_error());
        let client = client(&mock, 3, 8);

        let err = client
            .generate(&passage(), &profiles(&["catholic"]), AnalysisKind::Summary, None)
            .await
            .unwrap_err();
        match err {
            ProviderError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ProviderError::ServerError { status: 503, .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out_and_retries() {
        let mock = Arc::new(MockAnalysisProvider::new());
        mock.set_delay(Duration::from_secs(60));
        let client = client(&mock, 2, 8);

        let err = client
            .generate(&passage(), &profiles(&["catholic"]), AnalysisKind::Summary, None)
            .await
            .unwrap_err();
        match err {
            ProviderError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, ProviderError::Timeout { after_ms: 5_000, .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_honored() {
        let mock = Arc::new(MockAnalysisProvider::new());
        mock.fail_next(ProviderError::RateLimited {
            provider: "mock".to_string(),
            retry_after_ms: Some(1_500),
        });
        let client = client(&mock, 3, 8);

        let started = tokio::time::Instant::now();
        client
            .generate(&passage(), &profiles(&["catholic"]), AnalysisKind::Summary, None)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1_500));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_beyond_max_backoff_is_capped() {
        let mock = Arc::new(MockAnalysisProvider::new());
        mock.fail_next(ProviderError::RateLimited {
            provider: "mock".to_string(),
            retry_after_ms: Some(3_600_000),
        });
        let client = client(&mock, 3, 8);

        let started = tokio::time::Instant::now();
        client
            .generate(&passage(), &profiles(&["catholic"]), AnalysisKind::Summary, None)
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed <= retry(3).worst_case(Duration::from_secs(5)));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_batch_fails_whole_call() {
        let mock = Arc::new(MockAnalysisProvider::new());
        mock.fail_always(ProviderError::Unauthorized {
            provider: "mock".to_string(),
        });
        let client = client(&mock, 3, 1);

        let result = client
            .generate(&passage(), &profiles(&["catholic", "baptist"]), AnalysisKind::Summary, None)
            .await;
        assert!(matches!(result, Err(ProviderError::Unauthorized { .. })));
    }
}
