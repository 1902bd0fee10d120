//! Scripted analysis provider for testing.
//!
//! Produces well-formed structured output for whatever perspectives it is
//! asked about, and can be told to fail, stall, drop perspectives or reject
//! large batches.

use crate::{AnalysisProvider, ProviderRequest, ProviderResponse, TokenUsage};
use async_trait::async_trait;
use libro_core::{AnalysisKind, PerspectiveId, ProviderError, ProviderResult};
use serde_json::{json, Value};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const MOCK_PROVIDER_ID: &str = "mock";

#[derive(Debug, Default)]
struct MockScript {
    requested: Vec<Vec<PerspectiveId>>,
    failures: VecDeque<ProviderError>,
    always: Option<ProviderError>,
    omitted: BTreeSet<PerspectiveId>,
    batch_limit: Option<usize>,
    delay: Option<Duration>,
}

/// Mock analysis provider.
#[derive(Debug)]
pub struct MockAnalysisProvider {
    model_version: String,
    calls: AtomicUsize,
    script: Mutex<MockScript>,
}

impl Default for MockAnalysisProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAnalysisProvider {
    pub fn new() -> Self {
        Self::with_model("mock-model-1")
    }

    pub fn with_model(model_version: impl Into<String>) -> Self {
        Self {
            model_version: model_version.into(),
            calls: AtomicUsize::new(0),
            script: Mutex::new(MockScript::default()),
        }
    }

    fn script(&self) -> MutexGuard<'_, MockScript> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of `generate` calls so far, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Perspectives of every call, in call order.
    pub fn requested(&self) -> Vec<Vec<PerspectiveId>> {
        self.script().requested.clone()
    }

    /// Fail the next call with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: ProviderError) {
        self.script().failures.push_back(error);
    }

    /// Fail every call with `error` until [`Self::clear_failures`].
    pub fn fail_always(&self, error: ProviderError) {
        self.script().always = Some(error);
    }

    pub fn clear_failures(&self) {
        let mut script = self.script();
        script.failures.clear();
        script.always = None;
    }

    /// Leave `perspective` out of every response.
    pub fn omit_perspective(&self, perspective: PerspectiveId) {
        self.script().omitted.insert(perspective);
    }

    /// Reject calls naming more than `limit` perspectives as too large.
    pub fn set_batch_limit(&self, limit: usize) {
        self.script().batch_limit = Some(limit);
    }

    /// Stall every call for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.script().delay = Some(delay);
    }
}

#[async_trait]
impl AnalysisProvider for MockAnalysisProvider {
    fn provider_id(&self) -> &str {
        MOCK_PROVIDER_ID
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }

    async fn generate(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let ids = request.perspective_ids();

        let delay = {
            let mut script = self.script();
            script.requested.push(ids.clone());
            script.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let answered: Vec<PerspectiveId> = {
            let mut script = self.script();
            if let Some(error) = script.failures.pop_front() {
                return Err(error);
            }
            if let Some(error) = &script.always {
                return Err(error.clone());
            }
            if let Some(limit) = script.batch_limit {
                if ids.len() > limit {
                    return Err(ProviderError::PayloadTooLarge {
                        provider: MOCK_PROVIDER_ID.to_string(),
                        perspectives: ids.len(),
                    });
                }
            }
            ids.into_iter()
                .filter(|id| !script.omitted.contains(id))
                .collect()
        };

        Ok(ProviderResponse {
            model_version: self.model_version.clone(),
            body: canned_body(request.kind, &answered, &request.passage.reference),
            usage: Some(TokenUsage {
                input_tokens: 200,
                output_tokens: 90 * answered.len() as u64,
            }),
        })
    }
}

/// Well-formed structured output for `perspectives`, shaped for `kind`.
pub fn canned_body(kind: AnalysisKind, perspectives: &[PerspectiveId], reference: &str) -> String {
    let analyses: Vec<Value> = perspectives
        .iter()
        .map(|id| canned_analysis(kind, id, reference))
        .collect();
    json!({ "analyses": analyses }).to_string()
}

fn canned_analysis(kind: AnalysisKind, id: &PerspectiveId, reference: &str) -> Value {
    let references = json!([
        {
            "book": "Romans",
            "chapter": 5,
            "verse_start": 8,
            "reference_display": "Romans 5:8",
            "relevance_note": format!("{} reading of divine love", id.title()),
        },
        {
            "book": "1 John",
            "chapter": 4,
            "verse_start": 9,
            "verse_end": 10,
            "reference_display": "1 John 4:9-10",
            "relevance_note": "The sending of the Son",
        }
    ]);
    match kind {
        AnalysisKind::CrossReference => json!({
            "perspective_name": id.as_str(),
            "cross_references": references,
        }),
        AnalysisKind::Summary | AnalysisKind::Question => json!({
            "perspective_name": id.as_str(),
            "response_text": format!("A **{}** reading of {}.", id.title(), reference),
            "cross_references": references,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libro_core::{PassageContext, PerspectiveCatalog, VerseRange};

    fn request(ids: &[&str]) -> ProviderRequest {
        let catalog = PerspectiveCatalog::builtin();
        ProviderRequest::new(
            PassageContext {
                range: VerseRange::single(26137),
                reference: "John 3:16".to_string(),
                text: "For God so loved the world".to_string(),
                strongs: None,
                digest: "digest".to_string(),
            },
            AnalysisKind::Summary,
            None,
            ids.iter()
                .map(|id| catalog.get(&id.parse().unwrap()).unwrap().clone())
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_mock_answers_every_perspective() {
        let mock = MockAnalysisProvider::new();
        let response = mock.generate(&request(&["catholic", "baptist"])).await.unwrap();
        let body: Value = serde_json::from_str(&response.body).unwrap();
        let names: Vec<&str> = body["analyses"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["perspective_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["catholic", "baptist"]);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_omits_perspective() {
        let mock = MockAnalysisProvider::new();
        mock.omit_perspective("baptist".parse().unwrap());
        let response = mock.generate(&request(&["catholic", "baptist"])).await.unwrap();
        assert!(!response.body.contains("\"baptist\""));
    }

    #[tokio::test]
    async fn test_mock_scripted_failures_in_order() {
        let mock = MockAnalysisProvider::new();
        mock.fail_next(ProviderError::Network {
            provider: "mock".to_string(),
            message: "reset".to_string(),
        });
        assert!(mock.generate(&request(&["catholic"])).await.is_err());
        assert!(mock.generate(&request(&["catholic"])).await.is_ok());

        mock.fail_always(ProviderError::Unauthorized {
            provider: "mock".to_string(),
        });
        assert!(mock.generate(&request(&["catholic"])).await.is_err());
        mock.clear_failures();
        assert!(mock.generate(&request(&["catholic"])).await.is_ok());
        assert_eq!(mock.call_count(), 4);
    }

    #[test]
    fn test_canned_cross_reference_has_no_text() {
        let body = canned_body(
            AnalysisKind::CrossReference,
            &["lutheran".parse().unwrap()],
            "John 3:16",
        );
        let value: Value = serde_json::from_str(&body).unwrap();
        assert!(value["analyses"][0].get("response_text").is_none());
        assert_eq!(
            value["analyses"][0]["cross_references"].as_array().unwrap().len(),
            2
        );
    }
}
