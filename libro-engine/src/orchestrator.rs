//! Analysis orchestration
//!
//! `get_or_generate` resolves a request to its cache key, serves it from the
//! store when a stored entry covers every requested perspective, and
//! otherwise generates only the missing perspectives through the
//! single-flight coordinator. History is recorded on every success.

use crate::resolver::{display_question, ContentKeyResolver};
use crate::single_flight::SingleFlightCoordinator;
use crate::validator::ResponseValidator;
use chrono::Utc;
use futures_util::FutureExt;
use libro_core::{
    AnalysisRequest, AnalysisResult, CacheKey, ContentSource, CoordinatorConfig, EngineConfig,
    GenError, HistoryRecord, LibroResult, OrchestratorError, PassageContext, PerspectiveCatalog,
    PerspectiveSet, RequesterRef, Timestamp,
};
use libro_llm::{AnalysisProvider, ProviderClient, UsageTracker};
use libro_storage::{ResultStore, StoreStats};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs one generation for a perspective delta. Shared with the spawned
/// single-flight task, so everything here is owned.
struct Generator {
    store: Arc<dyn ResultStore>,
    content: Arc<dyn ContentSource>,
    catalog: Arc<PerspectiveCatalog>,
    client: ProviderClient,
    validator: ResponseValidator,
}

impl Generator {
    async fn generate(
        self: Arc<Self>,
        key: CacheKey,
        question: Option<String>,
        perspectives: PerspectiveSet,
    ) -> Result<AnalysisResult, GenError> {
        // Flights that finished after the caller's lookup may already have
        // stored part or all of the delta.
        let mut base: Option<AnalysisResult> = None;
        let mut todo = perspectives;
        while let Some(found) = self.store.get(&key.with_perspectives(todo.clone())).await? {
            if found.overlap(&todo) == 0 {
                break;
            }
            todo = found.missing(&todo);
            base = Some(match base {
                Some(b) => b.merge(&found)?,
                None => found,
            });
            if todo.is_empty() {
                break;
            }
        }
        if let (Some(stored), true) = (&base, todo.is_empty()) {
            debug!(key = %key.fingerprint(), "Delta already stored");
            return Ok(stored.clone());
        }

        let delta_key = key.with_perspectives(todo.clone());
        let verses = self.content.fetch_verse_range(key.range()).await?;
        let passage = PassageContext::assemble(key.range(), &verses)?;
        let profiles = self.catalog.profiles_for(&todo)?;

        let raw = self
            .client
            .generate(&passage, &profiles, key.kind(), question.as_deref())
            .await?;
        let payloads = self.validator.validate(&raw, key.kind(), &todo)?;

        let result = AnalysisResult::new(&delta_key, payloads, raw.model_version, passage.digest);
        let stored = self.store.put_if_absent(&delta_key, result).await?;

        info!(
            key = %delta_key.fingerprint(),
            reference = %passage.reference,
            perspectives = %todo,
            result_id = %stored.result_id,
            "Analysis generated"
        );

        match base {
            Some(b) => b.merge(&stored),
            None => Ok(stored),
        }
    }
}

/// Entry point for analysis requests.
pub struct AnalysisOrchestrator {
    resolver: ContentKeyResolver,
    store: Arc<dyn ResultStore>,
    coordinator: SingleFlightCoordinator,
    generator: Arc<Generator>,
}

impl AnalysisOrchestrator {
    pub fn new(
        catalog: Arc<PerspectiveCatalog>,
        store: Arc<dyn ResultStore>,
        content: Arc<dyn ContentSource>,
        client: ProviderClient,
        coordinator: &CoordinatorConfig,
    ) -> Self {
        Self {
            resolver: ContentKeyResolver::new(Arc::clone(&catalog)),
            coordinator: SingleFlightCoordinator::new(coordinator),
            generator: Arc::new(Generator {
                store: Arc::clone(&store),
                content,
                catalog,
                client,
                validator: ResponseValidator::new(),
            }),
            store,
        }
    }

    /// Validate `config`, load its perspective catalog and wire the engine
    /// around the given collaborators.
    pub fn from_config(
        config: &EngineConfig,
        provider: Arc<dyn AnalysisProvider>,
        store: Arc<dyn ResultStore>,
        content: Arc<dyn ContentSource>,
    ) -> LibroResult<Self> {
        config.validate()?;
        let catalog = Arc::new(config.load_catalog()?);
        Ok(Self::new(
            catalog,
            store,
            content,
            ProviderClient::from_config(provider, config),
            &config.coordinator,
        ))
    }

    pub fn resolver(&self) -> &ContentKeyResolver {
        &self.resolver
    }

    pub fn coordinator(&self) -> &SingleFlightCoordinator {
        &self.coordinator
    }

    pub fn usage(&self) -> &UsageTracker {
        self.generator.client.usage()
    }

    pub async fn stats(&self) -> LibroResult<StoreStats> {
        Ok(self.store.stats().await?)
    }

    /// Return an analysis covering exactly the requested perspectives,
    /// generating whatever the store does not already hold.
    ///
    /// Freshly generated results are durable before this returns. A failed
    /// request stores nothing and records no history.
    pub async fn get_or_generate(
        &self,
        requester: &RequesterRef,
        request: &AnalysisRequest,
    ) -> LibroResult<AnalysisResult> {
        let requested_at = Utc::now();
        let key = self.resolver.resolve(request)?;
        let wanted = key.perspectives().clone();

        let cached = self.store.get(&key).await?;
        if let Some(hit) = cached.as_ref().filter(|c| c.covers(&wanted)) {
            debug!(key = %key.fingerprint(), result_id = %hit.result_id, "Cache hit");
            let view = hit.restricted_to(&wanted);
            self.record_history(requester, &key, &view, requested_at, true)
                .await;
            return Ok(view);
        }

        let missing = match &cached {
            Some(partial) => partial.missing(&wanted),
            None => wanted.clone(),
        };
        info!(
            key = %key.fingerprint(),
            kind = %key.kind(),
            missing = %missing,
            partial = cached.is_some(),
            "Cache miss, generating"
        );

        let generator = Arc::clone(&self.generator);
        let flight_key = key.clone();
        let question = request.question.as_deref().map(display_question);
        let fresh = self
            .coordinator
            .run(&key, missing, move |perspectives| {
                generator
                    .generate(flight_key, question, perspectives)
                    .boxed()
            })
            .await?;

        let merged = match cached {
            Some(base) => base.merge(&fresh)?,
            None => fresh,
        };
        let merged_key = key.with_perspectives(merged.perspective_set());
        let stored = self.store.put_if_absent(&merged_key, merged).await?;

        let view = stored.restricted_to(&wanted);
        if !view.covers(&wanted) {
            return Err(OrchestratorError::Inconsistent {
                reason: format!(
                    "stored result {} lacks {}",
                    stored.result_id,
                    view.missing(&wanted)
                ),
            });
        }

        self.record_history(requester, &key, &view, requested_at, false)
            .await;
        Ok(view)
    }

    /// A requester's history, most recent first.
    pub async fn list_history(
        &self,
        requester: &RequesterRef,
        limit: usize,
        offset: usize,
    ) -> LibroResult<Vec<HistoryRecord>> {
        Ok(self.store.list_history(requester, limit, offset).await?)
    }

    async fn record_history(
        &self,
        requester: &RequesterRef,
        key: &CacheKey,
        view: &AnalysisResult,
        requested_at: Timestamp,
        cache_hit: bool,
    ) {
        let record = HistoryRecord::new(
            requester.clone(),
            key.clone(),
            view.result_id,
            requested_at,
            cache_hit,
        );
        if let Err(e) = self.store.append_history(record).await {
            warn!(
                error = %e,
                requester = %requester,
                key = %key.fingerprint(),
                "Failed to append history record"
            );
        }
    }
}

impl std::fmt::Debug for AnalysisOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisOrchestrator")
            .field("resolver", &self.resolver)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
