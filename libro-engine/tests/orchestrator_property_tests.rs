//! End-to-end properties of the analysis engine over in-memory collaborators

use futures_util::future::join_all;
use libro_core::{ProviderError, ValidationError};
use libro_engine::{AnalysisOrchestrator, ContentKeyResolver};
use libro_test_utils::assertions::*;
use libro_test_utils::fixtures::*;
use libro_test_utils::generators::*;
use libro_test_utils::*;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

struct Engine {
    orchestrator: Arc<AnalysisOrchestrator>,
    provider: Arc<MockAnalysisProvider>,
    store: InMemoryResultStore,
}

fn engine() -> Engine {
    let provider = Arc::new(MockAnalysisProvider::new());
    let store = InMemoryResultStore::new();
    let orchestrator = AnalysisOrchestrator::from_config(
        &test_engine_config("./unused-store"),
        provider.clone(),
        Arc::new(store.clone()),
        content_source(),
    )
    .unwrap();
    Engine {
        orchestrator: Arc::new(orchestrator),
        provider,
        store,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_requests_call_provider_once() {
    let engine = engine();
    engine.provider.set_delay(Duration::from_millis(50));
    let request = john_3_16_summary(&["catholic", "baptist"]);

    let tasks = (0..16).map(|_| {
        let orchestrator = Arc::clone(&engine.orchestrator);
        let request = request.clone();
        tokio::spawn(async move { orchestrator.get_or_generate(&requester(), &request).await })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(engine.provider.call_count(), 1);
    let first = &results[0];
    for result in &results {
        assert_eq!(result.perspectives, first.perspectives);
    }
    assert_eq!(engine.orchestrator.coordinator().in_flight_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_requests_generate_each_perspective_once() {
    let engine = engine();
    engine.provider.set_delay(Duration::from_millis(30));
    let requests = vec![
        john_3_16_summary(&["catholic", "baptist"]),
        john_3_16_summary(&["catholic"]),
        john_3_16_summary(&["baptist", "lutheran"]),
        john_3_16_summary(&["lutheran", "moravian", "catholic"]),
        john_3_16_summary(&["moravian"]),
    ];

    let tasks = requests.iter().cloned().map(|request| {
        let orchestrator = Arc::clone(&engine.orchestrator);
        tokio::spawn(async move {
            let result = orchestrator.get_or_generate(&requester(), &request).await;
            (request, result)
        })
    });
    for joined in join_all(tasks).await {
        let (request, result) = joined.unwrap();
        let wanted: PerspectiveSet = request.perspectives.iter().cloned().collect();
        assert_exactly_covers(&result.unwrap(), &wanted);
    }

    let generated: Vec<PerspectiveId> = engine.provider.requested().into_iter().flatten().collect();
    let distinct: BTreeSet<_> = generated.iter().cloned().collect();
    assert_eq!(generated.len(), distinct.len(), "generated twice: {:?}", generated);
    assert_eq!(distinct.len(), 4);
}

#[tokio::test]
async fn sequential_repeat_is_identical_and_free() {
    let engine = engine();
    let request = AnalysisRequest::question(
        VerseRange::new(JOHN_3_16, JOHN_3_16 + 2),
        perspective_ids(&["anglican", "pentecostal"]),
        "What does it mean to believe?",
    );

    let first = engine.orchestrator.get_or_generate(&requester(), &request).await.unwrap();
    let second = engine.orchestrator.get_or_generate(&requester(), &request).await.unwrap();

    assert_eq!(engine.provider.call_count(), 1);
    assert_eq!(first.perspectives, second.perspectives);
    assert_eq!(first.result_id, second.result_id);
}

#[tokio::test]
async fn partial_cache_generates_only_the_missing_perspective() {
    let engine = engine();
    engine
        .orchestrator
        .get_or_generate(&requester(), &john_3_16_summary(&["catholic", "lutheran"]))
        .await
        .unwrap();
    assert_eq!(engine.provider.call_count(), 1);

    let merged = engine
        .orchestrator
        .get_or_generate(&requester(), &john_3_16_summary(&["catholic", "lutheran", "baptist"]))
        .await
        .unwrap();

    assert_eq!(engine.provider.call_count(), 2);
    assert_eq!(engine.provider.requested()[1], perspective_ids(&["baptist"]));
    assert_exactly_covers(&merged, &perspective_set(&["catholic", "lutheran", "baptist"]));

    // Cached payloads are reused as stored.
    let original = engine
        .orchestrator
        .get_or_generate(&requester(), &john_3_16_summary(&["catholic"]))
        .await
        .unwrap();
    let catholic = "catholic".parse::<PerspectiveId>().unwrap();
    assert_eq!(merged.perspectives[&catholic], original.perspectives[&catholic]);
}

#[tokio::test]
async fn permanent_failure_is_not_cached() {
    let engine = engine();
    let request = john_3_16_summary(&["catholic"]);
    engine.provider.fail_next(ProviderError::QuotaExhausted {
        provider: "mock".to_string(),
        message: "Quota exceeded for requests per day".to_string(),
    });

    let failed = engine.orchestrator.get_or_generate(&requester(), &request).await;
    assert_disposition(&failed, ErrorDisposition::UpstreamFailure);
    assert_eq!(engine.store.insert_count(), 0);

    let retried = engine.orchestrator.get_or_generate(&requester(), &request).await;
    assert!(retried.is_ok());
    assert_eq!(engine.provider.call_count(), 2);
}

#[tokio::test]
async fn transient_failure_is_retried_inside_one_request() {
    let engine = engine();
    engine.provider.fail_next(ProviderError::ServerError {
        provider: "mock".to_string(),
        status: 503,
        message: "overloaded".to_string(),
    });

    let result = engine
        .orchestrator
        .get_or_generate(&requester(), &john_3_16_summary(&["methodist"]))
        .await;
    assert!(result.is_ok());
    assert_eq!(engine.provider.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn long_retry_after_stays_within_follower_wait() {
    let config = EngineConfig::default();
    config.validate().unwrap();
    let provider = Arc::new(MockAnalysisProvider::new());
    let orchestrator = AnalysisOrchestrator::from_config(
        &config,
        provider.clone(),
        Arc::new(InMemoryResultStore::new()),
        content_source(),
    )
    .unwrap();
    provider.fail_next(ProviderError::RateLimited {
        provider: "mock".to_string(),
        retry_after_ms: Some(3_600_000),
    });

    let started = tokio::time::Instant::now();
    let result = orchestrator
        .get_or_generate(&requester(), &john_3_16_summary(&["catholic"]))
        .await;

    assert!(result.is_ok(), "{:?}", result);
    assert!(started.elapsed() < config.coordinator.follower_wait);
    assert_eq!(provider.call_count(), 2);
    assert_eq!(orchestrator.coordinator().in_flight_count(), 0);
}

#[tokio::test]
async fn missing_perspective_in_output_is_rejected() {
    let engine = engine();
    engine.provider.omit_perspective("baptist".parse().unwrap());

    let result = engine
        .orchestrator
        .get_or_generate(&requester(), &john_3_16_summary(&["catholic", "baptist"]))
        .await;
    assert_eq!(
        result,
        Err(OrchestratorError::Validation(ValidationError::IncompleteOutput {
            missing: perspective_ids(&["baptist"]),
        }))
    );
    assert_eq!(engine.store.insert_count(), 0);
    assert!(engine
        .orchestrator
        .list_history(&requester(), 10, 0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn john_3_16_summary_on_empty_cache() {
    let engine = engine();
    let request = john_3_16_summary(&["catholic", "baptist"]);

    let result = engine.orchestrator.get_or_generate(&requester(), &request).await.unwrap();
    assert_eq!(engine.provider.call_count(), 1);
    assert_exactly_covers(&result, &perspective_set(&["catholic", "baptist"]));

    let stored = engine.store.entries_for(&result.identity).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].result_id, result.result_id);
    assert!(stored[0].generated_at <= chrono::Utc::now());

    let history = engine.orchestrator.list_history(&requester(), 10, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].result_id, result.result_id);
    assert_eq!(history[0].requester, requester());
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_work() {
    let engine = engine();
    let mut request = john_3_16_summary(&["catholic"]);
    request.question = Some("Why?".to_string());

    let result = engine.orchestrator.get_or_generate(&requester(), &request).await;
    assert_invalid_request(&result);
    assert_eq!(result.unwrap_err().http_status(), 400);
    assert_eq!(engine.provider.call_count(), 0);
}

#[tokio::test]
async fn history_is_newest_first_per_requester() {
    let engine = engine();
    let other = RequesterRef::new("someone-else");
    for names in [&["catholic"][..], &["baptist"][..], &["lutheran"][..]] {
        engine
            .orchestrator
            .get_or_generate(&requester(), &john_3_16_summary(names))
            .await
            .unwrap();
    }
    engine
        .orchestrator
        .get_or_generate(&other, &john_3_16_summary(&["catholic"]))
        .await
        .unwrap();

    let mine = engine.orchestrator.list_history(&requester(), 10, 0).await.unwrap();
    assert_eq!(mine.len(), 3);
    assert!(mine.windows(2).all(|w| w[0].requested_at >= w[1].requested_at));
    assert_eq!(mine[0].key.perspectives(), &perspective_set(&["lutheran"]));

    let page = engine.orchestrator.list_history(&requester(), 1, 1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].record_id, mine[1].record_id);

    let theirs = engine.orchestrator.list_history(&other, 10, 0).await.unwrap();
    assert_eq!(theirs.len(), 1);
    assert!(theirs[0].cache_hit);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_perspective_order_never_changes_key(
        request in arb_valid_request(),
        rotate in 0usize..5,
    ) {
        let resolver = ContentKeyResolver::new(catalog());
        let mut reordered = request.clone();
        let len = reordered.perspectives.len();
        reordered.perspectives.rotate_left(rotate % len);
        reordered.perspectives.reverse();

        let a = resolver.resolve(&request).unwrap();
        let b = resolver.resolve(&reordered).unwrap();
        prop_assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn prop_question_layout_variants_share_a_key(
        (canonical, variant) in arb_question_with_variant(),
        perspectives in arb_perspective_list(),
    ) {
        let resolver = ContentKeyResolver::new(catalog());
        let range = VerseRange::single(JOHN_3_16);
        let a = resolver
            .resolve(&AnalysisRequest::question(range, perspectives.clone(), canonical))
            .unwrap();
        let b = resolver
            .resolve(&AnalysisRequest::question(range, perspectives, variant))
            .unwrap();
        prop_assert_eq!(a, b);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_repeat_requests_hit_the_cache(
        kind in arb_analysis_kind(),
        perspectives in arb_perspective_list(),
        question in arb_question(),
        extra in 0u32..3,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let engine = engine();
        let request = AnalysisRequest {
            range: VerseRange::new(JOHN_3_16, JOHN_3_16 + extra),
            kind,
            perspectives,
            question: kind.requires_question().then_some(question),
        };

        let (first, second) = runtime.block_on(async {
            let first = engine.orchestrator.get_or_generate(&requester(), &request).await;
            let second = engine.orchestrator.get_or_generate(&requester(), &request).await;
            (first, second)
        });

        let first = first.unwrap();
        prop_assert_eq!(first.kind, kind);
        prop_assert_eq!(&second.unwrap(), &first);
        prop_assert_eq!(engine.provider.call_count(), 1);
    }
}
