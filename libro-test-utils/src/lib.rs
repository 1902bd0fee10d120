//! Libro Test Utilities
//!
//! Shared test infrastructure for the Libro workspace:
//! - Proptest generators for requests, ranges, kinds and perspective sets
//! - Fixtures for a small passage, the catalog and fast engine configuration
//! - Assertions over orchestrator errors and result coverage

// Re-export test doubles from their source crates
pub use libro_core::InMemoryContentSource;
pub use libro_llm::mock::canned_body;
pub use libro_llm::MockAnalysisProvider;
pub use libro_storage::InMemoryResultStore;

// Re-export core types for convenience
pub use libro_core::{
    AnalysisKind, AnalysisRequest, AnalysisResult, CacheKey, CoordinatorConfig, EngineConfig,
    ErrorDisposition, LibroResult, OrchestratorError, PerspectiveCatalog, PerspectiveId,
    PerspectiveSet, ProviderConfig, RequesterRef, RetryConfig, VerseId, VerseRange, VerseText,
};
pub use libro_llm::RawProviderOutput;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Libro request types.

    use super::*;
    use proptest::prelude::*;
    use proptest::sample::{select, subsequence};

    fn builtin_ids() -> Vec<PerspectiveId> {
        PerspectiveCatalog::builtin().ids().cloned().collect()
    }

    /// A perspective known to the built-in catalog.
    pub fn arb_perspective_id() -> impl Strategy<Value = PerspectiveId> {
        select(builtin_ids())
    }

    /// One to five distinct known perspectives, in catalog order.
    pub fn arb_perspective_ids() -> impl Strategy<Value = Vec<PerspectiveId>> {
        subsequence(builtin_ids(), 1..=5)
    }

    /// One to five distinct known perspectives, in arbitrary order.
    pub fn arb_perspective_list() -> impl Strategy<Value = Vec<PerspectiveId>> {
        arb_perspective_ids().prop_shuffle()
    }

    pub fn arb_perspective_set() -> impl Strategy<Value = PerspectiveSet> {
        arb_perspective_ids().prop_map(|ids| ids.into_iter().collect())
    }

    /// A non-inverted range of up to ten verses.
    pub fn arb_verse_range() -> impl Strategy<Value = VerseRange> {
        (1u32..31_100, 0u32..10).prop_map(|(start, extra)| VerseRange::new(start, start + extra))
    }

    pub fn arb_analysis_kind() -> impl Strategy<Value = AnalysisKind> {
        prop_oneof![
            Just(AnalysisKind::Summary),
            Just(AnalysisKind::Question),
            Just(AnalysisKind::CrossReference),
        ]
    }

    /// A question in canonical form: lowercase words separated by one space.
    pub fn arb_question() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z]{1,8}", 1..6).prop_map(|words| words.join(" "))
    }

    fn arb_gap() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just(" "), Just("   "), Just("\t"), Just("\n"), Just(" \t ")]
    }

    /// A canonical question paired with a variant differing only in
    /// whitespace and letter case.
    pub fn arb_question_with_variant() -> impl Strategy<Value = (String, String)> {
        prop::collection::vec("[a-z]{1,8}", 1..6)
            .prop_flat_map(|words| {
                let gaps = prop::collection::vec(arb_gap(), words.len() + 1);
                (Just(words), gaps, any::<bool>())
            })
            .prop_map(|(words, gaps, shout)| {
                let canonical = words.join(" ");
                let mut variant = gaps[0].to_string();
                for (i, word) in words.iter().enumerate() {
                    if shout && i % 2 == 0 {
                        variant.push_str(&word.to_uppercase());
                    } else {
                        variant.push_str(word);
                    }
                    variant.push_str(gaps[i + 1]);
                }
                (canonical, variant)
            })
    }

    /// A request that resolves successfully against the built-in catalog.
    pub fn arb_valid_request() -> impl Strategy<Value = AnalysisRequest> {
        (
            arb_verse_range(),
            arb_analysis_kind(),
            arb_perspective_list(),
            arb_question(),
        )
            .prop_map(|(range, kind, perspectives, question)| AnalysisRequest {
                range,
                kind,
                perspectives,
                question: kind.requires_question().then_some(question),
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    /// Verse id of John 3:16.
    pub const JOHN_3_16: VerseId = 26137;

    fn verse(id: VerseId, verse: u32, text: &str, strongs: &str, numbers: &[&str]) -> VerseText {
        VerseText {
            id,
            book: "John".to_string(),
            chapter: 3,
            verse,
            text: text.to_string(),
            text_with_strongs: Some(strongs.to_string()),
            strongs_numbers: numbers.iter().map(|n| n.to_string()).collect(),
        }
    }

    /// John 3:16-18 with Strong's annotations.
    pub fn john_3_16_to_18() -> Vec<VerseText> {
        vec![
            verse(
                JOHN_3_16,
                16,
                "For God so loved the world, that he gave his only begotten Son, that whosoever believeth in him should not perish, but have everlasting life.",
                "For God G2316 so loved G25 the world G2889, that he gave G1325 his only begotten G3439 Son G5207",
                &["G2316", "G25", "G2889", "G1325", "G3439", "G5207"],
            ),
            verse(
                JOHN_3_16 + 1,
                17,
                "For God sent not his Son into the world to condemn the world; but that the world through him might be saved.",
                "For God G2316 sent G649 not his Son G5207 into the world G2889 to condemn G2919 the world",
                &["G2316", "G649", "G5207", "G2889", "G2919"],
            ),
            verse(
                JOHN_3_16 + 2,
                18,
                "He that believeth on him is not condemned: but he that believeth not is condemned already, because he hath not believed in the name of the only begotten Son of God.",
                "He that believeth G4100 on him is not condemned G2919",
                &["G4100", "G2919"],
            ),
        ]
    }

    /// Content source holding John 3:16-18.
    pub fn content_source() -> Arc<InMemoryContentSource> {
        Arc::new(InMemoryContentSource::new(john_3_16_to_18()))
    }

    pub fn catalog() -> Arc<PerspectiveCatalog> {
        Arc::new(PerspectiveCatalog::builtin())
    }

    /// Parse perspective names, panicking on invalid ones.
    pub fn perspective_ids(names: &[&str]) -> Vec<PerspectiveId> {
        names
            .iter()
            .map(|n| PerspectiveId::parse(n).unwrap_or_else(|e| panic!("{}: {}", n, e)))
            .collect()
    }

    pub fn perspective_set(names: &[&str]) -> PerspectiveSet {
        perspective_ids(names).into_iter().collect()
    }

    pub fn requester() -> RequesterRef {
        RequesterRef::new("test-user")
    }

    pub fn john_3_16_summary(names: &[&str]) -> AnalysisRequest {
        AnalysisRequest::summary(VerseRange::single(JOHN_3_16), perspective_ids(names))
    }

    /// Retries with millisecond backoff and no jitter.
    pub fn fast_retry_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            backoff_multiplier: 2.0,
            jitter: Duration::ZERO,
        }
    }

    /// Valid engine configuration with short timeouts and a store under
    /// `store_path`.
    pub fn test_engine_config(store_path: impl Into<PathBuf>) -> EngineConfig {
        let mut config = EngineConfig {
            provider: ProviderConfig {
                call_timeout: Duration::from_secs(2),
                max_batch_perspectives: 4,
                ..ProviderConfig::default()
            },
            retry: fast_retry_config(),
            ..EngineConfig::default()
        };
        config.store.path = store_path.into();
        config.store.max_size_mb = 16;
        config.coordinator = CoordinatorConfig {
            follower_wait: config.worst_case_generation() + Duration::from_secs(5),
        };
        config
    }

    /// Well-formed provider output for `names`, one segment.
    pub fn canned_output(kind: AnalysisKind, names: &[&str]) -> RawProviderOutput {
        RawProviderOutput {
            provider_id: "mock".to_string(),
            model_version: "mock-model-1".to_string(),
            segments: vec![canned_body(kind, &perspective_ids(names), "John 3:16")],
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over Libro results and errors.

    use super::*;

    /// Assert the result holds exactly `wanted`, each with a payload of the
    /// result's kind.
    #[track_caller]
    pub fn assert_exactly_covers(result: &AnalysisResult, wanted: &PerspectiveSet) {
        assert_eq!(
            &result.perspective_set(),
            wanted,
            "result {} covers the wrong perspectives",
            result.result_id
        );
        for (id, payload) in &result.perspectives {
            assert_eq!(payload.kind(), result.kind, "payload for {} has the wrong kind", id);
            if let Some(text) = payload.text() {
                assert!(!text.trim().is_empty(), "payload for {} has empty text", id);
            }
        }
    }

    #[track_caller]
    pub fn assert_disposition<T: std::fmt::Debug>(
        result: &LibroResult<T>,
        expected: ErrorDisposition,
    ) {
        match result {
            Err(e) => assert_eq!(e.disposition(), expected, "unexpected disposition for {:?}", e),
            Ok(value) => panic!("Expected {:?} error, got Ok: {:?}", expected, value),
        }
    }

    #[track_caller]
    pub fn assert_invalid_request<T: std::fmt::Debug>(result: &LibroResult<T>) {
        match result {
            Err(OrchestratorError::Request(_)) => {}
            other => panic!("Expected invalid request, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_engine_config_fixture_is_valid() {
        let config = fixtures::test_engine_config("/tmp/libro-test");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_passage_fixture_is_contiguous() {
        let verses = fixtures::john_3_16_to_18();
        let ids: Vec<VerseId> = verses.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![26137, 26138, 26139]);
    }

    #[test]
    fn test_canned_output_names_every_perspective() {
        let output = fixtures::canned_output(AnalysisKind::Summary, &["catholic", "baptist"]);
        assert!(output.segments[0].contains("\"catholic\""));
        assert!(output.segments[0].contains("\"baptist\""));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_generated_ranges_are_ordered(range in generators::arb_verse_range()) {
            prop_assert!(!range.is_inverted());
        }

        #[test]
        fn prop_perspective_lists_are_distinct(list in generators::arb_perspective_list()) {
            let set: PerspectiveSet = list.iter().cloned().collect();
            prop_assert_eq!(set.len(), list.len());
        }

        #[test]
        fn prop_question_variant_differs_only_in_layout(
            (canonical, variant) in generators::arb_question_with_variant()
        ) {
            let collapsed = variant.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
            prop_assert_eq!(collapsed, canonical);
        }
    }
}
