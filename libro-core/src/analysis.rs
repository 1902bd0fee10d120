//! Structured analysis payloads, stored results and history records.

use crate::{
    AnalysisKind, CacheKey, ContentIdentity, GenError, PerspectiveId, PerspectiveSet,
    RequesterRef, Timestamp, VerseRange,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Namespace for deterministic result ids.
const RESULT_NAMESPACE: Uuid = Uuid::from_u128(0x6c69_6272_6f2d_5245_5355_4c54_0000_0001);

// ============================================================================
// PAYLOADS
// ============================================================================

/// A supporting passage cited by an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReference {
    pub book: String,
    pub chapter: u32,
    pub verse_start: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verse_end: Option<u32>,
    pub reference_display: String,
    pub relevance_note: String,
}

impl CrossReference {
    /// Canonical display form, `Romans 5:8` or `Romans 5:6-8`.
    pub fn format_display(book: &str, chapter: u32, verse_start: u32, verse_end: Option<u32>) -> String {
        match verse_end {
            Some(end) if end != verse_start => {
                format!("{} {}:{}-{}", book, chapter, verse_start, end)
            }
            _ => format!("{} {}:{}", book, chapter, verse_start),
        }
    }
}

/// Prose analysis from one perspective with its supporting references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerspectiveAnalysis {
    pub response_text: String,
    #[serde(default)]
    pub cross_references: Vec<CrossReference>,
}

/// Validated output for one perspective. The variant always matches the
/// analysis kind it was produced for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuredPayload {
    Summary(PerspectiveAnalysis),
    Answer(PerspectiveAnalysis),
    CrossReferences { references: Vec<CrossReference> },
}

impl StructuredPayload {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            StructuredPayload::Summary(_) => AnalysisKind::Summary,
            StructuredPayload::Answer(_) => AnalysisKind::Question,
            StructuredPayload::CrossReferences { .. } => AnalysisKind::CrossReference,
        }
    }

    /// Prose text, absent for pure cross-reference payloads.
    pub fn text(&self) -> Option<&str> {
        match self {
            StructuredPayload::Summary(a) | StructuredPayload::Answer(a) => {
                Some(a.response_text.as_str())
            }
            StructuredPayload::CrossReferences { .. } => None,
        }
    }

    pub fn references(&self) -> &[CrossReference] {
        match self {
            StructuredPayload::Summary(a) | StructuredPayload::Answer(a) => &a.cross_references,
            StructuredPayload::CrossReferences { references } => references,
        }
    }
}

// ============================================================================
// ANALYSIS RESULT
// ============================================================================

/// A stored analysis. Immutable once persisted.
///
/// `result_id` is derived from the content identity and the covered
/// perspective set, so two writers producing the same logical entry agree
/// on its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub result_id: Uuid,
    pub identity: ContentIdentity,
    pub range: VerseRange,
    pub kind: AnalysisKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub perspectives: BTreeMap<PerspectiveId, StructuredPayload>,
    pub generated_at: Timestamp,
    pub provider_model_version: String,
    /// Hex SHA-256 of the passage text the analysis was generated from.
    pub content_digest: String,
}

impl AnalysisResult {
    pub fn new(
        key: &CacheKey,
        perspectives: BTreeMap<PerspectiveId, StructuredPayload>,
        provider_model_version: impl Into<String>,
        content_digest: impl Into<String>,
    ) -> Self {
        let covered: PerspectiveSet = perspectives.keys().cloned().collect();
        Self {
            result_id: Self::derive_id(&key.identity(), &covered),
            identity: key.identity(),
            range: key.range(),
            kind: key.kind(),
            question: key.question().map(str::to_string),
            perspectives,
            generated_at: Utc::now(),
            provider_model_version: provider_model_version.into(),
            content_digest: content_digest.into(),
        }
    }

    pub fn derive_id(identity: &ContentIdentity, perspectives: &PerspectiveSet) -> Uuid {
        let material = format!("{}|{}", identity.to_hex(), perspectives.joined());
        Uuid::new_v5(&RESULT_NAMESPACE, material.as_bytes())
    }

    pub fn perspective_set(&self) -> PerspectiveSet {
        self.perspectives.keys().cloned().collect()
    }

    pub fn covers(&self, wanted: &PerspectiveSet) -> bool {
        wanted.iter().all(|id| self.perspectives.contains_key(id))
    }

    pub fn missing(&self, wanted: &PerspectiveSet) -> PerspectiveSet {
        wanted
            .iter()
            .filter(|id| !self.perspectives.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn overlap(&self, wanted: &PerspectiveSet) -> usize {
        wanted
            .iter()
            .filter(|id| self.perspectives.contains_key(*id))
            .count()
    }

    /// Key naming exactly the perspectives this result covers.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(
            self.range,
            self.kind,
            self.question.clone(),
            self.perspective_set(),
        )
    }

    /// Union of two results for the same content.
    ///
    /// Entries already present in `self` win. The merged result takes the
    /// newer timestamp and that fragment's model version, and gets the id
    /// of the union set.
    pub fn merge(&self, other: &AnalysisResult) -> Result<AnalysisResult, GenError> {
        if self.identity != other.identity {
            return Err(GenError::IdentityMismatch {
                left: self.identity.to_hex(),
                right: other.identity.to_hex(),
            });
        }

        let mut perspectives = self.perspectives.clone();
        for (id, payload) in &other.perspectives {
            perspectives
                .entry(id.clone())
                .or_insert_with(|| payload.clone());
        }

        let newer = if other.generated_at > self.generated_at {
            other
        } else {
            self
        };
        let covered: PerspectiveSet = perspectives.keys().cloned().collect();

        Ok(AnalysisResult {
            result_id: Self::derive_id(&self.identity, &covered),
            identity: self.identity,
            range: self.range,
            kind: self.kind,
            question: self.question.clone(),
            perspectives,
            generated_at: newer.generated_at,
            provider_model_version: newer.provider_model_version.clone(),
            content_digest: self.content_digest.clone(),
        })
    }

    /// View narrowed to `wanted`. Keeps `result_id`, which still names the
    /// stored entry the view was taken from.
    pub fn restricted_to(&self, wanted: &PerspectiveSet) -> AnalysisResult {
        AnalysisResult {
            perspectives: self
                .perspectives
                .iter()
                .filter(|(id, _)| wanted.contains(id))
                .map(|(id, payload)| (id.clone(), payload.clone()))
                .collect(),
            ..self.clone()
        }
    }
}

// ============================================================================
// HISTORY
// ============================================================================

/// One successful orchestrator invocation. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// UUIDv7, sortable by creation time.
    pub record_id: Uuid,
    pub requester: RequesterRef,
    pub key: CacheKey,
    pub result_id: Uuid,
    pub requested_at: Timestamp,
    pub cache_hit: bool,
}

impl HistoryRecord {
    pub fn new(
        requester: RequesterRef,
        key: CacheKey,
        result_id: Uuid,
        requested_at: Timestamp,
        cache_hit: bool,
    ) -> Self {
        Self {
            record_id: Uuid::now_v7(),
            requester,
            key,
            result_id,
            requested_at,
            cache_hit,
        }
    }
}
