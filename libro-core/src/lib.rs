//! Libro Core - Analysis Types
//!
//! Data types shared by every Libro crate: requests, cache keys, structured
//! analysis payloads, stored results, history records, the content
//! collaborator seam, errors and configuration.
//! No I/O happens here apart from loading configuration files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub mod analysis;
pub mod config;
pub mod content;
pub mod error;
pub mod key;
pub mod perspective;

pub use analysis::{
    AnalysisResult, CrossReference, HistoryRecord, PerspectiveAnalysis, StructuredPayload,
};
pub use config::{
    CoordinatorConfig, EngineConfig, ProviderConfig, RetryConfig, StoreConfig,
};
pub use content::{ContentSource, InMemoryContentSource, PassageContext, StrongsAnnotation, VerseText};
pub use error::{
    ConfigError, ContentError, ErrorDisposition, GenError, LibroResult, OrchestratorError,
    ProviderError, ProviderErrorClass, ProviderResult, RequestError, StoreError, StoreResult,
    ValidationError,
};
pub use key::{normalize_question, CacheKey, ContentIdentity};
pub use perspective::{PerspectiveCatalog, PerspectiveId, PerspectiveProfile, PerspectiveSet};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Identifier of a single verse in the content store.
pub type VerseId = u32;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash.
pub type ContentHash = [u8; 32];

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Inclusive range of verse ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VerseRange {
    pub start: VerseId,
    pub end: VerseId,
}

impl VerseRange {
    pub fn new(start: VerseId, end: VerseId) -> Self {
        Self { start, end }
    }

    pub fn single(id: VerseId) -> Self {
        Self { start: id, end: id }
    }

    pub fn is_inverted(&self) -> bool {
        self.start > self.end
    }

    /// Number of verses covered. Zero for inverted ranges.
    pub fn len(&self) -> u64 {
        if self.is_inverted() {
            0
        } else {
            u64::from(self.end - self.start) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> impl Iterator<Item = VerseId> {
        self.start..=self.end
    }
}

impl fmt::Display for VerseRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

// ============================================================================
// ANALYSIS KIND
// ============================================================================

/// The three kinds of analysis the engine produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Summary,
    Question,
    CrossReference,
}

impl AnalysisKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AnalysisKind::Summary => "summary",
            AnalysisKind::Question => "question",
            AnalysisKind::CrossReference => "cross_reference",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "summary" => Some(AnalysisKind::Summary),
            "question" => Some(AnalysisKind::Question),
            "cross_reference" | "cross_references" => Some(AnalysisKind::CrossReference),
            _ => None,
        }
    }

    /// Question analyses are the only kind that carry question text.
    pub fn requires_question(&self) -> bool {
        matches!(self, AnalysisKind::Question)
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

// ============================================================================
// REQUEST
// ============================================================================

/// Opaque reference to whoever asked; only used for history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterRef(String);

impl RequesterRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequesterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A caller's request for analysis, before validation.
///
/// `perspectives` keeps the caller's order and may contain duplicates or
/// unknown ids; `ContentKeyResolver` rejects those.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub range: VerseRange,
    pub kind: AnalysisKind,
    pub perspectives: Vec<PerspectiveId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

impl AnalysisRequest {
    pub fn summary(range: VerseRange, perspectives: Vec<PerspectiveId>) -> Self {
        Self {
            range,
            kind: AnalysisKind::Summary,
            perspectives,
            question: None,
        }
    }

    pub fn question(
        range: VerseRange,
        perspectives: Vec<PerspectiveId>,
        question: impl Into<String>,
    ) -> Self {
        Self {
            range,
            kind: AnalysisKind::Question,
            perspectives,
            question: Some(question.into()),
        }
    }

    pub fn cross_references(range: VerseRange, perspectives: Vec<PerspectiveId>) -> Self {
        Self {
            range,
            kind: AnalysisKind::CrossReference,
            perspectives,
            question: None,
        }
    }
}
