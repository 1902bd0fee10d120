//! Canonical cache keys.

use crate::{compute_content_hash, AnalysisKind, ContentHash, PerspectiveSet, VerseRange};
use serde::{Deserialize, Serialize};
use std::fmt;

const IDENTITY_DOMAIN: &str = "libro/identity/v1";
const FINGERPRINT_DOMAIN: &str = "libro/fingerprint/v1";

/// Trim, collapse internal whitespace runs to a single space and lowercase.
///
/// Whitespace and case variants of one question collide; any other
/// difference keeps them apart.
pub fn normalize_question(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Digest of (range, kind, normalized question).
///
/// Every stored result for the same passage, kind and question shares one
/// identity regardless of which perspectives it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentIdentity(#[serde(with = "hex::serde")] ContentHash);

impl ContentIdentity {
    pub fn compute(range: VerseRange, kind: AnalysisKind, question: Option<&str>) -> Self {
        let material = format!(
            "{}|{}|{}|{}|{}",
            IDENTITY_DOMAIN,
            range.start,
            range.end,
            kind.as_db_str(),
            match question {
                Some(q) => format!("q:{}", q),
                None => "-".to_string(),
            }
        );
        Self(compute_content_hash(material.as_bytes()))
    }

    pub fn from_bytes(bytes: ContentHash) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &ContentHash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Canonical key of an analysis request.
///
/// Built from the content identity plus the canonically ordered perspective
/// set, so the order in which a caller listed perspectives never changes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    identity: ContentIdentity,
    range: VerseRange,
    kind: AnalysisKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    question: Option<String>,
    perspectives: PerspectiveSet,
}

impl CacheKey {
    /// Build a key. `question` must already be normalized.
    pub fn new(
        range: VerseRange,
        kind: AnalysisKind,
        question: Option<String>,
        perspectives: PerspectiveSet,
    ) -> Self {
        Self {
            identity: ContentIdentity::compute(range, kind, question.as_deref()),
            range,
            kind,
            question,
            perspectives,
        }
    }

    pub fn identity(&self) -> ContentIdentity {
        self.identity
    }

    pub fn range(&self) -> VerseRange {
        self.range
    }

    pub fn kind(&self) -> AnalysisKind {
        self.kind
    }

    pub fn question(&self) -> Option<&str> {
        self.question.as_deref()
    }

    pub fn perspectives(&self) -> &PerspectiveSet {
        &self.perspectives
    }

    /// Same identity, different perspective set.
    pub fn with_perspectives(&self, perspectives: PerspectiveSet) -> Self {
        Self {
            perspectives,
            ..self.clone()
        }
    }

    /// Digest of the perspective set alone.
    pub fn perspective_digest(&self) -> ContentHash {
        perspective_digest(&self.perspectives)
    }

    /// Full fingerprint over identity and perspectives, hex encoded.
    pub fn fingerprint(&self) -> String {
        let material = format!(
            "{}|{}|{}",
            FINGERPRINT_DOMAIN,
            self.identity.to_hex(),
            self.perspectives.joined()
        );
        hex::encode(compute_content_hash(material.as_bytes()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.fingerprint())
    }
}

/// Digest of a canonically ordered perspective set.
pub fn perspective_digest(perspectives: &PerspectiveSet) -> ContentHash {
    compute_content_hash(perspectives.joined().as_bytes())
}
