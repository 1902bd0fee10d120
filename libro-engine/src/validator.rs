//! Provider output validation
//!
//! Raw provider segments are parsed into loose wire structs first, then
//! checked field by field and converted into the kind's payload variant.
//! Nothing that fails here reaches the store.

use libro_core::{
    AnalysisKind, CrossReference, PerspectiveAnalysis, PerspectiveId, PerspectiveSet,
    StructuredPayload, ValidationError,
};
use libro_llm::RawProviderOutput;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Validated output: exactly one payload per expected perspective.
pub type ValidatedPayloads = BTreeMap<PerspectiveId, StructuredPayload>;

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    analyses: Vec<WireAnalysis>,
}

#[derive(Debug, Deserialize)]
struct WireAnalysis {
    perspective_name: String,
    #[serde(default)]
    response_text: Option<String>,
    #[serde(default)]
    cross_references: Vec<WireReference>,
}

#[derive(Debug, Deserialize)]
struct WireReference {
    #[serde(default)]
    book: String,
    #[serde(default)]
    chapter: u32,
    #[serde(default)]
    verse_start: u32,
    #[serde(default)]
    verse_end: Option<u32>,
    #[serde(default)]
    reference_display: Option<String>,
    #[serde(default)]
    relevance_note: String,
}

/// Checks raw provider output against the requested kind and perspectives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseValidator;

impl ResponseValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate every segment of `raw`.
    ///
    /// - Unparseable JSON: `SchemaViolation` with no perspective.
    /// - A perspective that was not asked for: `UnexpectedPerspective`.
    /// - The same perspective twice, or a payload not matching `kind`:
    ///   `SchemaViolation`.
    /// - Any expected perspective absent: `IncompleteOutput`.
    pub fn validate(
        &self,
        raw: &RawProviderOutput,
        kind: AnalysisKind,
        expected: &PerspectiveSet,
    ) -> Result<ValidatedPayloads, ValidationError> {
        let mut payloads = ValidatedPayloads::new();

        for segment in &raw.segments {
            let envelope: WireEnvelope =
                serde_json::from_str(segment).map_err(|e| ValidationError::SchemaViolation {
                    perspective: None,
                    reason: format!("unparseable output: {}", e),
                })?;

            for analysis in envelope.analyses {
                let id = expected_id(&analysis.perspective_name, expected)?;
                if payloads.contains_key(&id) {
                    return Err(violation(&id, "perspective appears more than once"));
                }
                let payload = to_payload(&id, kind, analysis)?;
                payloads.insert(id, payload);
            }
        }

        let missing: Vec<PerspectiveId> = expected
            .iter()
            .filter(|id| !payloads.contains_key(*id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::IncompleteOutput { missing });
        }

        debug!(
            provider = %raw.provider_id,
            kind = %kind,
            perspectives = payloads.len(),
            "Provider output validated"
        );
        Ok(payloads)
    }
}

fn expected_id(name: &str, expected: &PerspectiveSet) -> Result<PerspectiveId, ValidationError> {
    let unexpected = || ValidationError::UnexpectedPerspective {
        perspective: name.to_string(),
    };
    let id = PerspectiveId::parse(name).map_err(|_| unexpected())?;
    if expected.contains(&id) {
        Ok(id)
    } else {
        Err(unexpected())
    }
}

fn violation(id: &PerspectiveId, reason: impl Into<String>) -> ValidationError {
    ValidationError::SchemaViolation {
        perspective: Some(id.clone()),
        reason: reason.into(),
    }
}

fn to_payload(
    id: &PerspectiveId,
    kind: AnalysisKind,
    analysis: WireAnalysis,
) -> Result<StructuredPayload, ValidationError> {
    let references = analysis
        .cross_references
        .into_iter()
        .enumerate()
        .map(|(index, wire)| to_reference(id, index, wire))
        .collect::<Result<Vec<_>, _>>()?;

    match kind {
        AnalysisKind::CrossReference => {
            if references.is_empty() {
                return Err(violation(id, "at least one cross reference is required"));
            }
            Ok(StructuredPayload::CrossReferences { references })
        }
        AnalysisKind::Summary | AnalysisKind::Question => {
            let text = analysis
                .response_text
                .map(|t| t.trim().to_string())
                .unwrap_or_default();
            if text.is_empty() {
                return Err(violation(id, "analysis text is empty"));
            }
            let body = PerspectiveAnalysis {
                response_text: text,
                cross_references: references,
            };
            Ok(match kind {
                AnalysisKind::Question => StructuredPayload::Answer(body),
                _ => StructuredPayload::Summary(body),
            })
        }
    }
}

fn to_reference(
    id: &PerspectiveId,
    index: usize,
    wire: WireReference,
) -> Result<CrossReference, ValidationError> {
    let book = wire.book.trim();
    if book.is_empty() {
        return Err(violation(id, format!("cross reference {} has no book", index)));
    }
    if wire.chapter == 0 || wire.verse_start == 0 {
        return Err(violation(
            id,
            format!("cross reference {} has no chapter or verse", index),
        ));
    }
    if let Some(end) = wire.verse_end {
        if end < wire.verse_start {
            return Err(violation(
                id,
                format!(
                    "cross reference {} ends at verse {} before it starts at {}",
                    index, end, wire.verse_start
                ),
            ));
        }
    }
    let note = wire.relevance_note.trim();
    if note.is_empty() {
        return Err(violation(
            id,
            format!("cross reference {} has no relevance note", index),
        ));
    }

    let display = wire
        .reference_display
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| {
            CrossReference::format_display(book, wire.chapter, wire.verse_start, wire.verse_end)
        });

    Ok(CrossReference {
        book: book.to_string(),
        chapter: wire.chapter,
        verse_start: wire.verse_start,
        verse_end: wire.verse_end,
        reference_display: display,
        relevance_note: note.to_string(),
    })
}
