//! Request validation and canonical key derivation.

use libro_core::{
    normalize_question, AnalysisRequest, CacheKey, PerspectiveCatalog, PerspectiveSet,
    RequestError,
};
use std::sync::Arc;

/// Turns an [`AnalysisRequest`] into its canonical [`CacheKey`].
///
/// Pure: no I/O, no clock. Perspectives must be known to the catalog and
/// listed at most once; their order never affects the key. Question text is
/// required for Question analyses and rejected for the other kinds.
#[derive(Debug, Clone)]
pub struct ContentKeyResolver {
    catalog: Arc<PerspectiveCatalog>,
}

impl ContentKeyResolver {
    pub fn new(catalog: Arc<PerspectiveCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &PerspectiveCatalog {
        &self.catalog
    }

    pub fn resolve(&self, request: &AnalysisRequest) -> Result<CacheKey, RequestError> {
        if request.range.is_inverted() {
            return Err(RequestError::InvertedRange {
                start: request.range.start,
                end: request.range.end,
            });
        }

        let perspectives = self.perspective_set(request)?;
        let question = Self::question_for(request)?;

        Ok(CacheKey::new(
            request.range,
            request.kind,
            question,
            perspectives,
        ))
    }

    fn perspective_set(&self, request: &AnalysisRequest) -> Result<PerspectiveSet, RequestError> {
        if request.perspectives.is_empty() {
            return Err(RequestError::EmptyPerspectives);
        }

        let mut set = PerspectiveSet::new();
        for id in &request.perspectives {
            if !self.catalog.contains(id) {
                return Err(RequestError::UnknownPerspective {
                    perspective: id.to_string(),
                });
            }
            if !set.insert(id.clone()) {
                return Err(RequestError::DuplicatePerspective {
                    perspective: id.clone(),
                });
            }
        }
        Ok(set)
    }

    fn question_for(request: &AnalysisRequest) -> Result<Option<String>, RequestError> {
        match (request.kind.requires_question(), request.question.as_deref()) {
            (true, None) => Err(RequestError::MissingQuestion { kind: request.kind }),
            (true, Some(text)) => {
                let normalized = normalize_question(text);
                if normalized.is_empty() {
                    Err(RequestError::EmptyQuestion)
                } else {
                    Ok(Some(normalized))
                }
            }
            (false, Some(_)) => Err(RequestError::UnexpectedQuestion { kind: request.kind }),
            (false, None) => Ok(None),
        }
    }
}

/// Question as sent to the provider: whitespace collapsed, case kept.
pub fn display_question(question: &str) -> String {
    question.split_whitespace().collect::<Vec<_>>().join(" ")
}
