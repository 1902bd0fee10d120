//! Error types for Libro operations

use crate::{AnalysisKind, PerspectiveId, VerseId};
use std::time::Duration;
use thiserror::Error;

/// Request validation errors. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("At least one perspective is required")]
    EmptyPerspectives,

    #[error("Perspective listed more than once: {perspective}")]
    DuplicatePerspective { perspective: PerspectiveId },

    #[error("Unknown perspective: {perspective}")]
    UnknownPerspective { perspective: String },

    #[error("Invalid perspective id {value:?}: {reason}")]
    InvalidPerspectiveId { value: String, reason: String },

    #[error("Inverted verse range: start {start} is after end {end}")]
    InvertedRange { start: VerseId, end: VerseId },

    #[error("A question is required for {kind} analysis")]
    MissingQuestion { kind: AnalysisKind },

    #[error("A question is not accepted for {kind} analysis")]
    UnexpectedQuestion { kind: AnalysisKind },

    #[error("Question text is empty")]
    EmptyQuestion,
}

/// Content collaborator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error("Verse not found: {verse_id}")]
    NotFound { verse_id: VerseId },

    #[error("Content source unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Whether a provider failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorClass {
    Transient,
    Permanent,
}

/// External analysis provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("No analysis provider configured")]
    NotConfigured,

    #[error("Call to {provider} timed out after {after_ms}ms")]
    Timeout { provider: String, after_ms: u64 },

    #[error("Rate limited by {provider}, retry after {retry_after_ms:?}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Network error talking to {provider}: {message}")]
    Network { provider: String, message: String },

    #[error("{provider} returned server error {status}: {message}")]
    ServerError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} rejected the request with status {status}: {message}")]
    Rejected {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Invalid API key for {provider}")]
    Unauthorized { provider: String },

    #[error("Quota exhausted for {provider}: {message}")]
    QuotaExhausted { provider: String, message: String },

    #[error("Request to {provider} too large for {perspectives} perspectives")]
    PayloadTooLarge { provider: String, perspectives: usize },

    #[error("Invalid response envelope from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Classify this failure for retry decisions.
    pub fn class(&self) -> ProviderErrorClass {
        match self {
            ProviderError::Timeout { .. }
            | ProviderError::RateLimited { .. }
            | ProviderError::Network { .. }
            | ProviderError::ServerError { .. } => ProviderErrorClass::Transient,
            ProviderError::RetriesExhausted { last, .. } => last.class(),
            ProviderError::NotConfigured
            | ProviderError::Rejected { .. }
            | ProviderError::Unauthorized { .. }
            | ProviderError::QuotaExhausted { .. }
            | ProviderError::PayloadTooLarge { .. }
            | ProviderError::InvalidResponse { .. } => ProviderErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ProviderErrorClass::Transient
    }

    /// Server-provided minimum delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// Provider output validation errors. Invalid output is never persisted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Provider output is missing perspectives: {missing:?}")]
    IncompleteOutput { missing: Vec<PerspectiveId> },

    #[error("Provider output contains unexpected perspective: {perspective}")]
    UnexpectedPerspective { perspective: String },

    #[error("Schema violation for {perspective:?}: {reason}")]
    SchemaViolation {
        perspective: Option<PerspectiveId>,
        reason: String,
    },
}

/// Result store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Result store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Result does not match key: expected {expected}, got {got}")]
    KeyMismatch { expected: String, got: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load perspective catalog from {path}: {reason}")]
    CatalogLoad { path: String, reason: String },

    #[error("Failed to initialize tracing: {reason}")]
    TelemetryInit { reason: String },
}

/// Outcome error of one coordinated generation. Cloned to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Stopped waiting for generation after {waited_ms}ms")]
    WaitTimedOut { waited_ms: u64 },

    #[error("Generation ended without publishing an outcome")]
    Abandoned,

    #[error("Cannot merge results for different content: {left} and {right}")]
    IdentityMismatch { left: String, right: String },
}

/// How a caller should treat a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// The request itself is wrong; do not retry.
    InvalidRequest,
    /// Referenced content does not exist.
    NotFound,
    /// Temporary condition; retry later.
    RetryLater,
    /// The provider produced unusable output or refused permanently.
    UpstreamFailure,
    /// A local dependency (store, configuration) is failing.
    Degraded,
}

/// Master error type for orchestrated analysis requests.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("Invalid request: {0}")]
    Request(#[from] RequestError),

    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Upstream failure: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Timed out waiting for analysis after {waited_ms}ms")]
    WaitTimedOut { waited_ms: u64 },

    #[error("Analysis generation was abandoned")]
    Abandoned,

    #[error("Inconsistent results: {reason}")]
    Inconsistent { reason: String },
}

impl From<GenError> for OrchestratorError {
    fn from(e: GenError) -> Self {
        match e {
            GenError::Request(e) => OrchestratorError::Request(e),
            GenError::Content(e) => OrchestratorError::Content(e),
            GenError::Provider(e) => OrchestratorError::Provider(e),
            GenError::Validation(e) => OrchestratorError::Validation(e),
            GenError::Store(e) => OrchestratorError::Store(e),
            GenError::WaitTimedOut { waited_ms } => OrchestratorError::WaitTimedOut { waited_ms },
            GenError::Abandoned => OrchestratorError::Abandoned,
            e @ GenError::IdentityMismatch { .. } => OrchestratorError::Inconsistent {
                reason: e.to_string(),
            },
        }
    }
}

impl OrchestratorError {
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            OrchestratorError::Request(_) => ErrorDisposition::InvalidRequest,
            OrchestratorError::Content(ContentError::NotFound { .. }) => ErrorDisposition::NotFound,
            OrchestratorError::Content(ContentError::Unavailable { .. }) => {
                ErrorDisposition::RetryLater
            }
            OrchestratorError::Provider(e) => match e.class() {
                ProviderErrorClass::Transient => ErrorDisposition::RetryLater,
                ProviderErrorClass::Permanent => ErrorDisposition::UpstreamFailure,
            },
            OrchestratorError::Validation(_) => ErrorDisposition::UpstreamFailure,
            OrchestratorError::WaitTimedOut { .. } | OrchestratorError::Abandoned => {
                ErrorDisposition::RetryLater
            }
            OrchestratorError::Store(_)
            | OrchestratorError::Config(_)
            | OrchestratorError::Inconsistent { .. } => ErrorDisposition::Degraded,
        }
    }

    /// HTTP status a request layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            OrchestratorError::Request(_) => 400,
            OrchestratorError::Content(ContentError::NotFound { .. }) => 404,
            OrchestratorError::WaitTimedOut { .. } => 504,
            OrchestratorError::Config(_) | OrchestratorError::Inconsistent { .. } => 500,
            _ => match self.disposition() {
                ErrorDisposition::UpstreamFailure => 502,
                _ => 503,
            },
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self.disposition() {
            ErrorDisposition::InvalidRequest => "INVALID_REQUEST",
            ErrorDisposition::NotFound => "NOT_FOUND",
            ErrorDisposition::RetryLater => "TRY_AGAIN_LATER",
            ErrorDisposition::UpstreamFailure => "UPSTREAM_FAILURE",
            ErrorDisposition::Degraded => "SERVICE_DEGRADED",
        }
    }
}

/// Result type alias for orchestrated operations.
pub type LibroResult<T> = Result<T, OrchestratorError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

// =============================================================================
// TESTS
// =============================================================================
