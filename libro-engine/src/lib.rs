//! Libro Engine - Analysis Generation & Caching
//!
//! Turns analysis requests into stored, validated, per-perspective analyses:
//!
//! - [`ContentKeyResolver`] validates a request and derives its cache key.
//! - [`SingleFlightCoordinator`] makes concurrent requests for the same
//!   content share one provider call per perspective.
//! - [`ResponseValidator`] rejects provider output that does not match the
//!   requested kind and perspectives.
//! - [`AnalysisOrchestrator`] ties these to the result store, the content
//!   source and the provider client.

pub mod orchestrator;
pub mod resolver;
pub mod single_flight;
pub mod telemetry;
pub mod validator;

pub use orchestrator::AnalysisOrchestrator;
pub use resolver::{display_question, ContentKeyResolver};
pub use single_flight::{FlightOutcome, SingleFlightCoordinator};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use validator::{ResponseValidator, ValidatedPayloads};
