//! Google Gemini provider implementation
//!
//! Structured-output analysis through the `generateContent` endpoint.

pub mod analysis;
pub mod client;
pub mod prompt;
pub mod types;

pub use analysis::GeminiAnalysisProvider;
pub use client::GeminiClient;
