//! Analysis provider implementations
//!
//! Concrete implementations of the AnalysisProvider trait.

pub mod gemini;

pub use gemini::{GeminiAnalysisProvider, GeminiClient};
