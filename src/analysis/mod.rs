//! Lifespan prediction and narrative analysis.
//!
//! The predictor wraps an offline-trained regression artifact; the insight
//! generator turns a sample batch (and optionally a prediction) into a prompt
//! for the Gemini text service.

pub mod gemini;
pub mod insight;
pub mod predictor;

// Re-export commonly used items
pub use gemini::{GeminiClient, GeminiConfig, TextService};
pub use insight::{InsightGenerator, FALLBACK_ANALYSIS};
pub use predictor::{LifespanPredictor, ProcessParameters};
