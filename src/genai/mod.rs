//! Generative text client used for task rewriting and suggestion.
//!
//! A trait-based abstraction over the provider, with Gemini as the only
//! implementation. Two call sites exist, each with its own fixed prompt
//! template (see [`prompts`]).

mod error;
mod gemini;
pub mod prompts;

pub use error::{classify_http_status, GenAiError, GenAiErrorKind};
pub use gemini::GeminiClient;

use async_trait::async_trait;

/// Sampling parameters for a single completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum output tokens to generate.
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 100,
        }
    }
}

/// Trait for text completion providers.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Send a single prompt and return the first candidate's text.
    async fn generate(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String, GenAiError>;
}
