//! The `LanguageModel` trait

use async_trait::async_trait;

use crate::LlmError;

/// Per-call chat options.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            temperature: 0.2,
        }
    }
}

/// The two operations the core needs from a language model. Injected at
/// the facade; the core never reaches the network any other way.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Embed a text into a fixed-dimension vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// One chat completion: system prompt, user message, options.
    async fn chat(
        &self,
        system: &str,
        user: &str,
        options: &ChatOptions,
    ) -> Result<String, LlmError>;

    /// Cheap liveness probe for the health endpoint.
    async fn is_available(&self) -> bool;

    fn model_name(&self) -> &str;
}
