//! OpenAI-compatible HTTP backend
//!
//! Works against OpenAI, vLLM, Ollama's `/v1` surface and anything else
//! speaking the chat-completions and embeddings protocol. Transport
//! failures get exactly one retry; timeouts and API errors surface
//! immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use parley_config::LlmSettings;

use crate::client::{ChatOptions, LanguageModel};
use crate::LlmError;

/// Backend configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub timeout: Duration,
}

impl From<&LlmSettings> for OpenAiConfig {
    fn from(settings: &LlmSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            embedding_model: settings.embedding_model.clone(),
            embedding_dim: settings.embedding_dim,
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

/// OpenAI-compatible client.
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// POST with the single-retry policy on transport errors.
    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, LlmError> {
        let mut last_error = None;
        for attempt in 0..2 {
            if attempt > 0 {
                tracing::warn!(path, "LLM transport error, retrying once");
            }
            match self.execute::<Req, Resp>(path, request).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| LlmError::Network("retry exhausted".into())))
    }

    async fn execute<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, LlmError> {
        let response = self
            .apply_auth(self.client.post(self.url(path)))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 5xx counts as transport trouble; 4xx is a caller bug.
            if status.is_server_error() {
                return Err(LlmError::Network(format!("server error {status}: {body}")));
            }
            return Err(LlmError::Api(format!("HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = EmbeddingRequest {
            model: self.config.embedding_model.clone(),
            input: text.to_string(),
        };
        let response: EmbeddingResponse = self.post_json("/embeddings", &request).await?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::InvalidResponse("no embedding in response".into()))?;
        if embedding.len() != self.config.embedding_dim {
            return Err(LlmError::InvalidResponse(format!(
                "embedding dimension mismatch: got {}, expected {}",
                embedding.len(),
                self.config.embedding_dim
            )));
        }
        Ok(embedding)
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        options: &ChatOptions,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: user.to_string(),
                },
            ],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };
        let response: ChatResponse = self.post_json("/chat/completions", &request).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".into()))
    }

    async fn is_available(&self) -> bool {
        let url = self.url("/models");
        self.apply_auth(self.client.get(url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
