//! Deterministic mock backend for tests and offline development
//!
//! Embeddings are a pure function of the input text (token hashing into a
//! fixed number of buckets, L2-normalized), so retrieval over the mock is
//! fully deterministic. Chat responses are scripted: callers queue them in
//! the order the code under test will consume them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{ChatOptions, LanguageModel};
use crate::LlmError;

pub struct MockLanguageModel {
    dim: usize,
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    fail_embeddings: AtomicBool,
    available: AtomicBool,
    /// Every prompt handed to `chat`, for assertions.
    pub chat_log: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            responses: Mutex::new(VecDeque::new()),
            fail_embeddings: AtomicBool::new(false),
            available: AtomicBool::new(true),
            chat_log: Mutex::new(Vec::new()),
        }
    }

    /// Queue the next chat response.
    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().push_back(Ok(response.into()));
    }

    /// Queue a chat failure.
    pub fn push_error(&self, error: LlmError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Make `embed` fail, driving the retriever into BM25-only mode.
    pub fn set_fail_embeddings(&self, fail: bool) {
        self.fail_embeddings.store(fail, Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// The same hashing the mock uses internally, exposed so tests can
    /// seed index vectors that agree with query embeddings.
    pub fn embedding_of(text: &str, dim: usize) -> Vec<f32> {
        let mut vector = vec![0.0f32; dim];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            vector[(hash % dim as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if self.fail_embeddings.load(Ordering::SeqCst) {
            return Err(LlmError::Network("mock embedding failure".into()));
        }
        Ok(Self::embedding_of(text, self.dim))
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        _options: &ChatOptions,
    ) -> Result<String, LlmError> {
        self.chat_log.lock().push(format!("{system}\n{user}"));
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Api("no scripted response queued".into())))
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
