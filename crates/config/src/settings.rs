//! Main settings tree

use serde::{Deserialize, Serialize};

use crate::authority::AuthorityConfig;
use crate::ConfigError;

/// Retrieval method exposed through the chat-config endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMethod {
    /// Dense KNN only.
    Semantic,
    /// Dense + chunk BM25 + metadata BM25 fused with RRF.
    #[default]
    Hybrid,
}

/// Routing strategy: the full state machine or direct generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    #[default]
    Intelligent,
    Simple,
}

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub hybrid: HybridConfig,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub authority: AuthorityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9000,
            cors_origins: vec!["http://localhost:4000".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sliding inactivity timeout.
    pub timeout_minutes: u64,
    /// Background expiry sweep cadence, in seconds.
    pub sweep_interval_secs: u64,
    /// Rolling history window, in turns.
    pub window_k: usize,
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            sweep_interval_secs: 60,
            window_k: 8,
            max_sessions: 1000,
        }
    }
}

/// Router and retrieval knobs surfaced through `/chat-config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub retrieval_method: RetrievalMethod,
    pub routing_strategy: RoutingStrategy,
    pub retrieval_top_k: usize,
    /// Routing similarity threshold T.
    pub similarity_threshold: f32,
    /// Clarification budget per user question.
    pub max_clarify: u32,
    /// Re-clarification floor R; must stay strictly below T.
    pub reclarify_threshold: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            retrieval_method: RetrievalMethod::Hybrid,
            routing_strategy: RoutingStrategy::Intelligent,
            retrieval_top_k: 5,
            similarity_threshold: 0.45,
            max_clarify: 2,
            reclarify_threshold: 0.35,
        }
    }
}

/// Hybrid retriever configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    /// Candidates from dense KNN.
    pub k_embed: usize,
    /// Candidates from chunk-text BM25.
    pub k_bm25_chunk: usize,
    /// Candidate documents from metadata BM25.
    pub k_bm25_meta_docs: usize,
    /// Chunks expanded per metadata-matched document.
    pub m_chunks_per_doc: usize,
    /// Size of the fusion pool.
    pub k_rrf: usize,
    /// Returned list size.
    pub k_final: usize,
    /// RRF damping constant.
    pub rrf_c: f32,
    pub w_authority: f32,
    pub w_currency: f32,
    pub w_numbers: f32,
    pub w_freshness: f32,
    /// Freshness half-life in days for the decay term.
    pub freshness_half_life_days: f32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            k_embed: 20,
            k_bm25_chunk: 20,
            k_bm25_meta_docs: 5,
            m_chunks_per_doc: 2,
            k_rrf: 50,
            k_final: 5,
            rrf_c: 60.0,
            w_authority: 0.05,
            w_currency: 0.02,
            w_numbers: 0.02,
            w_freshness: 0.03,
            freshness_half_life_days: 180.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// OpenAI-compatible endpoint.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Per-call timeout, in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1".into(),
            api_key: None,
            model: "qwen3:4b-instruct".into(),
            embedding_model: "nomic-embed-text".into(),
            embedding_dim: 384,
            max_tokens: 1000,
            temperature: 0.2,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub qdrant_endpoint: String,
    pub collection: String,
    /// On-disk Tantivy index directory; in-RAM when empty.
    pub index_path: String,
    /// JSON file backing the document metadata store.
    pub doc_store_path: String,
    pub read_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            qdrant_endpoint: "http://localhost:6334".into(),
            collection: "parley-chunks".into(),
            index_path: String::new(),
            doc_store_path: "data/documents.json".into(),
            read_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-request total deadline, in seconds.
    pub request_deadline_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_deadline_secs: 60,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the whole tree. Every violation is a
    /// [`ConfigError::InvalidValue`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chat.validate()?;
        self.hybrid.validate()?;
        self.session.validate()?;
        self.authority.validate()?;
        if self.llm.embedding_dim == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.embedding_dim".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}

impl ChatConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "chat.similarity_threshold".into(),
                message: format!("must be in [0, 1], got {}", self.similarity_threshold),
            });
        }
        if !(0.0..=1.0).contains(&self.reclarify_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "chat.reclarify_threshold".into(),
                message: format!("must be in [0, 1], got {}", self.reclarify_threshold),
            });
        }
        // Strictly below the similarity threshold, else the router would
        // oscillate at the boundary.
        if self.reclarify_threshold >= self.similarity_threshold {
            return Err(ConfigError::InvalidValue {
                field: "chat.reclarify_threshold".into(),
                message: format!(
                    "must be strictly below similarity_threshold ({} >= {})",
                    self.reclarify_threshold, self.similarity_threshold
                ),
            });
        }
        if self.retrieval_top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chat.retrieval_top_k".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}

impl HybridConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("hybrid.k_embed", self.k_embed),
            ("hybrid.k_bm25_chunk", self.k_bm25_chunk),
            ("hybrid.k_bm25_meta_docs", self.k_bm25_meta_docs),
            ("hybrid.m_chunks_per_doc", self.m_chunks_per_doc),
            ("hybrid.k_rrf", self.k_rrf),
            ("hybrid.k_final", self.k_final),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    message: "must be positive".into(),
                });
            }
        }
        if self.rrf_c <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "hybrid.rrf_c".into(),
                message: format!("must be positive, got {}", self.rrf_c),
            });
        }
        if self.freshness_half_life_days <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "hybrid.freshness_half_life_days".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_k < 1 {
            return Err(ConfigError::InvalidValue {
                field: "session.window_k".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.timeout_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.timeout_minutes".into(),
                message: "must be positive".into(),
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.sweep_interval_secs".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}
