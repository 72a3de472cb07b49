//! Application state
//!
//! One process-wide dependency graph, built once at startup and injected
//! everywhere. Configuration is read-mostly behind an `RwLock`; updates
//! take the write lock and the routing/retrieval paths re-read per
//! request, so there are no stale derived caches.

use std::sync::Arc;

use parking_lot::RwLock;

use parley_config::Settings;
use parley_index::IndexAdapter;
use parley_llm::{ChatOptions, LanguageModel};
use parley_retrieval::HybridRetriever;
use parley_router::Router;
use parley_session::SessionManager;

use crate::service::AskService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<Settings>>,
    pub sessions: Arc<SessionManager>,
    pub service: Arc<AskService>,
    pub index: Arc<dyn IndexAdapter>,
    pub llm: Arc<dyn LanguageModel>,
}

impl AppState {
    /// Wire the dependency graph from validated settings and the two
    /// injected collaborators.
    pub fn new(
        settings: Settings,
        index: Arc<dyn IndexAdapter>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        let config = Arc::new(RwLock::new(settings.clone()));
        let sessions = Arc::new(SessionManager::new(settings.session.clone()));
        let options = ChatOptions {
            max_tokens: settings.llm.max_tokens,
            temperature: settings.llm.temperature,
        };
        let retriever = Arc::new(HybridRetriever::new(index.clone(), llm.clone()));
        let router = Router::new(retriever, llm.clone(), options);
        let service = Arc::new(AskService::new(
            router,
            sessions.clone(),
            config.clone(),
        ));
        Self {
            config,
            sessions,
            service,
            index,
            llm,
        }
    }
}
