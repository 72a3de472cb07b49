//! HTTP server and query-time facade
//!
//! The facade wires sessions, the router, the retriever and the
//! generator into one `ask` entry point; the HTTP layer is a thin axum
//! surface over it plus session lifecycle and configuration endpoints.

pub mod http;
pub mod service;
pub mod state;

pub use http::create_router;
pub use service::{AskResponse, AskService, ChatConfigPatch};
pub use state::AppState;
