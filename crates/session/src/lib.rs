//! Session lifecycle and conversational memory
//!
//! Sessions are created lazily on first request, carry a sliding
//! inactivity timeout, and own the per-question conversational state the
//! router consumes. A background sweeper destroys expired sessions; it
//! must win the session's request lock first, so a session in active use
//! is never destroyed mid-request.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use parley_config::SessionConfig;
use parley_core::{RetrievedPassage, Turn};

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session capacity reached ({0})")]
    CapacityReached(usize),
}

impl From<SessionError> for parley_core::Error {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(id) => parley_core::Error::SessionNotFound(id),
            SessionError::CapacityReached(n) => {
                parley_core::Error::ConfigurationInvalid(format!("session capacity reached: {n}"))
            }
        }
    }
}

/// Per-question conversational state the router reads and writes.
#[derive(Debug, Default, Clone)]
pub struct ConversationState {
    /// Clarifications asked for the currently pending question.
    pub clarify_count: u32,
    /// The question a clarification is pending for.
    pub pending_question: Option<String>,
    /// The clarification the assistant asked last.
    pub last_clarification: Option<String>,
    /// Short topic anchor proposed during clarification.
    pub focus_hint: Option<String>,
    /// Snapshot of the last retrieval, for diagnostics and clarify
    /// fallbacks.
    pub last_retrieval: Vec<RetrievedPassage>,
}

/// One user session.
pub struct Session {
    pub id: String,
    created_at: DateTime<Utc>,
    last_activity: RwLock<DateTime<Utc>>,
    timeout: Duration,
    window_k: usize,
    history: RwLock<VecDeque<Turn>>,
    pub conversation: Mutex<ConversationState>,
    /// Serializes requests per session; also taken by the sweeper before
    /// destruction.
    request_lock: tokio::sync::Mutex<()>,
}

impl Session {
    fn new(timeout: Duration, window_k: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            last_activity: RwLock::new(now),
            timeout,
            window_k,
            history: RwLock::new(VecDeque::new()),
            conversation: Mutex::new(ConversationState::default()),
            request_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read()
    }

    pub fn timeout_minutes(&self) -> u64 {
        self.timeout.as_secs() / 60
    }

    /// Advance `last_activity`. Monotonic: never moves backwards.
    pub fn touch(&self) {
        let now = Utc::now();
        let mut last = self.last_activity.write();
        if now > *last {
            *last = now;
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let deadline = *self.last_activity.read()
            + chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::zero());
        deadline < now
    }

    /// Seconds until expiry at the current activity timestamp.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        let deadline = *self.last_activity.read()
            + chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::zero());
        (deadline - now).num_seconds().max(0) as u64
    }

    pub fn history(&self) -> Vec<Turn> {
        self.history.read().iter().cloned().collect()
    }

    pub fn turn_count(&self) -> usize {
        self.history.read().len()
    }

    /// Append a turn and trim to the window.
    pub fn append_turn(&self, turn: Turn) {
        let mut history = self.history.write();
        history.push_back(turn);
        while history.len() > self.window_k {
            history.pop_front();
        }
    }

    /// Replace the history wholesale (used to seed a fresh session from
    /// client-supplied history). Trims to the window.
    pub fn seed_history(&self, turns: Vec<Turn>) {
        let mut history = self.history.write();
        history.clear();
        for turn in turns.into_iter() {
            history.push_back(turn);
            while history.len() > self.window_k {
                history.pop_front();
            }
        }
    }

    /// Cooperative per-session request guard.
    pub async fn lock_request(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.request_lock.lock().await
    }
}

/// Serializable session info for the HTTP surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: String,
    pub last_activity: String,
    pub remaining_time: u64,
    pub timeout_minutes: u64,
    pub turn_count: usize,
}

/// Owns every live session.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a new session with the configured timeout.
    pub fn create(&self) -> Result<Arc<Session>, SessionError> {
        self.create_with_timeout(Duration::from_secs(self.config.timeout_minutes * 60))
    }

    /// Create a session with an explicit inactivity timeout.
    pub fn create_with_timeout(&self, timeout: Duration) -> Result<Arc<Session>, SessionError> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.config.max_sessions {
            self.remove_expired(&mut sessions);
            if sessions.len() >= self.config.max_sessions {
                return Err(SessionError::CapacityReached(self.config.max_sessions));
            }
        }
        let session = Arc::new(Session::new(timeout, self.config.window_k));
        sessions.insert(session.id.clone(), session.clone());
        tracing::info!(session_id = %session.id, "session created");
        Ok(session)
    }

    /// Look up a session and mark it active. An expired session is
    /// destroyed and reported as not found.
    pub fn get(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        let session = {
            let sessions = self.sessions.read();
            sessions.get(id).cloned()
        }
        .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        if session.is_expired(Utc::now()) {
            self.end(id);
            return Err(SessionError::NotFound(id.to_string()));
        }
        session.touch();
        Ok(session)
    }

    /// Session info without advancing activity.
    pub fn info(&self, id: &str) -> Result<SessionInfo, SessionError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let now = Utc::now();
        if session.is_expired(now) {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(SessionInfo {
            session_id: session.id.clone(),
            created_at: session.created_at().to_rfc3339(),
            last_activity: session.last_activity().to_rfc3339(),
            remaining_time: session.remaining_seconds(now),
            timeout_minutes: session.timeout_minutes(),
            turn_count: session.turn_count(),
        })
    }

    /// Explicit activity nudge; returns the refreshed remaining seconds.
    pub fn extend(&self, id: &str) -> Result<u64, SessionError> {
        let session = self.get(id)?;
        Ok(session.remaining_seconds(Utc::now()))
    }

    /// Idempotent destroy.
    pub fn end(&self, id: &str) {
        if self.sessions.write().remove(id).is_some() {
            tracing::info!(session_id = %id, "session ended");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn active_infos(&self) -> Vec<SessionInfo> {
        let now = Utc::now();
        let sessions = self.sessions.read();
        let mut infos: Vec<SessionInfo> = sessions
            .values()
            .filter(|s| !s.is_expired(now))
            .map(|s| SessionInfo {
                session_id: s.id.clone(),
                created_at: s.created_at().to_rfc3339(),
                last_activity: s.last_activity().to_rfc3339(),
                remaining_time: s.remaining_seconds(now),
                timeout_minutes: s.timeout_minutes(),
                turn_count: s.turn_count(),
            })
            .collect();
        infos.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        infos
    }

    fn remove_expired(&self, sessions: &mut HashMap<String, Arc<Session>>) {
        let now = Utc::now();
        sessions.retain(|id, session| {
            let keep = !session.is_expired(now);
            if !keep {
                tracing::info!(session_id = %id, "session expired");
            }
            keep
        });
    }

    /// One sweep: destroy expired sessions whose request lock can be
    /// taken immediately. A session mid-request is left for the next
    /// sweep.
    pub fn sweep_once(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<Arc<Session>> = {
            let sessions = self.sessions.read();
            sessions
                .values()
                .filter(|s| s.is_expired(now))
                .cloned()
                .collect()
        };
        let mut removed = 0;
        for session in expired {
            match session.request_lock.try_lock() {
                Ok(_guard) => {
                    self.end(&session.id);
                    removed += 1;
                }
                Err(_) => {
                    tracing::debug!(session_id = %session.id, "expired session busy, skipping");
                }
            }
        }
        removed
    }

    /// Spawn the background expiry sweeper. Returns the shutdown handle.
    pub fn start_sweeper(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let interval = Duration::from_secs(self.config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = manager.sweep_once();
                        if removed > 0 {
                            tracing::info!(removed, remaining = manager.count(), "session sweep");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("session sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        });
        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_timeout(timeout_minutes: u64) -> SessionManager {
        SessionManager::new(SessionConfig {
            timeout_minutes,
            sweep_interval_secs: 60,
            window_k: 4,
            max_sessions: 10,
        })
    }

    #[test]
    fn create_get_end_get_round_trip() {
        let manager = manager_with_timeout(30);
        let session = manager.create().unwrap();
        let id = session.id.clone();
        assert!(manager.get(&id).is_ok());
        manager.end(&id);
        assert!(matches!(manager.get(&id), Err(SessionError::NotFound(_))));
        // Idempotent.
        manager.end(&id);
    }

    #[test]
    fn extend_on_fresh_session_returns_full_timeout() {
        let manager = manager_with_timeout(30);
        let session = manager.create().unwrap();
        let remaining = manager.extend(&session.id).unwrap();
        assert!(remaining >= 30 * 60 - 1);
        assert!(remaining <= 30 * 60);
    }

    #[test]
    fn last_activity_is_monotonic() {
        let manager = manager_with_timeout(30);
        let session = manager.create().unwrap();
        let before = session.last_activity();
        session.touch();
        let after = session.last_activity();
        assert!(after >= before);
        // Direct touch never regresses either.
        session.touch();
        assert!(session.last_activity() >= after);
    }

    #[test]
    fn history_trims_to_window() {
        let manager = manager_with_timeout(30);
        let session = manager.create().unwrap();
        for i in 0..10 {
            session.append_turn(Turn::user(format!("turn {i}")));
        }
        let history = session.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].text, "turn 6");
        assert_eq!(history[3].text, "turn 9");
    }

    #[test]
    fn seeded_history_trims_too() {
        let manager = manager_with_timeout(30);
        let session = manager.create().unwrap();
        session.seed_history((0..7).map(|i| Turn::user(format!("t{i}"))).collect());
        assert_eq!(session.turn_count(), 4);
    }

    #[test]
    fn session_ids_are_opaque_and_distinct() {
        let manager = manager_with_timeout(30);
        let a = manager.create().unwrap();
        let b = manager.create().unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.id.len() >= 32);
    }

    #[tokio::test]
    async fn expired_session_is_not_found_and_swept() {
        let manager = Arc::new(SessionManager::new(SessionConfig {
            timeout_minutes: 1,
            sweep_interval_secs: 1,
            window_k: 4,
            max_sessions: 10,
        }));
        let session = manager.create().unwrap();
        // Force expiry by rewinding last_activity beyond the timeout.
        *session.last_activity.write() = Utc::now() - chrono::Duration::minutes(2);
        assert!(session.is_expired(Utc::now()));
        assert!(matches!(
            manager.get(&session.id),
            Err(SessionError::NotFound(_))
        ));
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn sweeper_skips_sessions_mid_request() {
        let manager = Arc::new(manager_with_timeout(1));
        let session = manager.create().unwrap();
        *session.last_activity.write() = Utc::now() - chrono::Duration::minutes(5);
        let guard = session.lock_request().await;
        assert_eq!(manager.sweep_once(), 0);
        drop(guard);
        assert_eq!(manager.sweep_once(), 1);
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn capacity_is_enforced() {
        let manager = SessionManager::new(SessionConfig {
            timeout_minutes: 30,
            sweep_interval_secs: 60,
            window_k: 4,
            max_sessions: 2,
        });
        manager.create().unwrap();
        manager.create().unwrap();
        assert!(matches!(
            manager.create(),
            Err(SessionError::CapacityReached(2))
        ));
    }
}
