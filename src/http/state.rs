use crate::engines::Engines;
use crate::session::{SessionConfig, SessionSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Per-session settings applied to every new connection
    pub session_config: Arc<SessionConfig>,

    /// STT/LLM/TTS collaborators, shared by all sessions
    pub engines: Engines,

    /// Live sessions (session_id → snapshot feed)
    pub sessions: Arc<RwLock<HashMap<String, watch::Receiver<SessionSnapshot>>>>,
}

impl AppState {
    pub fn new(session_config: SessionConfig, engines: Engines) -> Self {
        Self {
            session_config: Arc::new(session_config),
            engines,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Snapshots of every connected session
    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<SessionSnapshot> =
            sessions.values().map(|rx| rx.borrow().clone()).collect();
        list.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        list
    }
}
