use crate::ports::Authenticator;
use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Authenticator backed by a static session map (`{"<session>": "<appId>"}`).
///
/// Sessions absent from the map are refused; with no map configured every
/// connection is refused.
pub struct SessionMapAuthenticator {
    sessions: HashMap<String, String>,
}

impl SessionMapAuthenticator {
    pub fn new(sessions: HashMap<String, String>) -> Self {
        Self { sessions }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading session map {}", path.display()))?;
        let sessions: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing session map {}", path.display()))?;
        Ok(Self::new(sessions))
    }
}

#[async_trait]
impl Authenticator for SessionMapAuthenticator {
    async fn authenticate(&self, session_id: &str) -> Option<String> {
        let app_id = self.sessions.get(session_id).cloned();
        if app_id.is_none() {
            warn!("unknown session token");
        }
        app_id
    }
}
