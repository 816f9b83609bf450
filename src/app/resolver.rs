use crate::domain::Resolution;
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::info;

#[derive(Debug, Deserialize)]
struct ResolutionFile {
    resolutions: HashMap<String, Resolution>,
}

#[derive(Default)]
struct ResolverInner {
    entries: HashMap<String, Resolution>,
    configured: bool,
}

/// The method-resolution table. Read-mostly: lookups take the shared lock,
/// reloads take the exclusive one.
#[derive(Default)]
pub struct Resolver {
    inner: RwLock<ResolverInner>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a resolution config and merges it into the table. Keys are
    /// normalized to lowercase; a key present in both the table and the new
    /// document takes the new document's value. Returns the number of
    /// entries merged.
    pub fn load_config(&self, path: &Path) -> anyhow::Result<usize> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading resolution config {}", path.display()))?;
        let parsed: ResolutionFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing resolution config {}", path.display()))?;

        let mut inner = self.inner.write().unwrap();
        let merged = parsed.resolutions.len();
        for (method, entry) in parsed.resolutions {
            inner.entries.insert(method.to_lowercase(), entry);
        }
        inner.configured = true;
        info!(config = %path.display(), entries = merged, "resolution config loaded");
        Ok(merged)
    }

    pub fn is_configured(&self) -> bool {
        self.inner.read().unwrap().configured
    }

    pub fn lookup(&self, method: &str) -> Option<Resolution> {
        self.inner
            .read()
            .unwrap()
            .entries
            .get(&method.to_lowercase())
            .cloned()
    }

    pub fn has_event(&self, method: &str) -> bool {
        self.lookup(method).is_some_and(|entry| entry.is_event())
    }

    pub fn has_com_rpc_request_support(&self, method: &str) -> bool {
        self.lookup(method).is_some_and(|entry| entry.use_com_rpc)
    }
}
