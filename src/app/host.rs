use crate::ports::{EventDelegate, RequestHandler};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// In-process registry of downstream components, addressed by callsign.
///
/// This is the seam the host plugin framework fills: the router acquires
/// request handlers and event delegates from here by the resolution entry's
/// alias.
#[derive(Default)]
pub struct CallsignHost {
    request_handlers: RwLock<HashMap<String, Arc<dyn RequestHandler>>>,
    event_delegates: RwLock<HashMap<String, Arc<dyn EventDelegate>>>,
}

impl CallsignHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_request_handler(
        &self,
        callsign: impl Into<String>,
        handler: Arc<dyn RequestHandler>,
    ) {
        self.request_handlers
            .write()
            .unwrap()
            .insert(callsign.into(), handler);
    }

    pub fn request_handler(&self, callsign: &str) -> Option<Arc<dyn RequestHandler>> {
        self.request_handlers
            .read()
            .unwrap()
            .get(callsign)
            .cloned()
    }

    pub fn register_event_delegate(
        &self,
        callsign: impl Into<String>,
        delegate: Arc<dyn EventDelegate>,
    ) {
        self.event_delegates
            .write()
            .unwrap()
            .insert(callsign.into(), delegate);
    }

    pub fn event_delegate(&self, callsign: &str) -> Option<Arc<dyn EventDelegate>> {
        self.event_delegates.read().unwrap().get(callsign).cloned()
    }

    /// Snapshot of every registered delegate, for disconnect cleanup.
    pub fn event_delegates(&self) -> Vec<Arc<dyn EventDelegate>> {
        self.event_delegates
            .read()
            .unwrap()
            .values()
            .cloned()
            .collect()
    }
}
