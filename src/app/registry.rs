use crate::domain::{LifecycleState, StateTransition};
use crate::ports::Emitter;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// connection id -> authenticated app id. Consulted on every inbound frame.
#[derive(Default)]
pub struct AppIdRegistry {
    entries: Mutex<HashMap<u32, String>>,
}

impl AppIdRegistry {
    pub fn add(&self, connection_id: u32, app_id: impl Into<String>) {
        self.entries
            .lock()
            .unwrap()
            .insert(connection_id, app_id.into());
    }

    pub fn get(&self, connection_id: u32) -> Option<String> {
        self.entries.lock().unwrap().get(&connection_id).cloned()
    }

    pub fn remove(&self, connection_id: u32) {
        self.entries.lock().unwrap().remove(&connection_id);
    }
}

/// Connections whose auth token advertised the JSON-RPC compliance marker.
/// Membership is decided once at auth and never changes afterwards.
#[derive(Default)]
pub struct ComplianceRegistry {
    entries: Mutex<HashSet<u32>>,
}

impl ComplianceRegistry {
    pub fn add(&self, connection_id: u32) {
        self.entries.lock().unwrap().insert(connection_id);
    }

    pub fn is_compliant(&self, connection_id: u32) -> bool {
        self.entries.lock().unwrap().contains(&connection_id)
    }

    pub fn remove(&self, connection_id: u32) {
        self.entries.lock().unwrap().remove(&connection_id);
    }
}

#[derive(Default)]
struct AppInstanceMaps {
    by_app: HashMap<String, String>,
    by_instance: HashMap<String, String>,
}

/// Bidirectional appId <-> appInstanceId map. One instance per app id;
/// re-registering replaces the previous binding (last wins).
#[derive(Default)]
pub struct AppInstanceRegistry {
    inner: Mutex<AppInstanceMaps>,
}

impl AppInstanceRegistry {
    pub fn bind(&self, app_id: &str, app_instance_id: &str) {
        let mut maps = self.inner.lock().unwrap();
        if let Some(previous) = maps.by_app.insert(app_id.into(), app_instance_id.into()) {
            maps.by_instance.remove(&previous);
        }
        maps.by_instance
            .insert(app_instance_id.into(), app_id.into());
    }

    pub fn instance_for(&self, app_id: &str) -> Option<String> {
        self.inner.lock().unwrap().by_app.get(app_id).cloned()
    }

    pub fn app_for(&self, app_instance_id: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .by_instance
            .get(app_instance_id)
            .cloned()
    }
}

#[derive(Default)]
struct LifecycleMaps {
    states: HashMap<String, StateTransition>,
    intents: HashMap<String, String>,
}

/// Last observed lifecycle transition and navigation intent per app instance.
#[derive(Default)]
pub struct LifecycleStateRegistry {
    inner: Mutex<LifecycleMaps>,
}

impl LifecycleStateRegistry {
    pub fn set_state(
        &self,
        app_instance_id: &str,
        previous: LifecycleState,
        current: LifecycleState,
    ) {
        self.inner
            .lock()
            .unwrap()
            .states
            .insert(app_instance_id.into(), StateTransition { previous, current });
    }

    pub fn state(&self, app_instance_id: &str) -> Option<StateTransition> {
        self.inner
            .lock()
            .unwrap()
            .states
            .get(app_instance_id)
            .copied()
    }

    pub fn set_intent(&self, app_instance_id: &str, intent: impl Into<String>) {
        self.inner
            .lock()
            .unwrap()
            .intents
            .insert(app_instance_id.into(), intent.into());
    }

    pub fn intent(&self, app_instance_id: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .intents
            .get(app_instance_id)
            .cloned()
    }
}

/// At most one focused app instance; cleared on blur.
#[derive(Default)]
pub struct FocusRegistry {
    focused: Mutex<Option<String>>,
}

impl FocusRegistry {
    pub fn set_focused(&self, app_instance_id: &str) {
        *self.focused.lock().unwrap() = Some(app_instance_id.into());
    }

    /// Clears focus only when the blurred instance is the focused one.
    pub fn clear(&self, app_instance_id: &str) {
        let mut focused = self.focused.lock().unwrap();
        if focused.as_deref() == Some(app_instance_id) {
            *focused = None;
        }
    }

    pub fn focused(&self) -> Option<String> {
        self.focused.lock().unwrap().clone()
    }

    pub fn is_focused(&self, app_instance_id: &str) -> bool {
        self.focused.lock().unwrap().as_deref() == Some(app_instance_id)
    }
}

/// Per-event subscription table used by the event delegates: lowercased
/// event tag -> (connection id -> emitter).
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: Mutex<HashMap<String, HashMap<u32, Arc<dyn Emitter>>>>,
}

impl SubscriptionRegistry {
    /// Returns true when this is the first subscriber for the event.
    pub fn subscribe(&self, event: &str, emitter: Arc<dyn Emitter>) -> bool {
        let mut subs = self.subscriptions.lock().unwrap();
        let listeners = subs.entry(event.to_lowercase()).or_default();
        let first = listeners.is_empty();
        listeners.insert(emitter.connection_id(), emitter);
        first
    }

    /// Returns true when the event is left with no subscribers.
    pub fn unsubscribe(&self, event: &str, connection_id: u32) -> bool {
        let mut subs = self.subscriptions.lock().unwrap();
        match subs.get_mut(&event.to_lowercase()) {
            Some(listeners) => {
                listeners.remove(&connection_id);
                if listeners.is_empty() {
                    subs.remove(&event.to_lowercase());
                    true
                } else {
                    false
                }
            }
            None => true,
        }
    }

    pub fn cleanup(&self, connection_id: u32) {
        let mut subs = self.subscriptions.lock().unwrap();
        subs.retain(|_, listeners| {
            listeners.remove(&connection_id);
            !listeners.is_empty()
        });
    }

    pub fn is_subscribed(&self, event: &str, connection_id: u32) -> bool {
        self.subscriptions
            .lock()
            .unwrap()
            .get(&event.to_lowercase())
            .is_some_and(|listeners| listeners.contains_key(&connection_id))
    }

    /// Fans `payload` out to every subscriber of `event`, returning how many
    /// emitters were invoked. The canonical (original-case) tag is what goes
    /// on the wire.
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let emitters: Vec<Arc<dyn Emitter>> = {
            let subs = self.subscriptions.lock().unwrap();
            match subs.get(&event.to_lowercase()) {
                Some(listeners) => listeners.values().cloned().collect(),
                None => return 0,
            }
        };
        for emitter in &emitters {
            emitter.emit(event, payload.clone());
        }
        emitters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmitter {
        connection_id: u32,
        emitted: AtomicUsize,
    }

    impl CountingEmitter {
        fn new(connection_id: u32) -> Arc<Self> {
            Arc::new(Self {
                connection_id,
                emitted: AtomicUsize::new(0),
            })
        }
    }

    impl Emitter for CountingEmitter {
        fn connection_id(&self) -> u32 {
            self.connection_id
        }

        fn emit(&self, _event: &str, _payload: Value) {
            self.emitted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn app_id_registry_add_get_remove() {
        let registry = AppIdRegistry::default();
        registry.add(7, "com.example.player");
        assert_eq!(registry.get(7).as_deref(), Some("com.example.player"));
        registry.remove(7);
        assert_eq!(registry.get(7), None);
    }

    #[test]
    fn compliance_membership_is_per_connection() {
        let registry = ComplianceRegistry::default();
        registry.add(1);
        assert!(registry.is_compliant(1));
        assert!(!registry.is_compliant(2));
        registry.remove(1);
        assert!(!registry.is_compliant(1));
    }

    #[test]
    fn instance_binding_is_last_wins() {
        let registry = AppInstanceRegistry::default();
        registry.bind("app", "instance-1");
        registry.bind("app", "instance-2");
        assert_eq!(registry.instance_for("app").as_deref(), Some("instance-2"));
        assert_eq!(registry.app_for("instance-2").as_deref(), Some("app"));
        assert_eq!(registry.app_for("instance-1"), None);
    }

    #[test]
    fn lifecycle_registry_tracks_transition_and_intent() {
        let registry = LifecycleStateRegistry::default();
        registry.set_state("i1", LifecycleState::Loading, LifecycleState::Active);
        let transition = registry.state("i1").unwrap();
        assert_eq!(transition.previous, LifecycleState::Loading);
        assert_eq!(transition.current, LifecycleState::Active);

        assert_eq!(registry.intent("i1"), None);
        registry.set_intent("i1", r#"{"action":"home"}"#);
        assert_eq!(registry.intent("i1").as_deref(), Some(r#"{"action":"home"}"#));
    }

    #[test]
    fn focus_clear_only_matches_current_holder() {
        let registry = FocusRegistry::default();
        registry.set_focused("a");
        registry.clear("b");
        assert!(registry.is_focused("a"));
        registry.clear("a");
        assert_eq!(registry.focused(), None);
    }

    #[test]
    fn subscription_first_and_last_edges() {
        let registry = SubscriptionRegistry::default();
        let first = registry.subscribe("Lifecycle2.onStateChanged", CountingEmitter::new(1));
        assert!(first);
        let second = registry.subscribe("lifecycle2.onstatechanged", CountingEmitter::new(2));
        assert!(!second);

        assert!(!registry.unsubscribe("LIFECYCLE2.ONSTATECHANGED", 1));
        assert!(registry.unsubscribe("Lifecycle2.onStateChanged", 2));
    }

    #[test]
    fn dispatch_reaches_every_subscriber_case_insensitively() {
        let registry = SubscriptionRegistry::default();
        let a = CountingEmitter::new(1);
        let b = CountingEmitter::new(2);
        registry.subscribe("Presentation.onFocusedChanged", a.clone());
        registry.subscribe("presentation.onfocusedchanged", b.clone());

        let reached = registry.dispatch(
            "Presentation.onFocusedChanged",
            &serde_json::json!({ "value": true }),
        );
        assert_eq!(reached, 2);
        assert_eq!(a.emitted.load(Ordering::SeqCst), 1);
        assert_eq!(b.emitted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_removes_connection_everywhere() {
        let registry = SubscriptionRegistry::default();
        registry.subscribe("e1", CountingEmitter::new(5));
        registry.subscribe("e2", CountingEmitter::new(5));
        registry.subscribe("e2", CountingEmitter::new(6));
        registry.cleanup(5);

        assert!(!registry.is_subscribed("e1", 5));
        assert!(!registry.is_subscribed("e2", 5));
        assert!(registry.is_subscribed("e2", 6));
    }
}
