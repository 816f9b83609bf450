use crate::app::registry::{
    AppInstanceRegistry, FocusRegistry, LifecycleStateRegistry, SubscriptionRegistry,
};
use crate::domain::{GatewayError, LifecycleState};
use crate::ports::{Emitter, EventDelegate, FocusSink, LifecycleStateSink};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub const EVENT_STATE_CHANGED: &str = "Lifecycle2.onStateChanged";
pub const EVENT_ON_INACTIVE: &str = "Lifecycle.onInactive";
pub const EVENT_ON_SUSPENDED: &str = "Lifecycle.onSuspended";
pub const EVENT_ON_UNLOADING: &str = "Lifecycle.onUnloading";
pub const EVENT_ON_FOREGROUND: &str = "Lifecycle.onForeground";
pub const EVENT_ON_BACKGROUND: &str = "Lifecycle.onBackground";
pub const EVENT_FOCUSED_CHANGED: &str = "Presentation.onFocusedChanged";
pub const EVENT_NAVIGATE_TO: &str = "Discovery.onNavigateTo";

const VALID_EVENTS: &[&str] = &[
    EVENT_STATE_CHANGED,
    EVENT_ON_INACTIVE,
    EVENT_ON_SUSPENDED,
    EVENT_ON_UNLOADING,
    EVENT_ON_FOREGROUND,
    EVENT_ON_BACKGROUND,
    EVENT_FOCUSED_CHANGED,
    EVENT_NAVIGATE_TO,
];

fn is_valid_event(event: &str) -> bool {
    VALID_EVENTS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(event))
}

/// The legacy lifecycle event derived from a new state, if any.
fn legacy_event_for(state: LifecycleState, focused: bool) -> Option<&'static str> {
    match state {
        LifecycleState::Paused => Some(EVENT_ON_INACTIVE),
        LifecycleState::Suspended | LifecycleState::Hibernated => Some(EVENT_ON_SUSPENDED),
        LifecycleState::Unloaded | LifecycleState::Terminating => Some(EVENT_ON_UNLOADING),
        LifecycleState::Active if focused => Some(EVENT_ON_FOREGROUND),
        LifecycleState::Active => Some(EVENT_ON_BACKGROUND),
        LifecycleState::Loading | LifecycleState::Initializing => None,
    }
}

/// Event delegate for application lifecycle, bound to the lifecycle-manager
/// and window-manager producers.
///
/// Besides fanning notifications out to subscribers it maintains the
/// lifecycle-state cache, the navigation-intent cache, the appId <->
/// appInstanceId map, and the focused-app registry.
pub struct LifecycleDelegate {
    subscriptions: SubscriptionRegistry,
    states: LifecycleStateRegistry,
    instances: AppInstanceRegistry,
    focus: FocusRegistry,
    producer_registered: AtomicBool,
}

impl LifecycleDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscriptions: SubscriptionRegistry::default(),
            states: LifecycleStateRegistry::default(),
            instances: AppInstanceRegistry::default(),
            focus: FocusRegistry::default(),
            producer_registered: AtomicBool::new(false),
        })
    }

    pub fn states(&self) -> &LifecycleStateRegistry {
        &self.states
    }

    pub fn instances(&self) -> &AppInstanceRegistry {
        &self.instances
    }

    pub fn focus(&self) -> &FocusRegistry {
        &self.focus
    }

    pub fn is_subscribed(&self, event: &str, connection_id: u32) -> bool {
        self.subscriptions.is_subscribed(event, connection_id)
    }

    fn dispatch(&self, event: &str, payload: Value) {
        let reached = self.subscriptions.dispatch(event, &payload);
        debug!(event, reached, "lifecycle event dispatched");
    }

    fn dispatch_navigation_intent(&self, app_instance_id: &str) {
        if let Some(intent) = self.states.intent(app_instance_id) {
            let payload =
                serde_json::from_str(&intent).unwrap_or_else(|_| Value::String(intent));
            self.dispatch(EVENT_NAVIGATE_TO, payload);
        }
    }
}

#[async_trait]
impl EventDelegate for LifecycleDelegate {
    async fn handle_event(
        &self,
        emitter: Arc<dyn Emitter>,
        event: &str,
        listen: bool,
    ) -> Result<(), GatewayError> {
        if !is_valid_event(event) {
            return Err(GatewayError::InvalidParams(format!(
                "Unknown event '{event}'"
            )));
        }

        if listen {
            if self.subscriptions.subscribe(event, emitter)
                && !self.producer_registered.swap(true, Ordering::SeqCst)
            {
                info!("registering with lifecycle manager notifications");
            }
        } else {
            self.subscriptions
                .unsubscribe(event, emitter.connection_id());
        }
        Ok(())
    }

    async fn cleanup(&self, connection_id: u32) {
        self.subscriptions.cleanup(connection_id);
    }
}

impl LifecycleStateSink for LifecycleDelegate {
    fn state_changed(
        &self,
        app_id: &str,
        app_instance_id: &str,
        old_state: LifecycleState,
        new_state: LifecycleState,
        navigation_intent: &str,
    ) {
        info!(
            app_id,
            app_instance_id,
            old_state = %old_state,
            new_state = %new_state,
            "lifecycle state changed"
        );

        self.instances.bind(app_id, app_instance_id);
        self.states.set_state(app_instance_id, old_state, new_state);
        if !navigation_intent.is_empty() {
            self.states.set_intent(app_instance_id, navigation_intent);
        }

        self.dispatch(
            EVENT_STATE_CHANGED,
            json!({
                "oldState": old_state.wire_name(),
                "newState": new_state.wire_name(),
            }),
        );

        let focused = self.focus.is_focused(app_instance_id);
        if let Some(legacy) = legacy_event_for(new_state, focused) {
            self.dispatch(legacy, json!({ "state": new_state.wire_name() }));
        }

        if new_state == LifecycleState::Active {
            self.dispatch_navigation_intent(app_instance_id);
        }
    }
}

impl FocusSink for LifecycleDelegate {
    fn focus_changed(&self, app_instance_id: &str, focused: bool) {
        info!(app_instance_id, focused, "focus changed");

        if focused {
            self.focus.set_focused(app_instance_id);
        } else {
            self.focus.clear(app_instance_id);
        }

        self.dispatch(EVENT_FOCUSED_CHANGED, json!({ "value": focused }));

        let active = self
            .states
            .state(app_instance_id)
            .is_some_and(|transition| transition.current == LifecycleState::Active);
        if active {
            let legacy = if focused {
                EVENT_ON_FOREGROUND
            } else {
                EVENT_ON_BACKGROUND
            };
            self.dispatch(legacy, json!({ "state": LifecycleState::Active.wire_name() }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CaptureEmitter {
        connection_id: u32,
        events: Mutex<Vec<(String, Value)>>,
    }

    impl CaptureEmitter {
        fn new(connection_id: u32) -> Arc<Self> {
            Arc::new(Self {
                connection_id,
                events: Mutex::new(Vec::new()),
            })
        }

        fn captured(&self) -> Vec<(String, Value)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Emitter for CaptureEmitter {
        fn connection_id(&self) -> u32 {
            self.connection_id
        }

        fn emit(&self, event: &str, payload: Value) {
            self.events
                .lock()
                .unwrap()
                .push((event.to_string(), payload));
        }
    }

    async fn subscribe(delegate: &Arc<LifecycleDelegate>, emitter: Arc<CaptureEmitter>, event: &str) {
        delegate
            .handle_event(emitter, event, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_event_is_a_registration_error() {
        let delegate = LifecycleDelegate::new();
        let err = delegate
            .handle_event(CaptureEmitter::new(1), "Lifecycle.onSomethingElse", true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32602);
        assert!(err.to_string().contains("Lifecycle.onSomethingElse"));
    }

    #[tokio::test]
    async fn event_validation_is_case_insensitive() {
        let delegate = LifecycleDelegate::new();
        delegate
            .handle_event(CaptureEmitter::new(1), "LIFECYCLE2.ONSTATECHANGED", true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn state_change_updates_caches_and_dispatches_both_generations() {
        let delegate = LifecycleDelegate::new();
        let emitter = CaptureEmitter::new(1);
        subscribe(&delegate, emitter.clone(), EVENT_STATE_CHANGED).await;
        subscribe(&delegate, emitter.clone(), EVENT_ON_INACTIVE).await;

        delegate.state_changed(
            "app",
            "instance-1",
            LifecycleState::Active,
            LifecycleState::Paused,
            "",
        );

        let transition = delegate.states().state("instance-1").unwrap();
        assert_eq!(transition.previous, LifecycleState::Active);
        assert_eq!(transition.current, LifecycleState::Paused);
        assert_eq!(
            delegate.instances().instance_for("app").as_deref(),
            Some("instance-1")
        );

        let captured = emitter.captured();
        assert_eq!(
            captured[0],
            (
                EVENT_STATE_CHANGED.to_string(),
                json!({ "oldState": "active", "newState": "paused" })
            )
        );
        assert_eq!(
            captured[1],
            (EVENT_ON_INACTIVE.to_string(), json!({ "state": "paused" }))
        );
    }

    #[tokio::test]
    async fn legacy_mapping_covers_every_state() {
        assert_eq!(
            legacy_event_for(LifecycleState::Paused, false),
            Some(EVENT_ON_INACTIVE)
        );
        assert_eq!(
            legacy_event_for(LifecycleState::Suspended, false),
            Some(EVENT_ON_SUSPENDED)
        );
        assert_eq!(
            legacy_event_for(LifecycleState::Hibernated, false),
            Some(EVENT_ON_SUSPENDED)
        );
        assert_eq!(
            legacy_event_for(LifecycleState::Unloaded, false),
            Some(EVENT_ON_UNLOADING)
        );
        assert_eq!(
            legacy_event_for(LifecycleState::Terminating, true),
            Some(EVENT_ON_UNLOADING)
        );
        assert_eq!(
            legacy_event_for(LifecycleState::Active, true),
            Some(EVENT_ON_FOREGROUND)
        );
        assert_eq!(
            legacy_event_for(LifecycleState::Active, false),
            Some(EVENT_ON_BACKGROUND)
        );
        assert_eq!(legacy_event_for(LifecycleState::Loading, false), None);
        assert_eq!(legacy_event_for(LifecycleState::Initializing, true), None);
    }

    #[tokio::test]
    async fn entering_active_replays_the_stored_navigation_intent() {
        let delegate = LifecycleDelegate::new();
        let emitter = CaptureEmitter::new(1);
        subscribe(&delegate, emitter.clone(), EVENT_NAVIGATE_TO).await;

        delegate.state_changed(
            "app",
            "i1",
            LifecycleState::Unloaded,
            LifecycleState::Loading,
            r#"{"action":"entity","entityId":"42"}"#,
        );
        assert!(emitter.captured().is_empty());

        delegate.state_changed(
            "app",
            "i1",
            LifecycleState::Loading,
            LifecycleState::Active,
            "",
        );
        let captured = emitter.captured();
        assert_eq!(
            captured[0],
            (
                EVENT_NAVIGATE_TO.to_string(),
                json!({ "action": "entity", "entityId": "42" })
            )
        );
    }

    #[tokio::test]
    async fn focus_dispatches_presentation_and_foreground_background() {
        let delegate = LifecycleDelegate::new();
        let emitter = CaptureEmitter::new(1);
        subscribe(&delegate, emitter.clone(), EVENT_FOCUSED_CHANGED).await;
        subscribe(&delegate, emitter.clone(), EVENT_ON_FOREGROUND).await;
        subscribe(&delegate, emitter.clone(), EVENT_ON_BACKGROUND).await;

        // Entering Active while unfocused already produces onBackground.
        delegate.state_changed(
            "app",
            "i1",
            LifecycleState::Loading,
            LifecycleState::Active,
            "",
        );
        delegate.focus_changed("i1", true);

        let captured = emitter.captured();
        assert_eq!(
            captured[0],
            (EVENT_ON_BACKGROUND.to_string(), json!({ "state": "active" }))
        );
        assert_eq!(
            captured[1],
            (EVENT_FOCUSED_CHANGED.to_string(), json!({ "value": true }))
        );
        assert_eq!(
            captured[2],
            (EVENT_ON_FOREGROUND.to_string(), json!({ "state": "active" }))
        );
        assert!(delegate.focus().is_focused("i1"));

        delegate.focus_changed("i1", false);
        let captured = emitter.captured();
        assert_eq!(
            captured[3],
            (EVENT_FOCUSED_CHANGED.to_string(), json!({ "value": false }))
        );
        assert_eq!(
            captured[4],
            (EVENT_ON_BACKGROUND.to_string(), json!({ "state": "active" }))
        );
        assert_eq!(delegate.focus().focused(), None);
    }

    #[tokio::test]
    async fn focus_on_non_active_instance_skips_legacy_events() {
        let delegate = LifecycleDelegate::new();
        let emitter = CaptureEmitter::new(1);
        subscribe(&delegate, emitter.clone(), EVENT_FOCUSED_CHANGED).await;
        subscribe(&delegate, emitter.clone(), EVENT_ON_FOREGROUND).await;

        delegate.state_changed(
            "app",
            "i1",
            LifecycleState::Active,
            LifecycleState::Paused,
            "",
        );
        delegate.focus_changed("i1", true);

        let captured = emitter.captured();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0, EVENT_FOCUSED_CHANGED);
    }

    #[tokio::test]
    async fn unsubscribe_and_cleanup_stop_delivery() {
        let delegate = LifecycleDelegate::new();
        let emitter = CaptureEmitter::new(1);
        subscribe(&delegate, emitter.clone(), EVENT_STATE_CHANGED).await;

        delegate
            .handle_event(emitter.clone(), EVENT_STATE_CHANGED, false)
            .await
            .unwrap();
        delegate.state_changed(
            "app",
            "i1",
            LifecycleState::Loading,
            LifecycleState::Paused,
            "",
        );
        assert!(emitter.captured().is_empty());

        subscribe(&delegate, emitter.clone(), EVENT_STATE_CHANGED).await;
        delegate.cleanup(1).await;
        delegate.state_changed(
            "app",
            "i1",
            LifecycleState::Paused,
            LifecycleState::Suspended,
            "",
        );
        assert!(emitter.captured().is_empty());
    }
}
