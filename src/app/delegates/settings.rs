use crate::app::registry::SubscriptionRegistry;
use crate::domain::GatewayError;
use crate::ports::{Emitter, EventDelegate, UserSettingsSink};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub const EVENT_LANGUAGE_CHANGED: &str = "localization.onlanguagechanged";
pub const EVENT_LOCALE_CHANGED: &str = "localization.onlocalechanged";
pub const EVENT_PREFERRED_AUDIO_LANGUAGES_CHANGED: &str =
    "localization.onpreferredaudiolanguageschanged";
pub const EVENT_AUDIO_DESCRIPTION_SETTINGS_CHANGED: &str =
    "accessibility.onaudiodescriptionsettingschanged";
pub const EVENT_HIGH_CONTRAST_CHANGED: &str = "accessibility.onhighcontrastuichanged";
pub const EVENT_CAPTIONS_ENABLED_CHANGED: &str = "closedcaptions.onenabledchanged";
pub const EVENT_PREFERRED_CAPTIONS_LANGUAGES_CHANGED: &str =
    "closedcaptions.onpreferredlanguageschanged";
pub const EVENT_CLOSED_CAPTIONS_SETTINGS_CHANGED: &str =
    "accessibility.onclosedcaptionssettingschanged";
pub const EVENT_VOICE_GUIDANCE_SETTINGS_CHANGED: &str =
    "accessibility.onvoiceguidancesettingschanged";

const VALID_EVENTS: &[&str] = &[
    EVENT_LANGUAGE_CHANGED,
    EVENT_LOCALE_CHANGED,
    EVENT_PREFERRED_AUDIO_LANGUAGES_CHANGED,
    EVENT_AUDIO_DESCRIPTION_SETTINGS_CHANGED,
    EVENT_HIGH_CONTRAST_CHANGED,
    EVENT_CAPTIONS_ENABLED_CHANGED,
    EVENT_PREFERRED_CAPTIONS_LANGUAGES_CHANGED,
    EVENT_CLOSED_CAPTIONS_SETTINGS_CHANGED,
    EVENT_VOICE_GUIDANCE_SETTINGS_CHANGED,
];

fn is_valid_event(event: &str) -> bool {
    VALID_EVENTS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(event))
}

/// Last-known closed-captions settings, kept so combined change
/// notifications can be built without a round trip to the producers.
#[derive(Default)]
struct CaptionsState {
    enabled: bool,
    preferred_languages: Vec<String>,
    styles: Option<Value>,
}

/// Event delegate for user-settings change notifications.
pub struct UserSettingsDelegate {
    subscriptions: SubscriptionRegistry,
    captions: Mutex<CaptionsState>,
    producer_registered: AtomicBool,
}

impl UserSettingsDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscriptions: SubscriptionRegistry::default(),
            captions: Mutex::new(CaptionsState::default()),
            producer_registered: AtomicBool::new(false),
        })
    }

    pub fn is_subscribed(&self, event: &str, connection_id: u32) -> bool {
        self.subscriptions.is_subscribed(event, connection_id)
    }

    fn dispatch(&self, event: &str, payload: Value) {
        let reached = self.subscriptions.dispatch(event, &payload);
        debug!(event, reached, "user-settings event dispatched");
    }

    /// Builds and dispatches the combined closed-captions settings payload,
    /// `{"enabled": <bool>, "styles": {..}, "preferredLanguages": [..]}`.
    /// Preferred languages default to `["eng"]` and styles to an empty
    /// object when nothing has been reported yet.
    fn dispatch_closed_captions_settings_changed(&self) {
        let payload = {
            let captions = self.captions.lock().unwrap();
            let languages = if captions.preferred_languages.is_empty() {
                vec!["eng".to_string()]
            } else {
                captions.preferred_languages.clone()
            };
            let styles = captions.styles.clone().unwrap_or_else(|| json!({}));
            json!({
                "enabled": captions.enabled,
                "styles": styles,
                "preferredLanguages": languages,
            })
        };
        self.dispatch(EVENT_CLOSED_CAPTIONS_SETTINGS_CHANGED, payload);
    }
}

#[async_trait]
impl EventDelegate for UserSettingsDelegate {
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
                info!("registering with user-settings notifications");
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

impl UserSettingsSink for UserSettingsDelegate {
    fn language_changed(&self, language: &str) {
        self.dispatch(EVENT_LANGUAGE_CHANGED, json!(language));
    }

    fn locale_changed(&self, locale: &str) {
        self.dispatch(EVENT_LOCALE_CHANGED, json!(locale));
    }

    fn preferred_audio_languages_changed(&self, languages: &[String]) {
        self.dispatch(EVENT_PREFERRED_AUDIO_LANGUAGES_CHANGED, json!(languages));
    }

    fn audio_description_settings_changed(&self, enabled: bool) {
        self.dispatch(
            EVENT_AUDIO_DESCRIPTION_SETTINGS_CHANGED,
            json!({ "enabled": enabled }),
        );
    }

    fn high_contrast_changed(&self, enabled: bool) {
        self.dispatch(EVENT_HIGH_CONTRAST_CHANGED, json!(enabled));
    }

    fn captions_enabled_changed(&self, enabled: bool) {
        self.captions.lock().unwrap().enabled = enabled;
        self.dispatch(EVENT_CAPTIONS_ENABLED_CHANGED, json!(enabled));
        // Captions toggles also notify combined-settings listeners.
        self.dispatch_closed_captions_settings_changed();
    }

    fn preferred_captions_languages_changed(&self, languages: &[String]) {
        self.captions.lock().unwrap().preferred_languages = languages.to_vec();
        self.dispatch(EVENT_PREFERRED_CAPTIONS_LANGUAGES_CHANGED, json!(languages));
        self.dispatch_closed_captions_settings_changed();
    }

    fn closed_captions_settings_changed(&self, settings: Value) {
        if let Some(styles) = settings.get("styles") {
            self.captions.lock().unwrap().styles = Some(styles.clone());
        }
        self.dispatch(EVENT_CLOSED_CAPTIONS_SETTINGS_CHANGED, settings);
    }

    fn voice_guidance_settings_changed(&self, enabled: bool) {
        self.dispatch(
            EVENT_VOICE_GUIDANCE_SETTINGS_CHANGED,
            json!({ "enabled": enabled }),
        );
    }
}
