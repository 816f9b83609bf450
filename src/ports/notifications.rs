use crate::domain::LifecycleState;
use serde_json::Value;

/// Sink for lifecycle-manager state notifications. Implemented by the
/// lifecycle delegate; driven by the downstream producer.
pub trait LifecycleStateSink: Send + Sync {
    fn state_changed(
        &self,
        app_id: &str,
        app_instance_id: &str,
        old_state: LifecycleState,
        new_state: LifecycleState,
        navigation_intent: &str,
    );
}

/// Sink for window-manager focus notifications.
pub trait FocusSink: Send + Sync {
    fn focus_changed(&self, app_instance_id: &str, focused: bool);
}

/// Sink for user-settings change notifications.
pub trait UserSettingsSink: Send + Sync {
    fn language_changed(&self, language: &str);
    fn locale_changed(&self, locale: &str);
    fn preferred_audio_languages_changed(&self, languages: &[String]);
    fn audio_description_settings_changed(&self, enabled: bool);
    fn high_contrast_changed(&self, enabled: bool);
    fn captions_enabled_changed(&self, enabled: bool);
    fn preferred_captions_languages_changed(&self, languages: &[String]);
    fn closed_captions_settings_changed(&self, settings: Value);
    fn voice_guidance_settings_changed(&self, enabled: bool);
}
