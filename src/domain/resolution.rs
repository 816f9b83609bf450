use serde::Deserialize;
use serde_json::{Map, Value};

/// One entry of the resolution table, keyed (after normalization) by the
/// lowercased method name.
///
/// A non-empty `event` marks the method as an event subscription; otherwise
/// it is a plain request routed to the handler registered under `alias`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub alias: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub use_com_rpc: bool,
    #[serde(default)]
    pub include_context: bool,
    #[serde(default)]
    pub additional_context: Map<String, Value>,
}

impl Resolution {
    pub fn is_event(&self) -> bool {
        !self.event.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let entry: Resolution =
            serde_json::from_str(r#"{ "alias": "org.rdk.Settings" }"#).unwrap();
        assert_eq!(entry.alias, "org.rdk.Settings");
        assert!(entry.event.is_empty());
        assert!(!entry.use_com_rpc);
        assert!(!entry.include_context);
        assert!(entry.additional_context.is_empty());
        assert!(!entry.is_event());
    }

    #[test]
    fn deserializes_full_entry() {
        let entry: Resolution = serde_json::from_str(
            r#"{
                "alias": "org.rdk.Lifecycle",
                "event": "Lifecycle2.onStateChanged",
                "useComRpc": true,
                "includeContext": true,
                "additionalContext": { "foo": "bar" }
            }"#,
        )
        .unwrap();
        assert!(entry.is_event());
        assert!(entry.use_com_rpc);
        assert!(entry.include_context);
        assert_eq!(entry.additional_context["foo"], "bar");
    }

    #[test]
    fn missing_alias_is_rejected() {
        let parsed = serde_json::from_str::<Resolution>(r#"{ "event": "E" }"#);
        assert!(parsed.is_err());
    }
}
