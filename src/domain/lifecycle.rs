use std::fmt;

/// Application lifecycle states as reported by the lifecycle manager.
///
/// The wire names are lowercase short tokens; consumers depend on them
/// byte-for-byte, so `wire_name` is the only stringification used on the
/// event path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Initializing,
    Paused,
    Active,
    Suspended,
    Hibernated,
    Terminating,
}

impl LifecycleState {
    pub fn wire_name(self) -> &'static str {
        match self {
            LifecycleState::Unloaded => "unloaded",
            LifecycleState::Loading => "loading",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Paused => "paused",
            LifecycleState::Active => "active",
            LifecycleState::Suspended => "suspended",
            LifecycleState::Hibernated => "hibernated",
            LifecycleState::Terminating => "terminating",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// The last observed state transition for an app instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub previous: LifecycleState,
    pub current: LifecycleState,
}
