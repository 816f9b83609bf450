/// Per-frame request context handed to downstream handlers and delegates.
///
/// Created by the gateway once the connection's app identity is known and
/// treated as read-only from there on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayContext {
    pub request_id: u32,
    pub connection_id: u32,
    pub app_id: String,
}

impl GatewayContext {
    pub fn new(request_id: u32, connection_id: u32, app_id: impl Into<String>) -> Self {
        Self {
            request_id,
            connection_id,
            app_id: app_id.into(),
        }
    }
}
