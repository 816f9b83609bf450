use crate::domain::{GatewayContext, GatewayError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A downstream request handler, addressed by its callsign.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle_app_gateway_request(
        &self,
        context: &GatewayContext,
        method: &str,
        params: Value,
    ) -> Result<Value, GatewayError>;
}

/// Per-(connection, event) outbound callback. Invoking `emit` queues a
/// notification frame for the bound connection.
pub trait Emitter: Send + Sync {
    fn connection_id(&self) -> u32;
    fn emit(&self, event: &str, payload: Value);
}

/// An event-subscription manager bound to one or more downstream
/// notification producers.
#[async_trait]
pub trait EventDelegate: Send + Sync {
    /// Subscribe (`listen == true`) or unsubscribe the emitter's connection
    /// for `event`. Unknown events yield a registration error.
    async fn handle_event(
        &self,
        emitter: Arc<dyn Emitter>,
        event: &str,
        listen: bool,
    ) -> Result<(), GatewayError>;

    /// Drop every subscription held for a closed connection.
    async fn cleanup(&self, connection_id: u32);
}

/// Maps a session token from the connect query to an application identity.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, session_id: &str) -> Option<String>;
}

/// Callbacks the connection manager drives for every accepted socket.
///
/// `on_auth` runs exactly once per connection before any `on_message`;
/// `on_disconnect` runs exactly once per admitted connection, after every
/// message that began before the disconnect.
#[async_trait]
pub trait ConnectionHandlers: Send + Sync {
    async fn on_auth(&self, connection_id: u32, token: &str) -> bool;
    async fn on_message(
        &self,
        connection_id: u32,
        method: String,
        params: Value,
        request_id: u32,
    );
    async fn on_disconnect(&self, connection_id: u32);
}

/// Shutdown replacement: rejects auth, drops messages, ignores disconnects.
pub struct NoopHandlers;

#[async_trait]
impl ConnectionHandlers for NoopHandlers {
    async fn on_auth(&self, _connection_id: u32, _token: &str) -> bool {
        false
    }

    async fn on_message(
        &self,
        _connection_id: u32,
        _method: String,
        _params: Value,
        _request_id: u32,
    ) {
    }

    async fn on_disconnect(&self, _connection_id: u32) {}
}

/// Observer of app connection lifecycle, notified off the worker pool.
pub trait ConnectionObserver: Send + Sync {
    fn on_app_connection_changed(&self, app_id: &str, connection_id: u32, connected: bool);
}
