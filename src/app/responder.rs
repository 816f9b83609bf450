use crate::domain::GatewayContext;
use crate::ports::Emitter;
use crate::Gateway;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Asynchronous write path. Every operation submits a work item onto the
/// runtime; each work item holds only a weak reference to the gateway, so
/// items outliving shutdown expire without touching freed state, and a
/// vanished target connection is a silent no-op.
pub struct Responder {
    gateway: Weak<Gateway>,
}

impl Responder {
    pub(crate) fn new(gateway: Weak<Gateway>) -> Self {
        Self { gateway }
    }

    /// Deliver an asynchronous response for the request identified by the
    /// context.
    pub fn respond(&self, context: &GatewayContext, payload: Value) {
        let gateway = self.gateway.clone();
        let context = context.clone();
        tokio::spawn(async move {
            if let Some(gateway) = gateway.upgrade() {
                gateway.send_result_frame(&context, Ok(payload)).await;
            }
        });
    }

    /// Server push: a JSON-RPC notification for compliant connections, a
    /// bare response keyed by the original request id otherwise.
    pub fn emit(&self, context: &GatewayContext, method: &str, payload: Value) {
        let gateway = self.gateway.clone();
        let context = context.clone();
        let method = method.to_string();
        tokio::spawn(async move {
            if let Some(gateway) = gateway.upgrade() {
                gateway.emit_frame(&context, &method, payload).await;
            }
        });
    }

    /// Server-initiated JSON-RPC request to a connection.
    pub fn request(&self, connection_id: u32, id: u32, method: &str, params: Value) {
        let gateway = self.gateway.clone();
        let method = method.to_string();
        tokio::spawn(async move {
            if let Some(gateway) = gateway.upgrade() {
                gateway
                    .send_request_frame(connection_id, id, &method, params)
                    .await;
            }
        });
    }
}

/// The emitter bound to a subscribing connection. Invocations fan event
/// payloads back through the responder path.
pub struct ConnectionEmitter {
    context: GatewayContext,
    gateway: Weak<Gateway>,
}

impl ConnectionEmitter {
    pub(crate) fn new(context: GatewayContext, gateway: Weak<Gateway>) -> Arc<Self> {
        Arc::new(Self { context, gateway })
    }
}

impl Emitter for ConnectionEmitter {
    fn connection_id(&self) -> u32 {
        self.context.connection_id
    }

    fn emit(&self, event: &str, payload: Value) {
        debug!(
            connection_id = self.context.connection_id,
            event, "emitting notification"
        );
        let gateway = self.gateway.clone();
        let context = self.context.clone();
        let event = event.to_string();
        tokio::spawn(async move {
            if let Some(gateway) = gateway.upgrade() {
                gateway.emit_frame(&context, &event, payload).await;
            }
        });
    }
}
