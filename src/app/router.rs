use crate::app::host::CallsignHost;
use crate::app::resolver::Resolver;
use crate::domain::{GatewayContext, GatewayError};
use crate::telemetry::TelemetryAggregator;
use crate::ports::Emitter;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// The gateway's own callsign, passed to downstream handlers as the request
/// origin.
pub const GATEWAY_CALLSIGN: &str = "org.rdk.AppGateway";

/// Per-frame routing core: resolves the method, applies the event-vs-request
/// policy, enriches the context, invokes the downstream component, and feeds
/// the telemetry aggregator.
pub struct Router {
    resolver: Arc<Resolver>,
    host: Arc<CallsignHost>,
    telemetry: Arc<TelemetryAggregator>,
}

impl Router {
    pub fn new(
        resolver: Arc<Resolver>,
        host: Arc<CallsignHost>,
        telemetry: Arc<TelemetryAggregator>,
    ) -> Self {
        Self {
            resolver,
            host,
            telemetry,
        }
    }

    pub async fn route(
        &self,
        context: &GatewayContext,
        origin_alias: &str,
        method: &str,
        params: Value,
        emitter: Arc<dyn Emitter>,
    ) -> Result<Value, GatewayError> {
        debug!(
            app_id = %context.app_id,
            connection_id = context.connection_id,
            request_id = context.request_id,
            method,
            "routing request"
        );
        self.telemetry.increment_total_calls();

        let entry = match self.resolver.lookup(method) {
            Some(entry) => entry,
            None => {
                warn!(method, "no resolution for method");
                self.telemetry.increment_failed_calls();
                return Err(GatewayError::MethodNotFound);
            }
        };

        let started = chrono::Utc::now();
        let outcome = if entry.is_event() {
            self.route_event(context, &entry.alias, &entry.event, &params, emitter)
                .await
        } else {
            self.route_request(context, origin_alias, method, &entry, params)
                .await
        };
        let latency_ms = (chrono::Utc::now() - started).num_milliseconds() as f64;

        self.telemetry
            .record_api_method(&entry.alias, method, latency_ms, outcome.is_err());
        match &outcome {
            Ok(_) => self.telemetry.increment_successful_calls(),
            Err(_) => self.telemetry.increment_failed_calls(),
        }
        outcome
    }

    async fn route_event(
        &self,
        context: &GatewayContext,
        alias: &str,
        event: &str,
        params: &Value,
        emitter: Arc<dyn Emitter>,
    ) -> Result<Value, GatewayError> {
        let listen = params
            .as_object()
            .and_then(|object| object.get("listen"))
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                GatewayError::InvalidParams(
                    "Missing required boolean 'listen' parameter".to_string(),
                )
            })?;

        let delegate = self
            .host
            .event_delegate(alias)
            .ok_or(GatewayError::NotAvailable)?;

        debug!(
            app_id = %context.app_id,
            event,
            listen,
            "dispatching event subscription"
        );
        delegate.handle_event(emitter, event, listen).await?;
        Ok(Value::Null)
    }

    async fn route_request(
        &self,
        context: &GatewayContext,
        origin_alias: &str,
        method: &str,
        entry: &crate::domain::Resolution,
        params: Value,
    ) -> Result<Value, GatewayError> {
        let handler = self
            .host
            .request_handler(&entry.alias)
            .ok_or(GatewayError::NotAvailable)?;

        let final_params = if entry.include_context {
            let mut additional: Map<String, Value> = entry.additional_context.clone();
            additional.insert("origin".into(), origin_alias.into());

            let mut wrapped = Map::new();
            wrapped.insert("params".into(), params);
            wrapped.insert("_additionalContext".into(), Value::Object(additional));
            Value::Object(wrapped)
        } else {
            params
        };

        handler
            .handle_app_gateway_request(context, method, final_params)
            .await
    }
}
