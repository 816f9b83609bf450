pub mod adapters;
pub mod app;
pub mod domain;
pub mod ports;
pub mod telemetry;

use adapters::auth::SessionMapAuthenticator;
use adapters::sink::LogTelemetrySink;
use adapters::ws::{resolve_query, ConnectionManager};
use app::delegates::{LifecycleDelegate, UserSettingsDelegate};
use app::host::CallsignHost;
use app::registry::{AppIdRegistry, ComplianceRegistry};
use app::resolver::Resolver;
use app::responder::{ConnectionEmitter, Responder};
use app::router::{Router, GATEWAY_CALLSIGN};
use async_trait::async_trait;
use domain::{GatewayContext, GatewayError};
use ports::{Authenticator, ConnectionHandlers, ConnectionObserver, Emitter};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use telemetry::{TelemetryAggregator, TelemetryConfig, TelemetryFormat};
use tokio::signal::ctrl_c;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:3473";
pub const DEFAULT_RESOLUTION_CONFIG: &str = "/etc/app-gateway/resolution.base.json";

/// Callsigns the built-in event delegates are registered under; resolution
/// entries point at these via their `alias` field.
pub const LIFECYCLE_MANAGER_CALLSIGN: &str = "org.rdk.LifecycleManager";
pub const USER_SETTINGS_CALLSIGN: &str = "org.rdk.UserSettings";

#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub resolution_config: PathBuf,
    /// Additional resolution configs merged over the base, last wins.
    pub resolution_overlays: Vec<PathBuf>,
    pub session_map: Option<PathBuf>,
    pub telemetry_reporting_interval_secs: u64,
    pub telemetry_cache_threshold: u32,
    pub telemetry_format: TelemetryFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.parse().expect("default listen address"),
            resolution_config: PathBuf::from(DEFAULT_RESOLUTION_CONFIG),
            resolution_overlays: Vec::new(),
            session_map: None,
            telemetry_reporting_interval_secs: telemetry::DEFAULT_REPORTING_INTERVAL_SECS,
            telemetry_cache_threshold: telemetry::DEFAULT_CACHE_THRESHOLD,
            telemetry_format: TelemetryFormat::Json,
        }
    }
}

impl Settings {
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            reporting_interval: Duration::from_secs(self.telemetry_reporting_interval_secs),
            cache_threshold: self.telemetry_cache_threshold,
            format: self.telemetry_format,
        }
    }
}

/// Forwards connection-manager callbacks into the gateway. Holds only a
/// weak reference: once the gateway is gone, auth is rejected and messages
/// are dropped, matching the shutdown contract.
struct HandlerBridge {
    gateway: Weak<Gateway>,
}

#[async_trait]
impl ConnectionHandlers for HandlerBridge {
    async fn on_auth(&self, connection_id: u32, token: &str) -> bool {
        match self.gateway.upgrade() {
            Some(gateway) => gateway.on_auth(connection_id, token).await,
            None => false,
        }
    }

    async fn on_message(
        &self,
        connection_id: u32,
        method: String,
        params: Value,
        request_id: u32,
    ) {
        if let Some(gateway) = self.gateway.upgrade() {
            gateway
                .on_message(connection_id, method, params, request_id)
                .await;
        }
    }

    async fn on_disconnect(&self, connection_id: u32) {
        if let Some(gateway) = self.gateway.upgrade() {
            gateway.on_disconnect(connection_id).await;
        }
    }
}

/// The gateway core: ties the connection manager, registries, resolver,
/// router, responder and telemetry together.
pub struct Gateway {
    settings: Settings,
    manager: Arc<ConnectionManager>,
    resolver: Arc<Resolver>,
    host: Arc<CallsignHost>,
    router: Router,
    telemetry: Arc<TelemetryAggregator>,
    authenticator: Arc<dyn Authenticator>,
    app_ids: AppIdRegistry,
    compliance: ComplianceRegistry,
    observers: Mutex<Vec<Arc<dyn ConnectionObserver>>>,
    weak_self: Weak<Gateway>,
    server: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Gateway {
    pub fn new(
        settings: Settings,
        telemetry: Arc<TelemetryAggregator>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Arc<Self> {
        let resolver = Arc::new(Resolver::new());
        let host = Arc::new(CallsignHost::new());

        Arc::new_cyclic(|weak: &Weak<Gateway>| {
            let manager = ConnectionManager::new(Arc::new(HandlerBridge {
                gateway: weak.clone(),
            }));
            Gateway {
                settings,
                manager,
                resolver: resolver.clone(),
                host: host.clone(),
                router: Router::new(resolver, host, telemetry.clone()),
                telemetry,
                authenticator,
                app_ids: AppIdRegistry::default(),
                compliance: ComplianceRegistry::default(),
                observers: Mutex::new(Vec::new()),
                weak_self: weak.clone(),
                server: Mutex::new(None),
                local_addr: Mutex::new(None),
            }
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn callsign_host(&self) -> &Arc<CallsignHost> {
        &self.host
    }

    pub fn telemetry(&self) -> &Arc<TelemetryAggregator> {
        &self.telemetry
    }

    pub fn responder(&self) -> Responder {
        Responder::new(self.weak_self.clone())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    pub fn register_connection_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        let mut observers = self.observers.lock().unwrap();
        if !observers
            .iter()
            .any(|existing| Arc::ptr_eq(existing, &observer))
        {
            observers.push(observer);
        }
    }

    pub fn unregister_connection_observer(&self, observer: &Arc<dyn ConnectionObserver>) {
        self.observers
            .lock()
            .unwrap()
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    /// Binds the listener and starts accepting connections.
    pub async fn start(&self) -> anyhow::Result<SocketAddr> {
        let (local_addr, task) = self.manager.clone().start(self.settings.listen).await?;
        *self.local_addr.lock().unwrap() = Some(local_addr);
        *self.server.lock().unwrap() = Some(task);
        Ok(local_addr)
    }

    /// Fixed-order shutdown: no-op the connection handlers, drain, stop the
    /// listener and connections, then revoke the telemetry timer with one
    /// final flush.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
        self.telemetry.deinitialize();
        let server = self.server.lock().unwrap().take();
        if let Some(server) = server {
            let _ = server.await;
        }
        info!("gateway shut down");
    }

    // --- connection-manager callbacks ----------------------------------------

    async fn on_auth(&self, connection_id: u32, token: &str) -> bool {
        let session = resolve_query(token, "session");
        if session.is_empty() {
            warn!(connection_id, "no session token provided");
            return false;
        }

        let Some(app_id) = self.authenticator.authenticate(&session).await else {
            warn!(connection_id, "authentication failed");
            return false;
        };

        self.app_ids.add(connection_id, &app_id);
        if !resolve_query(token, "jsonrpc").is_empty() {
            self.compliance.add(connection_id);
        }
        self.telemetry.increment_websocket_connections();
        self.notify_observers(&app_id, connection_id, true);
        info!(connection_id, %app_id, "connection authenticated");
        true
    }

    async fn on_message(
        &self,
        connection_id: u32,
        method: String,
        params: Value,
        request_id: u32,
    ) {
        let Some(app_id) = self.app_ids.get(connection_id) else {
            warn!(connection_id, "no app id for connection, terminating");
            self.manager.close(connection_id).await;
            return;
        };

        let context = GatewayContext::new(request_id, connection_id, app_id);
        let emitter: Arc<dyn Emitter> =
            ConnectionEmitter::new(context.clone(), self.weak_self.clone());
        let outcome = self
            .router
            .route(&context, GATEWAY_CALLSIGN, &method, params, emitter)
            .await;
        self.send_result_frame(&context, outcome).await;
    }

    async fn on_disconnect(&self, connection_id: u32) {
        let app_id = self.app_ids.get(connection_id);
        self.app_ids.remove(connection_id);
        self.compliance.remove(connection_id);
        for delegate in self.host.event_delegates() {
            delegate.cleanup(connection_id).await;
        }
        self.telemetry.decrement_websocket_connections();

        match app_id {
            Some(app_id) => {
                info!(connection_id, %app_id, "connection disconnected");
                self.notify_observers(&app_id, connection_id, false);
            }
            None => warn!(connection_id, "disconnect for connection with no app id"),
        }
    }

    fn notify_observers(&self, app_id: &str, connection_id: u32, connected: bool) {
        let observers: Vec<Arc<dyn ConnectionObserver>> =
            self.observers.lock().unwrap().clone();
        if observers.is_empty() {
            return;
        }
        let app_id = app_id.to_string();
        tokio::spawn(async move {
            for observer in observers {
                observer.on_app_connection_changed(&app_id, connection_id, connected);
            }
        });
    }

    // --- outbound frames ------------------------------------------------------

    /// Writes a response frame for the request identified by `context`.
    /// Compliant connections get the JSON-RPC envelope; the rest get the
    /// bare body keyed by the original request id.
    pub(crate) async fn send_result_frame(
        &self,
        context: &GatewayContext,
        outcome: Result<Value, GatewayError>,
    ) {
        let compliant = self.compliance.is_compliant(context.connection_id);
        let frame = match (&outcome, compliant) {
            (Ok(payload), true) => json!({
                "jsonrpc": "2.0",
                "id": context.request_id,
                "result": payload,
            }),
            (Ok(payload), false) => json!({
                "id": context.request_id,
                "result": payload,
            }),
            (Err(error), true) => json!({
                "jsonrpc": "2.0",
                "id": context.request_id,
                "error": error.body(),
            }),
            (Err(error), false) => json!({
                "id": context.request_id,
                "error": error.body(),
            }),
        };
        self.manager
            .send(context.connection_id, frame.to_string())
            .await;
    }

    /// Server push for `context`'s connection: a JSON-RPC notification when
    /// compliant, a bare response keyed by the original request id otherwise.
    pub(crate) async fn emit_frame(&self, context: &GatewayContext, method: &str, payload: Value) {
        if self.compliance.is_compliant(context.connection_id) {
            let frame = json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": payload,
            });
            self.manager
                .send(context.connection_id, frame.to_string())
                .await;
        } else {
            self.send_result_frame(context, Ok(payload)).await;
        }
    }

    /// Server-initiated JSON-RPC request.
    pub(crate) async fn send_request_frame(
        &self,
        connection_id: u32,
        id: u32,
        method: &str,
        params: Value,
    ) {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.manager.send(connection_id, frame.to_string()).await;
    }
}

/// Builds the full gateway from settings: telemetry on the log sink, the
/// session-map authenticator, the built-in delegates, and the resolution
/// table.
pub fn build_gateway(settings: Settings) -> anyhow::Result<Arc<Gateway>> {
    let telemetry = TelemetryAggregator::new(
        settings.telemetry_config(),
        Arc::new(LogTelemetrySink),
    );

    let authenticator: Arc<dyn Authenticator> = match &settings.session_map {
        Some(path) => Arc::new(SessionMapAuthenticator::from_file(path)?),
        None => {
            warn!("no session map configured; every connection will be refused");
            Arc::new(SessionMapAuthenticator::empty())
        }
    };

    let gateway = Gateway::new(settings, telemetry, authenticator);

    if let Err(err) = gateway
        .resolver()
        .load_config(&gateway.settings().resolution_config)
    {
        warn!(%err, "resolution config not loaded; methods will not resolve");
    }
    for overlay in gateway.settings().resolution_overlays.clone() {
        if let Err(err) = gateway.resolver().load_config(&overlay) {
            warn!(%err, overlay = %overlay.display(), "resolution overlay not loaded");
        }
    }

    gateway
        .callsign_host()
        .register_event_delegate(LIFECYCLE_MANAGER_CALLSIGN, LifecycleDelegate::new());
    gateway
        .callsign_host()
        .register_event_delegate(USER_SETTINGS_CALLSIGN, UserSettingsDelegate::new());

    Ok(gateway)
}

/// Daemon entry point: build, serve until ctrl-c, shut down in order.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let gateway = build_gateway(settings)?;
    gateway.start().await?;
    gateway.telemetry().initialize();

    let _ = ctrl_c().await;
    info!("shutdown signal received");
    gateway.shutdown().await;
    Ok(())
}
