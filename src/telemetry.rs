use crate::domain::GatewayContext;
use crate::ports::TelemetrySink;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const DEFAULT_REPORTING_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_CACHE_THRESHOLD: u32 = 1000;

/// Telemetry sink markers. All follow the `AppGw<Category><Type>_split`
/// pattern; the per-API and per-service error counters interpolate the
/// failing name between prefix and suffix.
pub mod markers {
    pub const HEALTH_STATS: &str = "AppGwHealthStats_split";
    pub const PLUGIN_API_ERROR: &str = "AppGwPluginApiError_split";
    pub const PLUGIN_EXT_SERVICE_ERROR: &str = "AppGwPluginExtServiceError_split";
    pub const API_METHOD_STATS: &str = "AppGwApiMethodStats_split";
    pub const API_LATENCY: &str = "AppGwApiLatency_split";
    pub const SERVICE_LATENCY: &str = "AppGwServiceLatency_split";
    pub const SERVICE_METHOD_STATS: &str = "AppGwServiceMethodStats_split";
    pub const BOOTSTRAP_TIME: &str = "AppGwBootstrapTime_split";
    pub const API_ERROR_COUNT_PREFIX: &str = "AppGwApiErrorCount_";
    pub const EXT_SERVICE_ERROR_COUNT_PREFIX: &str = "AppGwExtServiceErrorCount_";
    pub const SPLIT_SUFFIX: &str = "_split";

    pub const UNIT_MILLISECONDS: &str = "ms";
    pub const UNIT_COUNT: &str = "count";
}

/// Output encoding for telemetry payloads.
///
/// `Json` is self-describing; `Compact` drops the keys and emits values
/// comma-separated (nested objects-in-arrays wrapped in parentheses), so
/// consumers must know the schema out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TelemetryFormat {
    #[default]
    Json,
    Compact,
}

impl FromStr for TelemetryFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(TelemetryFormat::Json),
            "compact" => Ok(TelemetryFormat::Compact),
            other => Err(format!("unknown telemetry format '{other}'")),
        }
    }
}

impl TelemetryFormat {
    pub fn encode(self, payload: &Map<String, Value>) -> String {
        match self {
            TelemetryFormat::Json => Value::Object(payload.clone()).to_string(),
            TelemetryFormat::Compact => compact_encode(payload),
        }
    }
}

fn compact_number(value: f64) -> String {
    if value.is_finite() && value == value.trunc() {
        format!("{}", value as i64)
    } else {
        format!("{value:.2}")
    }
}

fn compact_scalar(out: &mut String, value: &Value) {
    match value {
        Value::String(text) => out.push_str(text),
        Value::Number(number) => {
            out.push_str(&compact_number(number.as_f64().unwrap_or(0.0)))
        }
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        _ => {}
    }
}

fn compact_encode(payload: &Map<String, Value>) -> String {
    let mut out = String::new();
    let mut first = true;
    for value in payload.values() {
        if !first {
            out.push(',');
        }
        first = false;

        match value {
            Value::Array(items) => {
                let mut first_item = true;
                for item in items {
                    if !first_item {
                        out.push(',');
                    }
                    first_item = false;
                    out.push('(');
                    if let Value::Object(fields) = item {
                        let mut first_field = true;
                        for field in fields.values() {
                            if !first_field {
                                out.push(',');
                            }
                            first_field = false;
                            compact_scalar(&mut out, field);
                        }
                    }
                    out.push(')');
                }
            }
            scalar => compact_scalar(&mut out, scalar),
        }
    }
    out
}

/// Integral values are emitted without a decimal point.
fn number(value: f64) -> Value {
    if value.is_finite() && value == value.trunc() {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

// --- metric name grammar -----------------------------------------------------

const METRIC_PREFIX: &str = "AppGw_PluginName_";
const METHOD_TAG: &str = "_MethodName_";
const SERVICE_TAG: &str = "_ServiceName_";
const SUCCESS_SUFFIX: &str = "_Success_split";
const ERROR_SUFFIX: &str = "_Error_split";
const API_LATENCY_SUFFIX: &str = "_ApiLatency_split";
const SERVICE_LATENCY_SUFFIX: &str = "_ServiceLatency_split";
const API_TAG: &str = "_ApiName_";

fn split_tagged(middle: &str, tag: &str) -> Option<(String, String)> {
    let position = middle.find(tag)?;
    if position == 0 {
        return None;
    }
    let left = &middle[..position];
    let right = &middle[position + tag.len()..];
    if left.is_empty() || right.is_empty() {
        return None;
    }
    Some((left.to_string(), right.to_string()))
}

/// `AppGw_PluginName_<P>_MethodName_<M>_{Success|Error}_split`
fn parse_api_metric_name(name: &str) -> Option<(String, String, bool)> {
    let (middle, is_error) = if let Some(stripped) = name.strip_suffix(SUCCESS_SUFFIX) {
        (stripped, false)
    } else if let Some(stripped) = name.strip_suffix(ERROR_SUFFIX) {
        (stripped, true)
    } else {
        return None;
    };
    let middle = middle.strip_prefix(METRIC_PREFIX)?;
    let (plugin, method) = split_tagged(middle, METHOD_TAG)?;
    Some((plugin, method, is_error))
}

/// `AppGw_PluginName_<P>_ServiceName_<S>_{Success|Error}_split`
fn parse_service_metric_name(name: &str) -> Option<(String, String, bool)> {
    let (middle, is_error) = if let Some(stripped) = name.strip_suffix(SUCCESS_SUFFIX) {
        (stripped, false)
    } else if let Some(stripped) = name.strip_suffix(ERROR_SUFFIX) {
        (stripped, true)
    } else {
        return None;
    };
    let middle = middle.strip_prefix(METRIC_PREFIX)?;
    let (plugin, service) = split_tagged(middle, SERVICE_TAG)?;
    Some((plugin, service, is_error))
}

/// `AppGw_PluginName_<P>_ApiName_<A>_ApiLatency_split`
fn parse_api_latency_metric_name(name: &str) -> Option<(String, String)> {
    let middle = name
        .strip_suffix(API_LATENCY_SUFFIX)?
        .strip_prefix(METRIC_PREFIX)?;
    split_tagged(middle, API_TAG)
}

/// `AppGw_PluginName_<P>_ServiceName_<S>_ServiceLatency_split`
fn parse_service_latency_metric_name(name: &str) -> Option<(String, String)> {
    let middle = name
        .strip_suffix(SERVICE_LATENCY_SUFFIX)?
        .strip_prefix(METRIC_PREFIX)?;
    split_tagged(middle, SERVICE_TAG)
}

// --- aggregate state ---------------------------------------------------------

struct MethodStats {
    plugin: String,
    name: String,
    success_count: u32,
    error_count: u32,
    total_success_ms: f64,
    total_error_ms: f64,
    min_success_ms: f64,
    max_success_ms: f64,
    min_error_ms: f64,
    max_error_ms: f64,
}

impl MethodStats {
    fn new(plugin: &str, name: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            name: name.to_string(),
            success_count: 0,
            error_count: 0,
            total_success_ms: 0.0,
            total_error_ms: 0.0,
            min_success_ms: f64::INFINITY,
            max_success_ms: f64::NEG_INFINITY,
            min_error_ms: f64::INFINITY,
            max_error_ms: f64::NEG_INFINITY,
        }
    }

    fn record(&mut self, latency_ms: f64, is_error: bool) {
        if is_error {
            self.error_count += 1;
            self.total_error_ms += latency_ms;
            self.min_error_ms = self.min_error_ms.min(latency_ms);
            self.max_error_ms = self.max_error_ms.max(latency_ms);
        } else {
            self.success_count += 1;
            self.total_success_ms += latency_ms;
            self.min_success_ms = self.min_success_ms.min(latency_ms);
            self.max_success_ms = self.max_success_ms.max(latency_ms);
        }
    }
}

struct LatencyStats {
    plugin: String,
    name: String,
    count: u32,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

impl LatencyStats {
    fn new(plugin: &str, name: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            name: name.to_string(),
            count: 0,
            total_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: f64::NEG_INFINITY,
        }
    }

    fn record(&mut self, latency_ms: f64) {
        self.count += 1;
        self.total_ms += latency_ms;
        self.min_ms = self.min_ms.min(latency_ms);
        self.max_ms = self.max_ms.max(latency_ms);
    }
}

struct MetricData {
    sum: f64,
    min: f64,
    max: f64,
    count: u32,
    unit: String,
}

impl MetricData {
    fn new() -> Self {
        Self {
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
            unit: String::new(),
        }
    }
}

struct Aggregates {
    api_methods: HashMap<String, MethodStats>,
    service_methods: HashMap<String, MethodStats>,
    api_latency: HashMap<String, LatencyStats>,
    service_latency: HashMap<String, LatencyStats>,
    api_errors: HashMap<String, u32>,
    service_errors: HashMap<String, u32>,
    metrics: HashMap<String, MetricData>,
    cached_events: u32,
    reporting_started: Instant,
}

impl Aggregates {
    fn new() -> Self {
        Self {
            api_methods: HashMap::new(),
            service_methods: HashMap::new(),
            api_latency: HashMap::new(),
            service_latency: HashMap::new(),
            api_errors: HashMap::new(),
            service_errors: HashMap::new(),
            metrics: HashMap::new(),
            cached_events: 0,
            reporting_started: Instant::now(),
        }
    }
}

#[derive(Default)]
struct HealthStats {
    websocket_connections: AtomicU32,
    total_calls: AtomicU32,
    successful_calls: AtomicU32,
    failed_calls: AtomicU32,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub reporting_interval: Duration,
    pub cache_threshold: u32,
    pub format: TelemetryFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            reporting_interval: Duration::from_secs(DEFAULT_REPORTING_INTERVAL_SECS),
            cache_threshold: DEFAULT_CACHE_THRESHOLD,
            format: TelemetryFormat::Json,
        }
    }
}

struct TimerState {
    initialized: bool,
    task: Option<JoinHandle<()>>,
}

/// Centralized telemetry aggregator.
///
/// The gateway and co-resident plugins report events and metrics here; the
/// aggregator batches them per `(plugin, api-or-service)` key and emits
/// summaries to the configured sink on a periodic timer, or earlier when the
/// cache threshold is hit. API-error and external-service-error events are
/// forwarded to the sink immediately for forensics while still feeding the
/// aggregated error counters.
pub struct TelemetryAggregator {
    config: Mutex<TelemetryConfig>,
    sink: Arc<dyn TelemetrySink>,
    health: HealthStats,
    aggregates: Mutex<Aggregates>,
    bootstrap_plugins: AtomicU32,
    bootstrap_total_ms: AtomicU64,
    timer: Mutex<TimerState>,
    weak_self: Weak<TelemetryAggregator>,
}

impl TelemetryAggregator {
    pub fn new(config: TelemetryConfig, sink: Arc<dyn TelemetrySink>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config: Mutex::new(config),
            sink,
            health: HealthStats::default(),
            aggregates: Mutex::new(Aggregates::new()),
            bootstrap_plugins: AtomicU32::new(0),
            bootstrap_total_ms: AtomicU64::new(0),
            timer: Mutex::new(TimerState {
                initialized: false,
                task: None,
            }),
            weak_self: weak.clone(),
        })
    }

    /// Starts the periodic reporting timer. Idempotent.
    pub fn initialize(&self) {
        let mut timer = self.timer.lock().unwrap();
        if timer.initialized {
            warn!("telemetry aggregator already initialized");
            return;
        }
        self.aggregates.lock().unwrap().reporting_started = Instant::now();

        let weak: Weak<TelemetryAggregator> = self.weak_self.clone();
        timer.task = Some(tokio::spawn(async move {
            loop {
                let interval = match weak.upgrade() {
                    Some(aggregator) => aggregator.config.lock().unwrap().reporting_interval,
                    None => break,
                };
                tokio::time::sleep(interval).await;
                match weak.upgrade() {
                    Some(aggregator) => aggregator.flush(),
                    None => break,
                }
            }
        }));
        timer.initialized = true;
        info!("telemetry aggregator initialized");
    }

    /// Revokes the timer and performs one final flush. Idempotent.
    pub fn deinitialize(&self) {
        {
            let mut timer = self.timer.lock().unwrap();
            if !timer.initialized {
                return;
            }
            if let Some(task) = timer.task.take() {
                task.abort();
            }
            timer.initialized = false;
        }
        self.flush();
        info!("telemetry aggregator deinitialized");
    }

    fn is_initialized(&self) -> bool {
        self.timer.lock().unwrap().initialized
    }

    pub fn set_reporting_interval(&self, interval: Duration) {
        self.config.lock().unwrap().reporting_interval = interval;
    }

    pub fn set_cache_threshold(&self, threshold: u32) {
        self.config.lock().unwrap().cache_threshold = threshold;
    }

    pub fn set_format(&self, format: TelemetryFormat) {
        self.config.lock().unwrap().format = format;
    }

    pub fn format(&self) -> TelemetryFormat {
        self.config.lock().unwrap().format
    }

    // --- health counters (gateway's own WebSocket operations) ---------------

    pub fn increment_websocket_connections(&self) {
        self.health
            .websocket_connections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_websocket_connections(&self) {
        let _ = self
            .health
            .websocket_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_sub(1)
            });
    }

    pub fn websocket_connections(&self) -> u32 {
        self.health.websocket_connections.load(Ordering::Relaxed)
    }

    pub fn increment_total_calls(&self) {
        self.health.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_successful_calls(&self) {
        self.health.successful_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed_calls(&self) {
        self.health.failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    // --- bootstrap -----------------------------------------------------------

    /// Each plugin reports its own bootstrap duration; the cumulative total
    /// and plugin count survive flushes and are emitted together under the
    /// bootstrap-time marker as `{"duration_ms": <total>, "plugins_loaded":
    /// <count>}`.
    pub fn record_bootstrap_time(&self, duration_ms: u64) {
        let plugins = self.bootstrap_plugins.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self
            .bootstrap_total_ms
            .fetch_add(duration_ms, Ordering::Relaxed)
            + duration_ms;
        info!(duration_ms, plugins, total_ms = total, "plugin bootstrap time recorded");

        let format = self.config.lock().unwrap().format;
        let mut payload = Map::new();
        payload.insert("duration_ms".into(), total.into());
        payload.insert("plugins_loaded".into(), plugins.into());
        self.sink
            .send(markers::BOOTSTRAP_TIME, &format.encode(&payload));
    }

    pub fn bootstrap_total_ms(&self) -> u64 {
        self.bootstrap_total_ms.load(Ordering::Relaxed)
    }

    // --- error counters ------------------------------------------------------

    pub fn record_api_error(&self, api_name: &str) {
        let mut aggregates = self.aggregates.lock().unwrap();
        *aggregates.api_errors.entry(api_name.to_string()).or_insert(0) += 1;
    }

    pub fn record_external_service_error(&self, service_name: &str) {
        let mut aggregates = self.aggregates.lock().unwrap();
        *aggregates
            .service_errors
            .entry(service_name.to_string())
            .or_insert(0) += 1;
    }

    // --- cross-process entry points ------------------------------------------

    /// Records a telemetry event. API-error and external-service-error
    /// markers bypass aggregation and are forwarded immediately; anything
    /// else bumps the cached event count toward the flush threshold.
    pub fn record_event(&self, context: &GatewayContext, event_name: &str, event_data: &str) {
        if !self.is_initialized() {
            warn!(app_id = %context.app_id, event = event_name, "telemetry event before init, dropped");
            return;
        }

        match event_name {
            markers::PLUGIN_API_ERROR => {
                let api = extract_field(event_data, "api")
                    .unwrap_or_else(|| event_name.to_string());
                self.record_api_error(&api);
                self.sink.send(event_name, event_data);
            }
            markers::PLUGIN_EXT_SERVICE_ERROR => {
                let service = extract_field(event_data, "service")
                    .unwrap_or_else(|| event_name.to_string());
                self.record_external_service_error(&service);
                self.sink.send(event_name, event_data);
            }
            _ => {
                let threshold = self.config.lock().unwrap().cache_threshold;
                let should_flush = {
                    let mut aggregates = self.aggregates.lock().unwrap();
                    aggregates.cached_events += 1;
                    aggregates.cached_events >= threshold
                };
                if should_flush {
                    info!("telemetry cache threshold reached, flushing");
                    self.flush();
                }
            }
        }
    }

    /// Records a telemetry metric, classified by the metric-name grammar into
    /// API-method, service-method, API-latency, service-latency, or generic
    /// aggregates. The bootstrap-duration marker is special-cased.
    pub fn record_metric(
        &self,
        context: &GatewayContext,
        metric_name: &str,
        metric_value: f64,
        metric_unit: &str,
    ) {
        if !self.is_initialized() {
            warn!(app_id = %context.app_id, metric = metric_name, "telemetry metric before init, dropped");
            return;
        }

        if metric_name == markers::BOOTSTRAP_TIME {
            self.record_bootstrap_time(metric_value as u64);
            return;
        }

        if let Some((plugin, method, is_error)) = parse_api_metric_name(metric_name) {
            self.record_api_method(&plugin, &method, metric_value, is_error);
        } else if let Some((plugin, service, is_error)) = parse_service_metric_name(metric_name) {
            self.record_service_method(&plugin, &service, metric_value, is_error);
        } else if let Some((plugin, api)) = parse_api_latency_metric_name(metric_name) {
            self.record_api_latency(&plugin, &api, metric_value);
        } else if let Some((plugin, service)) = parse_service_latency_metric_name(metric_name) {
            self.record_service_latency(&plugin, &service, metric_value);
        } else {
            self.record_generic_metric(metric_name, metric_value, metric_unit);
        }

        let threshold = self.config.lock().unwrap().cache_threshold;
        let should_flush = self.aggregates.lock().unwrap().cached_events >= threshold;
        if should_flush {
            self.flush();
        }
    }

    // --- internal recording shortcuts ----------------------------------------

    pub fn record_api_method(&self, plugin: &str, method: &str, latency_ms: f64, is_error: bool) {
        let mut aggregates = self.aggregates.lock().unwrap();
        let key = format!("{plugin}_{method}");
        aggregates
            .api_methods
            .entry(key)
            .or_insert_with(|| MethodStats::new(plugin, method))
            .record(latency_ms, is_error);
        aggregates.cached_events += 1;
    }

    pub fn record_service_method(
        &self,
        plugin: &str,
        service: &str,
        latency_ms: f64,
        is_error: bool,
    ) {
        let mut aggregates = self.aggregates.lock().unwrap();
        let key = format!("{plugin}_{service}");
        aggregates
            .service_methods
            .entry(key)
            .or_insert_with(|| MethodStats::new(plugin, service))
            .record(latency_ms, is_error);
        aggregates.cached_events += 1;
    }

    pub fn record_api_latency(&self, plugin: &str, api: &str, latency_ms: f64) {
        let mut aggregates = self.aggregates.lock().unwrap();
        let key = format!("{plugin}_{api}");
        aggregates
            .api_latency
            .entry(key)
            .or_insert_with(|| LatencyStats::new(plugin, api))
            .record(latency_ms);
        aggregates.cached_events += 1;
    }

    pub fn record_service_latency(&self, plugin: &str, service: &str, latency_ms: f64) {
        let mut aggregates = self.aggregates.lock().unwrap();
        let key = format!("{plugin}_{service}");
        aggregates
            .service_latency
            .entry(key)
            .or_insert_with(|| LatencyStats::new(plugin, service))
            .record(latency_ms);
        aggregates.cached_events += 1;
    }

    pub fn record_generic_metric(&self, metric_name: &str, value: f64, unit: &str) {
        let mut aggregates = self.aggregates.lock().unwrap();
        let data = aggregates
            .metrics
            .entry(metric_name.to_string())
            .or_insert_with(MetricData::new);
        data.sum += value;
        data.count += 1;
        data.min = data.min.min(value);
        data.max = data.max.max(value);
        if data.unit.is_empty() {
            data.unit = unit.to_string();
        }
        aggregates.cached_events += 1;
    }

    // --- flush ----------------------------------------------------------------

    /// Snapshot + emit + reset. Interval counters and aggregation maps are
    /// cleared; the websocket-connections gauge and the cumulative bootstrap
    /// total are preserved, and the reporting window restarts.
    pub fn flush(&self) {
        let (interval_secs, format) = {
            let config = self.config.lock().unwrap();
            (config.reporting_interval.as_secs(), config.format)
        };

        let mut aggregates = self.aggregates.lock().unwrap();
        let elapsed = aggregates.reporting_started.elapsed().as_secs();
        info!(period_secs = elapsed, "flushing telemetry data");

        self.send_health_stats(interval_secs, format);
        self.send_method_stats(
            &aggregates.api_methods,
            "method_name",
            markers::API_METHOD_STATS,
            interval_secs,
            format,
        );
        self.send_latency_stats(
            &aggregates.api_latency,
            "api_name",
            markers::API_LATENCY,
            interval_secs,
            format,
        );
        self.send_latency_stats(
            &aggregates.service_latency,
            "service_name",
            markers::SERVICE_LATENCY,
            interval_secs,
            format,
        );
        self.send_method_stats(
            &aggregates.service_methods,
            "service_name",
            markers::SERVICE_METHOD_STATS,
            interval_secs,
            format,
        );
        self.send_error_counters(
            &aggregates.api_errors,
            markers::API_ERROR_COUNT_PREFIX,
            interval_secs,
            format,
        );
        self.send_error_counters(
            &aggregates.service_errors,
            markers::EXT_SERVICE_ERROR_COUNT_PREFIX,
            interval_secs,
            format,
        );
        self.send_generic_metrics(&aggregates.metrics, interval_secs, format);

        self.health.total_calls.store(0, Ordering::Relaxed);
        self.health.successful_calls.store(0, Ordering::Relaxed);
        self.health.failed_calls.store(0, Ordering::Relaxed);
        aggregates.api_methods.clear();
        aggregates.service_methods.clear();
        aggregates.api_latency.clear();
        aggregates.service_latency.clear();
        aggregates.api_errors.clear();
        aggregates.service_errors.clear();
        aggregates.metrics.clear();
        aggregates.cached_events = 0;
        aggregates.reporting_started = Instant::now();
    }

    fn send_health_stats(&self, interval_secs: u64, format: TelemetryFormat) {
        let connections = self.health.websocket_connections.load(Ordering::Relaxed);
        let total = self.health.total_calls.load(Ordering::Relaxed);
        let successful = self.health.successful_calls.load(Ordering::Relaxed);
        let failed = self.health.failed_calls.load(Ordering::Relaxed);

        if total == 0 && connections == 0 {
            return;
        }

        let mut payload = Map::new();
        payload.insert("reporting_interval_sec".into(), interval_secs.into());
        payload.insert("websocket_connections".into(), connections.into());
        payload.insert("total_calls".into(), total.into());
        payload.insert("successful_calls".into(), successful.into());
        payload.insert("failed_calls".into(), failed.into());
        payload.insert("unit".into(), markers::UNIT_COUNT.into());
        self.sink
            .send(markers::HEALTH_STATS, &format.encode(&payload));
    }

    fn send_method_stats(
        &self,
        stats: &HashMap<String, MethodStats>,
        name_label: &str,
        marker: &str,
        interval_secs: u64,
        format: TelemetryFormat,
    ) {
        for entry in stats.values() {
            if entry.success_count == 0 && entry.error_count == 0 {
                continue;
            }

            let mut payload = Map::new();
            payload.insert("plugin_name".into(), entry.plugin.clone().into());
            payload.insert(name_label.into(), entry.name.clone().into());
            payload.insert("reporting_interval_sec".into(), interval_secs.into());

            payload.insert("success_count".into(), entry.success_count.into());
            if entry.success_count > 0 {
                let avg = entry.total_success_ms / entry.success_count as f64;
                payload.insert("success_latency_avg_ms".into(), number(avg));
                payload.insert(
                    "success_latency_min_ms".into(),
                    number(finite_or_zero(entry.min_success_ms)),
                );
                payload.insert(
                    "success_latency_max_ms".into(),
                    number(finite_or_zero(entry.max_success_ms)),
                );
            }

            payload.insert("error_count".into(), entry.error_count.into());
            if entry.error_count > 0 {
                let avg = entry.total_error_ms / entry.error_count as f64;
                payload.insert("error_latency_avg_ms".into(), number(avg));
                payload.insert(
                    "error_latency_min_ms".into(),
                    number(finite_or_zero(entry.min_error_ms)),
                );
                payload.insert(
                    "error_latency_max_ms".into(),
                    number(finite_or_zero(entry.max_error_ms)),
                );
            }

            payload.insert(
                "total_count".into(),
                (entry.success_count + entry.error_count).into(),
            );
            self.sink.send(marker, &format.encode(&payload));
        }
    }

    fn send_latency_stats(
        &self,
        stats: &HashMap<String, LatencyStats>,
        name_label: &str,
        marker: &str,
        interval_secs: u64,
        format: TelemetryFormat,
    ) {
        for entry in stats.values() {
            if entry.count == 0 {
                continue;
            }

            let mut payload = Map::new();
            payload.insert("plugin_name".into(), entry.plugin.clone().into());
            payload.insert(name_label.into(), entry.name.clone().into());
            payload.insert("reporting_interval_sec".into(), interval_secs.into());
            payload.insert("count".into(), entry.count.into());
            payload.insert(
                "avg_ms".into(),
                number(entry.total_ms / entry.count as f64),
            );
            payload.insert("min_ms".into(), number(finite_or_zero(entry.min_ms)));
            payload.insert("max_ms".into(), number(finite_or_zero(entry.max_ms)));
            payload.insert("total_ms".into(), number(entry.total_ms));
            payload.insert("unit".into(), markers::UNIT_MILLISECONDS.into());
            self.sink.send(marker, &format.encode(&payload));
        }
    }

    fn send_error_counters(
        &self,
        counters: &HashMap<String, u32>,
        prefix: &str,
        interval_secs: u64,
        format: TelemetryFormat,
    ) {
        for (name, count) in counters {
            let marker = format!("{prefix}{name}{}", markers::SPLIT_SUFFIX);
            let mut payload = Map::new();
            payload.insert("reporting_interval_sec".into(), interval_secs.into());
            payload.insert("sum".into(), (*count).into());
            payload.insert("count".into(), 1.into());
            payload.insert("unit".into(), markers::UNIT_COUNT.into());
            self.sink.send(&marker, &format.encode(&payload));
        }
    }

    fn send_generic_metrics(
        &self,
        metrics: &HashMap<String, MetricData>,
        interval_secs: u64,
        format: TelemetryFormat,
    ) {
        for (name, data) in metrics {
            if data.count == 0 {
                continue;
            }
            let mut payload = Map::new();
            payload.insert("sum".into(), number(data.sum));
            payload.insert("min".into(), number(finite_or_zero(data.min)));
            payload.insert("max".into(), number(finite_or_zero(data.max)));
            payload.insert("count".into(), data.count.into());
            payload.insert("avg".into(), number(data.sum / data.count as f64));
            payload.insert("unit".into(), data.unit.clone().into());
            payload.insert("reporting_interval_sec".into(), interval_secs.into());
            self.sink.send(name, &format.encode(&payload));
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn extract_field(event_data: &str, field: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(event_data).ok()?;
    parsed.get(field)?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sink::MemorySink;
    use serde_json::json;

    fn test_context() -> GatewayContext {
        GatewayContext::new(1, 1, "test.app")
    }

    fn aggregator_with_sink() -> (Arc<TelemetryAggregator>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let aggregator = TelemetryAggregator::new(TelemetryConfig::default(), sink.clone());
        (aggregator, sink)
    }

    fn payload_for<'a>(
        records: &'a [(String, String)],
        marker: &str,
    ) -> Option<&'a String> {
        records
            .iter()
            .find(|(name, _)| name == marker)
            .map(|(_, payload)| payload)
    }

    #[test]
    fn metric_name_grammar_classification() {
        assert_eq!(
            parse_api_metric_name(
                "AppGw_PluginName_LaunchDelegate_MethodName_session_Success_split"
            ),
            Some(("LaunchDelegate".into(), "session".into(), false))
        );
        assert_eq!(
            parse_api_metric_name("AppGw_PluginName_Badger_MethodName_setValue_Error_split"),
            Some(("Badger".into(), "setValue".into(), true))
        );
        assert_eq!(
            parse_service_metric_name(
                "AppGw_PluginName_OttServices_ServiceName_ThorPermissionService_Success_split"
            ),
            Some(("OttServices".into(), "ThorPermissionService".into(), false))
        );
        assert_eq!(
            parse_api_latency_metric_name(
                "AppGw_PluginName_Badger_ApiName_GetSettings_ApiLatency_split"
            ),
            Some(("Badger".into(), "GetSettings".into()))
        );
        assert_eq!(
            parse_service_latency_metric_name(
                "AppGw_PluginName_Badger_ServiceName_AuthService_ServiceLatency_split"
            ),
            Some(("Badger".into(), "AuthService".into()))
        );

        // Names without the explicit tags fall through to the generic map.
        assert_eq!(parse_api_metric_name("AppGwBootstrapTime_split"), None);
        assert_eq!(
            parse_api_metric_name("AppGw_PluginName__MethodName_x_Success_split"),
            None
        );
        assert_eq!(
            parse_api_latency_metric_name("AppGw_PluginName_P_ApiName__ApiLatency_split"),
            None
        );
        assert_eq!(parse_service_metric_name("AppGXYS_abc_def_split"), None);
    }

    #[test]
    fn compact_encoding_drops_keys_and_groups_nested_objects() {
        let mut payload = Map::new();
        payload.insert("interval".into(), 3600.into());
        payload.insert(
            "failures".into(),
            json!([
                { "api": "GetData", "count": 5 },
                { "api": "SetConfig", "count": 2 }
            ]),
        );
        assert_eq!(
            TelemetryFormat::Compact.encode(&payload),
            "3600,(GetData,5),(SetConfig,2)"
        );
    }

    #[test]
    fn compact_encoding_number_and_bool_rules() {
        let mut payload = Map::new();
        payload.insert("ws".into(), 12.into());
        payload.insert("avg".into(), json!(1.5));
        payload.insert("whole".into(), json!(200.0));
        payload.insert("enabled".into(), true.into());
        payload.insert("name".into(), "Badger".into());
        assert_eq!(
            TelemetryFormat::Compact.encode(&payload),
            "12,1.50,200,true,Badger"
        );
    }

    #[tokio::test]
    async fn method_stats_flush_matches_aggregation_contract() {
        let (aggregator, sink) = aggregator_with_sink();
        aggregator.initialize();

        let ctx = test_context();
        for latency in [100.0, 200.0, 300.0] {
            aggregator.record_metric(
                &ctx,
                "AppGw_PluginName_P_MethodName_M_Success_split",
                latency,
                markers::UNIT_MILLISECONDS,
            );
        }
        aggregator.flush();

        let records = sink.records();
        let payload = payload_for(&records, markers::API_METHOD_STATS).unwrap();
        let value: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(value["plugin_name"], "P");
        assert_eq!(value["method_name"], "M");
        assert_eq!(value["success_count"], 3);
        assert_eq!(value["success_latency_avg_ms"], 200);
        assert_eq!(value["success_latency_min_ms"], 100);
        assert_eq!(value["success_latency_max_ms"], 300);
        assert_eq!(value["error_count"], 0);
        assert_eq!(value["total_count"], 3);

        aggregator.deinitialize();
    }

    #[tokio::test]
    async fn flush_resets_interval_counters_but_not_gauge_or_bootstrap() {
        let (aggregator, sink) = aggregator_with_sink();
        aggregator.initialize();

        aggregator.increment_websocket_connections();
        aggregator.increment_websocket_connections();
        aggregator.increment_total_calls();
        aggregator.increment_successful_calls();
        aggregator.record_bootstrap_time(150);
        aggregator.record_bootstrap_time(50);

        // Every bootstrap report emits the cumulative pair immediately.
        let bootstrap_records: Vec<Value> = sink
            .records()
            .iter()
            .filter(|(marker, _)| marker == markers::BOOTSTRAP_TIME)
            .map(|(_, payload)| serde_json::from_str(payload).unwrap())
            .collect();
        assert_eq!(bootstrap_records.len(), 2);
        assert_eq!(bootstrap_records[0]["duration_ms"], 150);
        assert_eq!(bootstrap_records[0]["plugins_loaded"], 1);
        assert_eq!(bootstrap_records[1]["duration_ms"], 200);
        assert_eq!(bootstrap_records[1]["plugins_loaded"], 2);

        aggregator.flush();

        let records = sink.records();
        let health: Value =
            serde_json::from_str(payload_for(&records, markers::HEALTH_STATS).unwrap()).unwrap();
        assert_eq!(health["websocket_connections"], 2);
        assert_eq!(health["total_calls"], 1);
        assert_eq!(health["successful_calls"], 1);
        assert_eq!(health["failed_calls"], 0);

        sink.clear();
        aggregator.flush();

        // Gauge and cumulative bootstrap total survive the reset, interval
        // counters do not.
        let records = sink.records();
        let health: Value =
            serde_json::from_str(payload_for(&records, markers::HEALTH_STATS).unwrap()).unwrap();
        assert_eq!(health["websocket_connections"], 2);
        assert_eq!(health["total_calls"], 0);
        assert_eq!(aggregator.bootstrap_total_ms(), 200);

        aggregator.deinitialize();
    }

    #[tokio::test]
    async fn gauge_never_goes_negative() {
        let (aggregator, _sink) = aggregator_with_sink();
        aggregator.decrement_websocket_connections();
        assert_eq!(aggregator.websocket_connections(), 0);
        aggregator.increment_websocket_connections();
        aggregator.decrement_websocket_connections();
        aggregator.decrement_websocket_connections();
        assert_eq!(aggregator.websocket_connections(), 0);
    }

    #[tokio::test]
    async fn api_error_events_forward_immediately_and_count() {
        let (aggregator, sink) = aggregator_with_sink();
        aggregator.initialize();

        let data = r#"{"plugin":"Badger","api":"GetData","error":"TIMEOUT"}"#;
        aggregator.record_event(&test_context(), markers::PLUGIN_API_ERROR, data);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, markers::PLUGIN_API_ERROR);
        assert_eq!(records[0].1, data);

        sink.clear();
        aggregator.flush();
        let records = sink.records();
        let counter = payload_for(&records, "AppGwApiErrorCount_GetData_split").unwrap();
        let value: Value = serde_json::from_str(counter).unwrap();
        assert_eq!(value["sum"], 1);
        assert_eq!(value["count"], 1);

        aggregator.deinitialize();
    }

    #[tokio::test]
    async fn cache_threshold_triggers_flush() {
        let (aggregator, sink) = aggregator_with_sink();
        aggregator.set_cache_threshold(2);
        aggregator.initialize();

        let ctx = test_context();
        aggregator.record_metric(&ctx, "custom_metric", 5.0, markers::UNIT_COUNT);
        assert!(sink.records().is_empty());
        aggregator.record_metric(&ctx, "custom_metric", 7.0, markers::UNIT_COUNT);

        let records = sink.records();
        let payload = payload_for(&records, "custom_metric").unwrap();
        let value: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(value["sum"], 12);
        assert_eq!(value["min"], 5);
        assert_eq!(value["max"], 7);
        assert_eq!(value["count"], 2);
        assert_eq!(value["avg"], 6);
        assert_eq!(value["unit"], "count");

        aggregator.deinitialize();
    }

    #[tokio::test]
    async fn init_and_deinit_are_idempotent() {
        let (aggregator, sink) = aggregator_with_sink();
        aggregator.initialize();
        aggregator.initialize();

        // Before init nothing is accepted; after deinit nothing is accepted.
        aggregator.deinitialize();
        aggregator.deinitialize();

        sink.clear();
        aggregator.record_event(&test_context(), "some_event", "{}");
        aggregator.record_metric(&test_context(), "m", 1.0, markers::UNIT_COUNT);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn uninitialized_calls_are_silent_noops() {
        let (aggregator, sink) = aggregator_with_sink();
        aggregator.record_event(
            &test_context(),
            markers::PLUGIN_API_ERROR,
            r#"{"api":"X"}"#,
        );
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn bootstrap_metric_name_routes_to_bootstrap_recorder() {
        let (aggregator, sink) = aggregator_with_sink();
        aggregator.initialize();
        aggregator.record_metric(
            &test_context(),
            markers::BOOTSTRAP_TIME,
            125.0,
            markers::UNIT_MILLISECONDS,
        );
        assert_eq!(aggregator.bootstrap_total_ms(), 125);

        let records = sink.records();
        let payload: Value =
            serde_json::from_str(payload_for(&records, markers::BOOTSTRAP_TIME).unwrap()).unwrap();
        assert_eq!(payload["duration_ms"], 125);
        assert_eq!(payload["plugins_loaded"], 1);
        aggregator.deinitialize();
    }

    #[tokio::test]
    async fn service_latency_flush_payload_shape() {
        let (aggregator, sink) = aggregator_with_sink();
        aggregator.set_format(TelemetryFormat::Json);
        aggregator.initialize();

        let ctx = test_context();
        aggregator.record_metric(
            &ctx,
            "AppGw_PluginName_Ott_ServiceName_Thor_ServiceLatency_split",
            80.0,
            markers::UNIT_MILLISECONDS,
        );
        aggregator.record_metric(
            &ctx,
            "AppGw_PluginName_Ott_ServiceName_Thor_ServiceLatency_split",
            120.0,
            markers::UNIT_MILLISECONDS,
        );
        aggregator.flush();

        let records = sink.records();
        let payload = payload_for(&records, markers::SERVICE_LATENCY).unwrap();
        let value: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(value["plugin_name"], "Ott");
        assert_eq!(value["service_name"], "Thor");
        assert_eq!(value["count"], 2);
        assert_eq!(value["avg_ms"], 100);
        assert_eq!(value["min_ms"], 80);
        assert_eq!(value["max_ms"], 120);
        assert_eq!(value["total_ms"], 200);

        aggregator.deinitialize();
    }
}
