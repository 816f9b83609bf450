/// Opaque key/value output for the telemetry aggregator. Markers are ASCII
/// strings suffixed `_split`; payloads are JSON or the compact encoding.
pub trait TelemetrySink: Send + Sync {
    fn send(&self, marker: &str, payload: &str);
}
