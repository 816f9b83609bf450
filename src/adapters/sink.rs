use crate::ports::TelemetrySink;
use std::sync::Mutex;
use tracing::info;

/// Default sink: writes each marker/payload pair to the log. Used when no
/// external telemetry bus is wired in, so aggregation never fails the caller.
pub struct LogTelemetrySink;

impl TelemetrySink for LogTelemetrySink {
    fn send(&self, marker: &str, payload: &str) {
        info!(target: "telemetry", marker, payload, "telemetry record");
    }
}

/// Capture sink for tests: retains every record in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<(String, String)> {
        self.records.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }
}

impl TelemetrySink for MemorySink {
    fn send(&self, marker: &str, payload: &str) {
        self.records
            .lock()
            .unwrap()
            .push((marker.to_string(), payload.to_string()));
    }
}
