//! # Telemetry Module
//!
//! Observability records for servo samples and bargraph updates.
//!
//! Records are serialized as JSON and emitted at TRACE level on the
//! `telemetry` tracing target. The stdout layer filters at INFO, so records
//! never reach stdout. They only appear in the rolling JSONL file the binary
//! adds when telemetry is enabled. Emission never fails the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace};

/// Tracing target carrying telemetry records.
pub const TELEMETRY_TARGET: &str = "telemetry";

/// One observability record.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryRecord {
    /// A continuous servo channel was sampled
    Platform {
        source: String,
        value: f32,
        thread: String,
    },
    /// The bargraph accepted a telemetry sample
    Bargraph {
        amount: f32,
        counter: u8,
        incrementing: bool,
        thread: String,
    },
}

#[derive(Serialize)]
struct Stamped<'a> {
    at: DateTime<Utc>,
    #[serde(flatten)]
    record: &'a TelemetryRecord,
}

impl TelemetryRecord {
    #[must_use]
    pub fn platform(source: &str, value: f32) -> Self {
        TelemetryRecord::Platform {
            source: source.to_string(),
            value,
            thread: current_thread_name(),
        }
    }

    #[must_use]
    pub fn bargraph(amount: f32, counter: u8, incrementing: bool) -> Self {
        TelemetryRecord::Bargraph {
            amount,
            counter,
            incrementing,
            thread: current_thread_name(),
        }
    }

    /// JSON line for this record, stamped with the current time.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(&Stamped {
            at: Utc::now(),
            record: self,
        })
    }
}

/// Name of the executing thread, or its id when unnamed.
#[must_use]
pub fn current_thread_name() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}

/// Emit a record on the telemetry target.
pub fn emit(record: &TelemetryRecord) {
    match record.to_json_line() {
        Ok(line) => trace!(target: TELEMETRY_TARGET, "{}", line),
        Err(e) => debug!("Dropping telemetry record: {}", e),
    }
}
