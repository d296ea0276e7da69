//! Value types that cross thread boundaries.
//!
//! Everything here is an immutable snapshot handed off through channels:
//! records, detection results, session state transitions. Nothing holds a
//! live reference into engine state.

use crate::classify::{RecordKind, RecordPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One enumerated serial port. Identity is the id (system path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub id: String,
    pub description: String,
}

/// One classified unit of telemetry from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub timestamp: DateTime<Utc>,
    pub port: String,
    pub kind: RecordKind,
    pub payload: RecordPayload,
}

/// Outcome of one detection run. `NotDetected` is a valid terminal result,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DetectionOutcome {
    Detected { baud_rate: u32, device_label: String },
    NotDetected,
}

/// Result of one detection run against one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub port: String,
    #[serde(flatten)]
    pub outcome: DetectionOutcome,
}

/// Session lifecycle states.
///
/// `Idle → Detecting → {Active, NotDetected}`; `Active → {Paused, Error,
/// Closed}`; `Paused → Active`. `Error`, `Closed` and `NotDetected` are
/// terminal; retrying takes a fresh connect or detect call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Detecting,
    Active,
    Paused,
    Error,
    Closed,
    NotDetected,
}

/// Point-in-time description of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub port: String,
    pub baud_rate: u32,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}

/// Events fanned out to subscribers over the broadcast channel.
///
/// Per port, records arrive in the order lines were received. Across ports
/// there is no ordering guarantee.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    DetectionProgress {
        port: String,
        attempts_done: usize,
        attempts_total: usize,
    },
    DetectionFinished(DetectionResult),
    Record(DataRecord),
    SessionStateChanged {
        port: String,
        state: SessionState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_result_serializes_flat() {
        let result = DetectionResult {
            port: "/dev/ttyUSB0".into(),
            outcome: DetectionOutcome::Detected {
                baud_rate: 115_200,
                device_label: "ESP32".into(),
            },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["port"], "/dev/ttyUSB0");
        assert_eq!(json["outcome"], "detected");
        assert_eq!(json["baud_rate"], 115_200);
    }

    #[test]
    fn test_event_tagging() {
        let event = EngineEvent::SessionStateChanged {
            port: "SIM0".into(),
            state: SessionState::Paused,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "session_state_changed");
        assert_eq!(json["state"], "paused");
    }
}
