//! Serial device auto-discovery and multi-device telemetry streaming.
//!
//! Given an unlabeled serial port, the engine discovers a working baud rate
//! and a best-guess device identity by probing a fixed grid of rates and
//! commands, then streams newline-delimited telemetry from any number of
//! connected devices concurrently, classifying each line into a typed
//! record.
//!
//! # Modules
//!
//! - `manager`: connect/disconnect/pause/resume command surface and the
//!   authoritative session map
//! - `detect`: baud-and-probe grid detection with device labeling
//! - `reader`: per-device read loop and line delimiting
//! - `classify`: priority-ordered line classifier
//! - `stats`: per-session counters and snapshots
//! - `port`: serial port abstraction (real and mock)
//! - `registry`: OS port enumeration
//! - `events`: immutable value types crossing thread boundaries
//! - `config`: timing and sizing knobs with TOML loading
//! - `error`: engine-level error taxonomy

pub mod classify;
pub mod config;
pub mod detect;
pub mod error;
pub mod events;
pub mod manager;
pub mod port;
pub mod reader;
pub mod registry;
pub mod stats;

// Re-export the types most callers need.
pub use classify::{classify, RecordKind, RecordPayload, ScalarValue};
pub use config::{ConfigError, EngineConfig};
pub use detect::{DeviceDetector, ProbeAttempt, BAUD_RATES, PROBE_COMMANDS};
pub use error::{EngineError, Result};
pub use events::{
    DataRecord, DetectionOutcome, DetectionResult, EngineEvent, PortInfo, SessionInfo,
    SessionState,
};
pub use manager::ConnectionManager;
pub use port::{MockPortFarm, PortError, PortOpener, SerialLink, SystemPortOpener};
pub use registry::list_ports;
pub use stats::StatsSnapshot;
