//! Engine-level errors.
//!
//! These cover command rejection and lifecycle faults. Detection exhaustion
//! and unclassifiable telemetry are not errors; they resolve to
//! `NotDetected` outcomes and `Raw` records internally.

use crate::port::PortError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by `ConnectionManager` commands.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `connect` on a port that already has a session. The existing session
    /// is left untouched.
    #[error("port {0} is already connected")]
    AlreadyConnected(String),

    /// `connect` or `detect` on a port with an in-flight detector.
    #[error("detection already in progress for port {0}")]
    DetectionInProgress(String),

    /// A command named a port with no session.
    #[error("no active session for port {0}")]
    NoSuchSession(String),

    /// Auto-detection exhausted the probe grid during `connect`.
    #[error("no device detected on port {0}")]
    NotDetected(String),

    /// The reader thread did not stop within the bounded wait; its link was
    /// force-closed so the handle does not leak.
    #[error("reader for port {0} did not stop within {1:?}; link force-closed")]
    StopTimeout(String, Duration),

    /// A resource-level port failure (can't open, write failed).
    #[error(transparent)]
    Port(#[from] PortError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
