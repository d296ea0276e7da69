//! Per-session counters and snapshots.
//!
//! Counters are written by exactly one reader thread and read by any number
//! of observers, so plain atomics are enough; no lock is needed. A snapshot
//! is a value computed at call time and never changes afterwards.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Live counters for one session. Monotonic until the session closes.
#[derive(Debug)]
pub struct SessionStats {
    port: String,
    messages: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
    started: Instant,
}

impl SessionStats {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            messages: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Record one classified message of `byte_len` raw bytes.
    pub fn record_message(&self, byte_len: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(byte_len as u64, Ordering::Relaxed);
    }

    /// Record one read error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters into an immutable snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            port: self.port.clone(),
            messages: self.messages.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
        }
    }
}

/// A point-in-time copy of a session's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub port: String,
    pub messages: u64,
    pub bytes: u64,
    pub errors: u64,
    pub elapsed_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_counters_accumulate() {
        let stats = SessionStats::new("SIM0");
        stats.record_message(10);
        stats.record_message(22);
        stats.record_error();

        let snap = stats.snapshot();
        assert_eq!(snap.port, "SIM0");
        assert_eq!(snap.messages, 2);
        assert_eq!(snap.bytes, 32);
        assert_eq!(snap.errors, 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let stats = SessionStats::new("SIM0");
        stats.record_message(5);
        let before = stats.snapshot();

        stats.record_message(5);
        let after = stats.snapshot();

        assert_eq!(before.messages, 1);
        assert_eq!(after.messages, 2);
        assert!(after.elapsed_seconds >= before.elapsed_seconds);
    }
}
