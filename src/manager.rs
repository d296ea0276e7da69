//! Connection management.
//!
//! Owns the authoritative port-to-session map and serializes connect,
//! disconnect, pause and resume commands against it. One reader thread per
//! active session, one detector per in-flight detection, never more than
//! one of either per port. Results fan out to subscribers over a broadcast
//! channel; nothing is polled.

use crate::config::EngineConfig;
use crate::detect::DeviceDetector;
use crate::error::{EngineError, Result};
use crate::events::{
    DetectionOutcome, DetectionResult, EngineEvent, PortInfo, SessionInfo, SessionState,
};
use crate::port::{PortError, PortOpener, SystemPortOpener};
use crate::reader::{DeviceReader, SessionShared, SharedLink};
use crate::stats::StatsSnapshot;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Everything the manager tracks about one connected port.
struct SessionHandle {
    baud_rate: u32,
    started_at: DateTime<Utc>,
    shared: Arc<SessionShared>,
    link: SharedLink,
    join: std::thread::JoinHandle<()>,
}

struct Inner {
    opener: Arc<dyn PortOpener>,
    config: EngineConfig,
    events: broadcast::Sender<EngineEvent>,
    /// The single authoritative map. Mutated from command issuers and read
    /// for listings; reader threads never touch it.
    sessions: Mutex<HashMap<String, SessionHandle>>,
    /// In-flight detections, each with its cancellation flag.
    detections: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

/// Serializes all session commands and fans results out to subscribers.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(opener: Arc<dyn PortOpener>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                opener,
                config,
                events,
                sessions: Mutex::new(HashMap::new()),
                detections: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Manager over real OS serial ports.
    pub fn with_system_ports(config: EngineConfig) -> Self {
        Self::new(Arc::new(SystemPortOpener), config)
    }

    /// Subscribe to detection, record and session-state events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Connect a port and start streaming from it.
    ///
    /// With no baud hint, detection runs first and `NotDetected` is an
    /// error here (the caller asked for a connection it cannot have).
    /// Rejected synchronously, with no side effects, if the port already
    /// has a session or an in-flight detector.
    pub fn connect(&self, port: &str, baud_hint: Option<u32>) -> Result<SessionInfo> {
        self.reject_if_busy(port)?;

        let baud_rate = match baud_hint {
            Some(baud) => baud,
            None => match self.detect(port)?.outcome {
                DetectionOutcome::Detected { baud_rate, .. } => baud_rate,
                DetectionOutcome::NotDetected => {
                    return Err(EngineError::NotDetected(port.to_string()))
                }
            },
        };

        let link_box = self
            .inner
            .opener
            .open(port, baud_rate, self.inner.config.read_timeout())?;
        let link: SharedLink = Arc::new(Mutex::new(Some(link_box)));
        let shared = Arc::new(SessionShared::new(port));

        let reader = DeviceReader::new(
            port,
            Arc::clone(&link),
            Arc::clone(&shared),
            self.inner.config.clone(),
            self.inner.events.clone(),
        );

        let started_at = Utc::now();
        {
            let mut sessions = self.inner.sessions.lock();
            if sessions.contains_key(port) {
                // Lost a race with a concurrent connect; the link we opened
                // drops here and the existing session stays untouched.
                return Err(EngineError::AlreadyConnected(port.to_string()));
            }
            sessions.insert(
                port.to_string(),
                SessionHandle {
                    baud_rate,
                    started_at,
                    shared: Arc::clone(&shared),
                    link,
                    join: reader.spawn(),
                },
            );
        }

        info!(port, baud_rate, "session connected");
        self.emit_state(port, SessionState::Active);
        Ok(SessionInfo {
            port: port.to_string(),
            baud_rate,
            state: SessionState::Active,
            started_at,
        })
    }

    /// Stop the port's reader and remove its session.
    ///
    /// Waits a bounded time for the reader thread to observe the stop flag;
    /// if it does not, the link is forcibly released so the OS handle never
    /// leaks, and the timeout is reported.
    pub fn disconnect(&self, port: &str) -> Result<()> {
        let handle = self
            .inner
            .sessions
            .lock()
            .remove(port)
            .ok_or_else(|| EngineError::NoSuchSession(port.to_string()))?;

        handle.shared.running.store(false, Ordering::SeqCst);

        let deadline = Instant::now() + self.inner.config.stop_timeout();
        while !handle.join.is_finished() && Instant::now() < deadline {
            std::thread::sleep(self.inner.config.poll_interval());
        }

        if handle.join.is_finished() {
            let _ = handle.join.join();
            *handle.shared.state.lock() = SessionState::Closed;
            info!(port, "session closed");
            self.emit_state(port, SessionState::Closed);
            Ok(())
        } else {
            // The reader is wedged; take the link away from it. The thread
            // will find the slot empty on its next iteration and exit.
            drop(handle.link.lock().take());
            *handle.shared.state.lock() = SessionState::Closed;
            warn!(port, timeout = ?self.inner.config.stop_timeout(), "reader did not stop in time, link force-closed");
            self.emit_state(port, SessionState::Closed);
            Err(EngineError::StopTimeout(
                port.to_string(),
                self.inner.config.stop_timeout(),
            ))
        }
    }

    /// Pause streaming. Idempotent: pausing a paused session is a no-op,
    /// and only an actual transition emits an event.
    pub fn pause(&self, port: &str) -> Result<()> {
        let shared = self.session_shared(port)?;
        let mut state = shared.state.lock();
        if *state == SessionState::Active {
            shared.paused.store(true, Ordering::SeqCst);
            *state = SessionState::Paused;
            drop(state);
            self.emit_state(port, SessionState::Paused);
        }
        Ok(())
    }

    /// Resume streaming. A no-op on any non-paused session.
    pub fn resume(&self, port: &str) -> Result<()> {
        let shared = self.session_shared(port)?;
        let mut state = shared.state.lock();
        if *state == SessionState::Paused {
            shared.paused.store(false, Ordering::SeqCst);
            *state = SessionState::Active;
            drop(state);
            self.emit_state(port, SessionState::Active);
        }
        Ok(())
    }

    /// Write raw bytes to a connected port.
    pub fn send_raw(&self, port: &str, bytes: &[u8]) -> Result<usize> {
        let link = {
            let sessions = self.inner.sessions.lock();
            let handle = sessions
                .get(port)
                .ok_or_else(|| EngineError::NoSuchSession(port.to_string()))?;
            Arc::clone(&handle.link)
        };
        let mut slot = link.lock();
        let link = slot.as_mut().ok_or(PortError::NotOpen)?;
        Ok(link.write_bytes(bytes)?)
    }

    /// Snapshot every live session.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.inner.sessions.lock();
        let mut infos: Vec<SessionInfo> = sessions
            .iter()
            .map(|(port, handle)| SessionInfo {
                port: port.clone(),
                baud_rate: handle.baud_rate,
                state: *handle.shared.state.lock(),
                started_at: handle.started_at,
            })
            .collect();
        infos.sort_by(|a, b| a.port.cmp(&b.port));
        infos
    }

    /// Current counters for one session.
    pub fn stats(&self, port: &str) -> Result<StatsSnapshot> {
        Ok(self.session_shared(port)?.stats.snapshot())
    }

    /// Run detection on one port.
    ///
    /// Rejected if the port is connected or already under detection; at
    /// most one detector ever runs per port.
    pub fn detect(&self, port: &str) -> Result<DetectionResult> {
        if self.inner.sessions.lock().contains_key(port) {
            return Err(EngineError::AlreadyConnected(port.to_string()));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut detections = self.inner.detections.lock();
            if detections.contains_key(port) {
                return Err(EngineError::DetectionInProgress(port.to_string()));
            }
            detections.insert(port.to_string(), Arc::clone(&cancel));
        }
        let _guard = DetectionGuard {
            inner: &self.inner,
            port,
        };

        self.emit_state(port, SessionState::Detecting);
        let detector = DeviceDetector::new(
            Arc::clone(&self.inner.opener),
            self.inner.config.clone(),
            self.inner.events.clone(),
        );
        let result = detector.detect(port, &cancel)?;

        if result.outcome == DetectionOutcome::NotDetected {
            self.emit_state(port, SessionState::NotDetected);
        }
        Ok(result)
    }

    /// Raise the cancellation flag on an in-flight detection. Returns
    /// whether one was in flight.
    pub fn cancel_detection(&self, port: &str) -> bool {
        match self.inner.detections.lock().get(port) {
            Some(cancel) => {
                cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Detect every given port through a bounded worker pool.
    ///
    /// Ports that are connected, already under detection, or unreachable
    /// are skipped with a warning; each completed detection is also
    /// published as a `DetectionFinished` event.
    pub fn scan_ports(&self, ports: &[PortInfo]) -> Vec<DetectionResult> {
        let queue: Mutex<VecDeque<&PortInfo>> = Mutex::new(ports.iter().collect());
        let results: Mutex<Vec<DetectionResult>> = Mutex::new(Vec::new());
        let workers = self.inner.config.scan_pool_size.clamp(1, ports.len().max(1));

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let next = queue.lock().pop_front();
                    let Some(port) = next else { break };
                    match self.detect(&port.id) {
                        Ok(result) => results.lock().push(result),
                        Err(e) => warn!(port = %port.id, error = %e, "scan skipped port"),
                    }
                });
            }
        });

        let mut results = results.into_inner();
        results.sort_by(|a, b| a.port.cmp(&b.port));
        results
    }

    /// Disconnect every session, reporting the first failure.
    pub fn shutdown(&self) -> Result<()> {
        let ports: Vec<String> = self.inner.sessions.lock().keys().cloned().collect();
        let mut first_err = None;
        for port in ports {
            match self.disconnect(&port) {
                Ok(()) | Err(EngineError::NoSuchSession(_)) => {}
                Err(e) if first_err.is_none() => first_err = Some(e),
                Err(_) => {}
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn session_shared(&self, port: &str) -> Result<Arc<SessionShared>> {
        let sessions = self.inner.sessions.lock();
        sessions
            .get(port)
            .map(|handle| Arc::clone(&handle.shared))
            .ok_or_else(|| EngineError::NoSuchSession(port.to_string()))
    }

    fn reject_if_busy(&self, port: &str) -> Result<()> {
        if self.inner.sessions.lock().contains_key(port) {
            return Err(EngineError::AlreadyConnected(port.to_string()));
        }
        if self.inner.detections.lock().contains_key(port) {
            return Err(EngineError::DetectionInProgress(port.to_string()));
        }
        Ok(())
    }

    fn emit_state(&self, port: &str, state: SessionState) {
        let _ = self.inner.events.send(EngineEvent::SessionStateChanged {
            port: port.to_string(),
            state,
        });
    }
}

/// Removes the detection entry when a detect call ends, success or not.
struct DetectionGuard<'a> {
    inner: &'a Inner,
    port: &'a str,
}

impl Drop for DetectionGuard<'_> {
    fn drop(&mut self) {
        self.inner.detections.lock().remove(self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockPortFarm;
    use pretty_assertions::assert_eq;

    fn manager_with(farm: &MockPortFarm) -> ConnectionManager {
        ConnectionManager::new(Arc::new(farm.clone()), EngineConfig::fast_for_tests())
    }

    #[test]
    fn test_connect_with_hint_creates_active_session() {
        let farm = MockPortFarm::new();
        farm.add_port("SIM0");
        let manager = manager_with(&farm);

        let info = manager.connect("SIM0", Some(9600)).unwrap();
        assert_eq!(info.state, SessionState::Active);
        assert_eq!(info.baud_rate, 9600);
        assert_eq!(manager.list_sessions().len(), 1);

        manager.disconnect("SIM0").unwrap();
        assert!(manager.list_sessions().is_empty());
    }

    #[test]
    fn test_connect_autodetects_without_hint() {
        let farm = MockPortFarm::new();
        farm.add_port("SIM0");
        farm.set_identity("SIM0", 57_600, b"Arduino Uno bootloader\r\n");
        let manager = manager_with(&farm);

        let info = manager.connect("SIM0", None).unwrap();
        assert_eq!(info.baud_rate, 57_600);

        manager.disconnect("SIM0").unwrap();
    }

    #[test]
    fn test_connect_silent_port_without_hint_is_not_detected() {
        let farm = MockPortFarm::new();
        farm.add_port("SIM0");
        let manager = manager_with(&farm);

        let err = manager.connect("SIM0", None).unwrap_err();
        assert!(matches!(err, EngineError::NotDetected(_)));
        assert!(manager.list_sessions().is_empty());
        assert_eq!(farm.open_handles(), 0);
    }

    #[test]
    fn test_unavailable_port_does_not_affect_others() {
        let farm = MockPortFarm::new();
        farm.add_port("SIM0");
        farm.add_port("SIM1");
        farm.set_unavailable("SIM0", true);
        let manager = manager_with(&farm);

        assert!(matches!(
            manager.connect("SIM0", Some(9600)),
            Err(EngineError::Port(PortError::Unavailable(_)))
        ));
        manager.connect("SIM1", Some(9600)).unwrap();
        assert_eq!(manager.list_sessions().len(), 1);

        manager.disconnect("SIM1").unwrap();
    }

    #[test]
    fn test_detect_rejected_while_connected() {
        let farm = MockPortFarm::new();
        farm.add_port("SIM0");
        let manager = manager_with(&farm);
        manager.connect("SIM0", Some(9600)).unwrap();

        assert!(matches!(
            manager.detect("SIM0"),
            Err(EngineError::AlreadyConnected(_))
        ));
        manager.disconnect("SIM0").unwrap();
    }

    #[test]
    fn test_send_raw_reaches_device() {
        let farm = MockPortFarm::new();
        farm.add_port("SIM0");
        let manager = manager_with(&farm);
        manager.connect("SIM0", Some(9600)).unwrap();

        let n = manager.send_raw("SIM0", b"LED ON\r\n").unwrap();
        assert_eq!(n, 8);
        assert_eq!(farm.write_log("SIM0"), vec![b"LED ON\r\n".to_vec()]);

        manager.disconnect("SIM0").unwrap();
    }

    #[test]
    fn test_commands_on_unknown_port_fail() {
        let farm = MockPortFarm::new();
        let manager = manager_with(&farm);

        assert!(matches!(
            manager.disconnect("GHOST"),
            Err(EngineError::NoSuchSession(_))
        ));
        assert!(matches!(
            manager.pause("GHOST"),
            Err(EngineError::NoSuchSession(_))
        ));
        assert!(matches!(
            manager.stats("GHOST"),
            Err(EngineError::NoSuchSession(_))
        ));
    }

    #[test]
    fn test_cancel_detection_without_one_in_flight() {
        let farm = MockPortFarm::new();
        let manager = manager_with(&farm);
        assert!(!manager.cancel_detection("SIM0"));
    }
}
