//! Device detection.
//!
//! Probes an unlabeled port across a fixed grid of baud rates and probe
//! commands until something answers. Baud rates are the outer loop, in
//! ascending order; probe commands are the inner loop, in enumeration order.
//! The first combination that elicits a long-enough response wins outright;
//! there is no scoring across candidates. Exhausting the grid is a normal
//! outcome (`NotDetected`), not an error.

use crate::config::EngineConfig;
use crate::events::{DetectionOutcome, DetectionResult, EngineEvent};
use crate::port::{PortError, PortOpener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Baud rates to test, ascending. Slow legacy rates first keeps the grid
/// order deterministic and matches how most hobby devices default.
pub const BAUD_RATES: &[u32] = &[
    9600, 19_200, 38_400, 57_600, 115_200, 230_400, 460_800, 921_600, 1_000_000,
];

/// Probe commands, in the order they are tried at each baud rate. Short,
/// newline-terminated, and harmless to the common device families.
pub const PROBE_COMMANDS: &[&[u8]] = &[b"\r\n", b"AT\r\n", b"*IDN?\r\n", b"ID\r\n", b"?\r\n"];

/// Keyword list for labeling, in priority order; the first substring found
/// (case-insensitive) in the response names the device.
pub const DEVICE_KEYWORDS: &[(&str, &str)] = &[
    ("arduino", "Arduino"),
    ("esp32", "ESP32"),
    ("esp8266", "ESP8266"),
    ("teensy", "Teensy"),
    ("pico", "Raspberry Pi Pico"),
    ("raspberry", "Raspberry Pi"),
    ("nucleo", "STM32 Nucleo"),
    ("stm32", "STM32"),
    ("$gp", "GPS (NMEA)"),
    ("$gn", "GPS (NMEA)"),
    ("gps", "GPS"),
    ("modem", "Modem"),
];

/// Label used when a device answers but matches no known keyword.
pub const GENERIC_LABEL: &str = "Serial device";

/// One cell of the probe grid. Value type, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub baud_rate: u32,
    pub command: &'static [u8],
    pub timeout: Duration,
}

/// The full grid in trial order: every probe command at every baud rate.
pub fn probe_grid(timeout: Duration) -> impl Iterator<Item = ProbeAttempt> {
    BAUD_RATES.iter().flat_map(move |&baud_rate| {
        PROBE_COMMANDS.iter().map(move |&command| ProbeAttempt {
            baud_rate,
            command,
            timeout,
        })
    })
}

/// Total number of grid cells, for progress reporting.
pub fn grid_size() -> usize {
    BAUD_RATES.len() * PROBE_COMMANDS.len()
}

/// Derive a device label from a probe response via the keyword list.
pub fn derive_label(response: &str) -> String {
    let lowered = response.to_lowercase();
    for (keyword, label) in DEVICE_KEYWORDS {
        if lowered.contains(keyword) {
            return (*label).to_string();
        }
    }
    GENERIC_LABEL.to_string()
}

/// Probes one port at a time. The manager enforces that at most one
/// detector runs per port.
pub struct DeviceDetector {
    opener: Arc<dyn PortOpener>,
    config: EngineConfig,
    events: broadcast::Sender<EngineEvent>,
}

impl DeviceDetector {
    pub fn new(
        opener: Arc<dyn PortOpener>,
        config: EngineConfig,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            opener,
            config,
            events,
        }
    }

    /// Run the grid against `port` until a response qualifies, the grid is
    /// exhausted, or `cancel` is raised.
    ///
    /// Progress is a coarse attempts-completed over total ratio, an
    /// approximation rather than a time estimate. An unreachable port
    /// (missing or busy on the very first open) is surfaced as an error;
    /// open or timeout failures deeper in the grid count as non-matches.
    pub fn detect(&self, port: &str, cancel: &AtomicBool) -> Result<DetectionResult, PortError> {
        let total = grid_size();
        let mut attempts_done = 0usize;

        for attempt in probe_grid(self.config.open_timeout()) {
            if cancel.load(Ordering::SeqCst) {
                debug!(port, "detection cancelled");
                break;
            }

            let response = match self.try_attempt(port, &attempt) {
                Ok(response) => response,
                Err(e) if attempts_done == 0 && is_unreachable(&e) => return Err(e),
                Err(e) => {
                    debug!(port, baud = attempt.baud_rate, error = %e, "attempt failed");
                    None
                }
            };

            attempts_done += 1;
            let _ = self.events.send(EngineEvent::DetectionProgress {
                port: port.to_string(),
                attempts_done,
                attempts_total: total,
            });

            if let Some(response) = response {
                let device_label = derive_label(&response);
                info!(
                    port,
                    baud = attempt.baud_rate,
                    label = %device_label,
                    "device detected"
                );
                return Ok(self.finish(
                    port,
                    DetectionOutcome::Detected {
                        baud_rate: attempt.baud_rate,
                        device_label,
                    },
                ));
            }
        }

        debug!(port, attempts_done, "detection exhausted");
        Ok(self.finish(port, DetectionOutcome::NotDetected))
    }

    /// One grid cell: open, settle, clear stale input, write the probe,
    /// poll briefly for a response, close regardless of outcome.
    fn try_attempt(
        &self,
        port: &str,
        attempt: &ProbeAttempt,
    ) -> Result<Option<String>, PortError> {
        debug!(
            port,
            baud = attempt.baud_rate,
            probe = %String::from_utf8_lossy(attempt.command).trim_end(),
            "probing"
        );

        let mut link = self.opener.open(port, attempt.baud_rate, attempt.timeout)?;

        // Some devices reset when the port opens and spew a boot banner.
        // Wait it out, then discard it so it cannot pass for a response.
        std::thread::sleep(self.config.settle_delay());
        link.clear_input()?;

        link.write_bytes(attempt.command)?;

        for _ in 0..self.config.probe_poll_attempts {
            if link.bytes_to_read().unwrap_or(0) > 0 {
                break;
            }
            std::thread::sleep(self.config.probe_poll_interval());
        }

        let mut buffer = vec![0u8; 1024];
        let response = match link.read_bytes(&mut buffer) {
            Ok(n) => {
                let decoded = String::from_utf8_lossy(&buffer[..n]).trim().to_string();
                if decoded.len() >= self.config.min_response_len {
                    Some(decoded)
                } else {
                    None
                }
            }
            Err(e) if e.is_transient_empty() => None,
            Err(e) => return Err(e),
        };
        Ok(response)
        // Link drops here, closing the port for this attempt.
    }

    fn finish(&self, port: &str, outcome: DetectionOutcome) -> DetectionResult {
        let result = DetectionResult {
            port: port.to_string(),
            outcome,
        };
        let _ = self
            .events
            .send(EngineEvent::DetectionFinished(result.clone()));
        result
    }
}

/// Errors meaning the port itself is unreachable, as opposed to a quiet or
/// mismatched device.
fn is_unreachable(e: &PortError) -> bool {
    matches!(e, PortError::NotFound(_) | PortError::Unavailable(_))
}
