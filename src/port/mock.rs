//! Mock serial ports for testing without hardware.
//!
//! `MockPortFarm` implements [`PortOpener`] over a set of scripted devices.
//! Each device can be given an identity (the baud rate it answers probes at
//! and the response it sends), queued telemetry lines for streaming tests,
//! and injected failures. The farm counts live handles so leak tests can
//! assert the open-handle baseline, and logs every open and write so
//! detection-order tests can verify the probe grid.

use super::error::PortError;
use super::traits::{PortOpener, SerialLink};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct MockDeviceState {
    /// Baud rate the device answers at, and the bytes it answers with.
    identity: Option<(u32, Vec<u8>)>,
    /// If set, only this exact probe elicits the identity response.
    respond_only_to: Option<Vec<u8>>,
    read_queue: VecDeque<u8>,
    write_log: Vec<Vec<u8>>,
    fail_reads: bool,
    unavailable: bool,
}

#[derive(Debug, Default)]
struct FarmState {
    devices: HashMap<String, Arc<Mutex<MockDeviceState>>>,
    /// Every successful open, in order: (port, baud).
    open_log: Vec<(String, u32)>,
}

/// A collection of scripted serial devices.
#[derive(Debug, Default, Clone)]
pub struct MockPortFarm {
    state: Arc<Mutex<FarmState>>,
    open_handles: Arc<AtomicUsize>,
}

impl MockPortFarm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a port. Until scripted further it is silent: opens succeed,
    /// reads find no data.
    pub fn add_port(&self, port: impl Into<String>) {
        let mut state = self.state.lock();
        state.devices.entry(port.into()).or_default();
    }

    fn device(&self, port: &str) -> Arc<Mutex<MockDeviceState>> {
        let state = self.state.lock();
        state
            .devices
            .get(port)
            .cloned()
            .unwrap_or_else(|| panic!("mock port {port} not registered"))
    }

    /// Script the device to answer probes with `response`, but only when
    /// opened at `baud`.
    pub fn set_identity(&self, port: &str, baud: u32, response: &[u8]) {
        self.device(port).lock().identity = Some((baud, response.to_vec()));
    }

    /// Restrict the identity response to one exact probe command.
    pub fn respond_only_to(&self, port: &str, probe: &[u8]) {
        self.device(port).lock().respond_only_to = Some(probe.to_vec());
    }

    /// Queue bytes for streaming reads. Callable while a reader is running.
    pub fn push_bytes(&self, port: &str, data: &[u8]) {
        self.device(port).lock().read_queue.extend(data);
    }

    /// Make every read on the port fail with an I/O error.
    pub fn set_read_error(&self, port: &str, fail: bool) {
        self.device(port).lock().fail_reads = fail;
    }

    /// Make opens on the port fail as busy/permission-denied.
    pub fn set_unavailable(&self, port: &str, unavailable: bool) {
        self.device(port).lock().unavailable = unavailable;
    }

    /// Number of links currently open across all devices.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Every successful open in order, as (port, baud) pairs.
    pub fn open_log(&self) -> Vec<(String, u32)> {
        self.state.lock().open_log.clone()
    }

    /// Everything written to the port, in order.
    pub fn write_log(&self, port: &str) -> Vec<Vec<u8>> {
        self.device(port).lock().write_log.clone()
    }
}

impl PortOpener for MockPortFarm {
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        _timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, PortError> {
        let device = {
            let mut state = self.state.lock();
            let device = state
                .devices
                .get(port)
                .cloned()
                .ok_or_else(|| PortError::not_found(port))?;
            state.open_log.push((port.to_string(), baud_rate));
            device
        };

        if device.lock().unavailable {
            return Err(PortError::unavailable(format!("{port} is busy")));
        }

        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSerialLink {
            name: port.to_string(),
            baud_rate,
            device,
            open_handles: Arc::clone(&self.open_handles),
        }))
    }
}

/// One open connection to a scripted device.
pub struct MockSerialLink {
    name: String,
    baud_rate: u32,
    device: Arc<Mutex<MockDeviceState>>,
    open_handles: Arc<AtomicUsize>,
}

impl SerialLink for MockSerialLink {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let mut device = self.device.lock();
        device.write_log.push(data.to_vec());

        // A probe at the right baud elicits the identity response.
        if let Some((identity_baud, response)) = device.identity.clone() {
            let probe_matches = match &device.respond_only_to {
                Some(expected) => expected.as_slice() == data,
                None => true,
            };
            if identity_baud == self.baud_rate && probe_matches {
                device.read_queue.extend(&response);
            }
        }

        Ok(data.len())
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let mut device = self.device.lock();

        if device.fail_reads {
            return Err(PortError::Io(std::io::Error::other(
                "injected read failure",
            )));
        }

        let mut n = 0;
        for slot in buffer.iter_mut() {
            match device.read_queue.pop_front() {
                Some(byte) => {
                    *slot = byte;
                    n += 1;
                }
                None => break,
            }
        }

        if n == 0 {
            return Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "no data available",
            )));
        }
        Ok(n)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_timeout(&mut self, _timeout: Duration) -> Result<(), PortError> {
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), PortError> {
        self.device.lock().read_queue.clear();
        Ok(())
    }

    fn bytes_to_read(&self) -> Option<usize> {
        Some(self.device.lock().read_queue.len())
    }
}

impl Drop for MockSerialLink {
    fn drop(&mut self) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MockSerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSerialLink")
            .field("name", &self.name)
            .field("baud_rate", &self.baud_rate)
            .finish()
    }
}
