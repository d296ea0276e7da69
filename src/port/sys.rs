//! Real serial port implementation.
//!
//! Wraps the `serialport` crate behind the `SerialLink`/`PortOpener` traits.
//! All sessions use 8N1 with no flow control; only baud rate and timeout
//! vary, which is what the detection grid enumerates.

use super::error::PortError;
use super::traits::{PortOpener, SerialLink};
use std::io::{Read, Write};
use std::time::Duration;

/// A live serial connection backed by the operating system.
pub struct SystemSerialLink {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SystemSerialLink {
    /// Open a port at the given baud rate, 8N1, no flow control.
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, PortError> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => PortError::not_found(port_name),
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    PortError::unavailable(format!("{port_name}: {e}"))
                }
                _ => PortError::Serial(e),
            })?;

        Ok(Self {
            port,
            name: port_name.to_string(),
        })
    }
}

impl SerialLink for SystemSerialLink {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        self.port.write(data).map_err(PortError::Io)
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        self.port.read(buffer).map_err(PortError::Io)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError> {
        self.port.set_timeout(timeout).map_err(PortError::Serial)
    }

    fn clear_input(&mut self) -> Result<(), PortError> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(PortError::Serial)
    }

    fn bytes_to_read(&self) -> Option<usize> {
        self.port.bytes_to_read().ok().map(|n| n as usize)
    }
}

impl std::fmt::Debug for SystemSerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSerialLink")
            .field("name", &self.name)
            .field("baud_rate", &self.port.baud_rate().ok())
            .finish()
    }
}

/// Opener backed by the OS serial stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, PortError> {
        Ok(Box::new(SystemSerialLink::open(port, baud_rate, timeout)?))
    }
}
