//! Core traits for the serial port abstraction.
//!
//! `SerialLink` is the byte-level I/O surface the reader and detector work
//! against; `PortOpener` is the factory that produces links. Both are trait
//! objects so the engine can run against real hardware or scripted mocks.

use super::error::PortError;
use std::time::Duration;

/// Byte-level I/O over one open serial connection.
///
/// Implementations must use bounded timeouts for reads so callers can poll
/// cooperatively; a read that finds no data within the timeout returns a
/// transient error (see [`PortError::is_transient_empty`]), never blocks
/// indefinitely.
pub trait SerialLink: Send + std::fmt::Debug {
    /// Write bytes to the port. Returns the number of bytes written.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Read available bytes into the buffer. Returns the number read.
    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// The port path this link is bound to.
    fn name(&self) -> &str;

    /// Adjust the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError>;

    /// Discard any unread input. Used before probing so stale boot chatter
    /// is not mistaken for a probe response.
    fn clear_input(&mut self) -> Result<(), PortError>;

    /// Bytes currently waiting to be read, if the backend can tell.
    fn bytes_to_read(&self) -> Option<usize> {
        None
    }
}

/// Factory for serial links, injected into the engine.
///
/// The detector opens and closes a link per probe attempt; the manager opens
/// one long-lived link per session. Routing both through this trait keeps
/// every open in one place and makes handle-leak testing possible.
pub trait PortOpener: Send + Sync {
    /// Open `port` at `baud_rate` with the given read timeout.
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, PortError>;
}
