//! Port-level error types.
//!
//! Kept separate from the engine-level `EngineError` so the port abstraction
//! can be reused without pulling in session semantics.

use thiserror::Error;

/// Errors that can occur during serial port operations.
#[derive(Debug, Error)]
pub enum PortError {
    /// The specified serial port was not found on the system.
    #[error("serial port not found: {0}")]
    NotFound(String),

    /// The port is busy or the caller lacks permission to open it.
    #[error("serial port unavailable: {0}")]
    Unavailable(String),

    /// An I/O error occurred during a read or write.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timed out.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The link has already been released.
    #[error("port link is closed")]
    NotOpen,

    /// A serialport-specific error occurred.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port: impl Into<String>) -> Self {
        Self::NotFound(port.into())
    }

    /// Create an Unavailable error from a port name or message.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a Timeout error from a duration.
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout(duration)
    }

    /// True for errors that mean "no data right now" rather than a fault.
    ///
    /// Read loops treat these as a normal empty poll and keep going.
    pub fn is_transient_empty(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PortError::not_found("/dev/ttyUSB0");
        assert_eq!(err.to_string(), "serial port not found: /dev/ttyUSB0");

        let err = PortError::unavailable("/dev/ttyS0 is busy");
        assert_eq!(
            err.to_string(),
            "serial port unavailable: /dev/ttyS0 is busy"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(PortError::timeout(std::time::Duration::from_millis(50)).is_transient_empty());
        assert!(PortError::Io(std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            "no data"
        ))
        .is_transient_empty());
        assert!(!PortError::NotOpen.is_transient_empty());
        assert!(
            !PortError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
                .is_transient_empty()
        );
    }
}
