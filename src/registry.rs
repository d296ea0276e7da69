//! Port enumeration.
//!
//! Thin wrapper over the OS port registry; consumed by callers that want to
//! feed ports into detection or connect commands.

use crate::events::PortInfo;
use crate::port::PortError;

/// Enumerate available serial ports with their OS-provided descriptions.
pub fn list_ports() -> Result<Vec<PortInfo>, PortError> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(describe).collect())
}

fn describe(port: serialport::SerialPortInfo) -> PortInfo {
    let description = match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => {
            let product = usb.product.as_deref().unwrap_or("USB serial device");
            match usb.manufacturer.as_deref() {
                Some(manufacturer) => format!("{product} ({manufacturer})"),
                None => product.to_string(),
            }
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth serial port".to_string(),
        serialport::SerialPortType::PciPort => "PCI serial port".to_string(),
        serialport::SerialPortType::Unknown => "Serial port".to_string(),
    };
    PortInfo {
        id: port.port_name,
        description,
    }
}
