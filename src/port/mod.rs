//! Serial port abstraction layer.
//!
//! Separates the engine from the `serialport` crate so every component can
//! run against scripted mock devices in tests.

mod error;
mod mock;
mod sys;
mod traits;

pub use error::PortError;
pub use mock::{MockPortFarm, MockSerialLink};
pub use sys::{SystemPortOpener, SystemSerialLink};
pub use traits::{PortOpener, SerialLink};
