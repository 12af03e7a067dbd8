//! Transport layer module.

pub mod mock;
pub mod traits;

pub use mock::{MockTransport, SimulatedDevice, TransportRequest};
pub use traits::{BleTransport, CharacteristicHandle, PeripheralId, TransportError, TransportEvent};
