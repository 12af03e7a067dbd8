//! DrinkOn-Core: BLE client engine for the DrinkOn smart water bottle.
//!
//! This crate discovers DrinkOn bottles from their advertisements, connects
//! to one at a time, and reads, decodes and publishes the bottle's status,
//! info, level sensor and hourly consumption log.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: UUIDs, characteristic payload codecs, 4-in-3 log packing,
//!   advertisement parsing
//! - **Transport**: BLE central abstraction (platform backends, mock)
//! - **Registry**: Peripherals seen while scanning
//! - **Service**: Characteristic discovery and read sequencing
//! - **Peripheral**: Connection state machine and auto-disconnect policy
//! - **Kit**: Top-level coordinator enforcing one operation at a time
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use std::time::Instant;
//! use drinkon_core::kit::{DrinkOnKit, KitConfig};
//! use drinkon_core::transport::{MockTransport, TransportEvent};
//!
//! let mut kit = DrinkOnKit::new(MockTransport::new(), KitConfig::default());
//! kit.handle_event(TransportEvent::PowerChanged { powered_on: true });
//! kit.scan(true).expect("scan refused");
//! // Feed transport callbacks to `kit.handle_event` and call
//! // `kit.tick(Instant::now())` from the host event loop.
//! kit.tick(Instant::now());
//! ```

pub mod error;
pub mod events;
pub mod kit;
pub mod options;
pub mod peripheral;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use error::{CodecError, KitError, RequestError};
pub use events::{KitEvent, KitObserver, LogLevel, NullObserver, QueuedObserver, TracingObserver};
pub use kit::{DrinkOnKit, KitConfig};
pub use options::{CharacteristicReadStatus, ConnectionOptions};
pub use peripheral::PeripheralSession;
pub use protocol::{
    Advertisement, CharacteristicKind, InfoCharacteristic, LevelAdvertisement,
    LevelSensorCharacteristic, LogCharacteristic, LogDataPoint, StatusCharacteristic,
};
pub use registry::{ScannedPeripheral, ScannedPeripheralRegistry};
pub use service::ServiceSession;
pub use state::{ConnectionState, KitState};
pub use transport::{
    BleTransport, CharacteristicHandle, MockTransport, PeripheralId, SimulatedDevice,
    TransportError, TransportEvent,
};
