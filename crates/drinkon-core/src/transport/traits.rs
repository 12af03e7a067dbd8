//! BLE transport abstraction.
//!
//! Defines the `BleTransport` trait through which the kit issues requests
//! to the platform BLE stack, and the `TransportEvent`s the stack delivers
//! back. Requests never block: their completions arrive later as events,
//! serially for any one peripheral.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Bluetooth is powered off")]
    PoweredOff,

    #[error("Peripheral {0} is not connected")]
    NotConnected(PeripheralId),

    #[error("GATT error: {0}")]
    Gatt(String),
}

/// Stable identifier the platform assigns to a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(pub Uuid);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for PeripheralId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A discovered characteristic on a connected peripheral.
///
/// Handles are only valid for the connection they were discovered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub peripheral: PeripheralId,
    pub uuid: Uuid,
    /// ATT attribute handle assigned by the peripheral.
    pub attribute: u16,
}

/// Asynchronous completions and notifications from the BLE stack.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Radio power state changed.
    PowerChanged { powered_on: bool },
    /// App authorization to use Bluetooth changed.
    AuthorizationChanged { authorized: bool },
    /// Whether this host supports BLE at all.
    SupportChanged { supported: bool },
    /// An advertisement was received while scanning.
    Advertisement {
        peripheral: PeripheralId,
        name: Option<String>,
        rssi: Option<i16>,
        manufacturer_data: Option<Vec<u8>>,
    },
    Connected { peripheral: PeripheralId },
    ConnectFailed {
        peripheral: PeripheralId,
        error: Option<TransportError>,
    },
    Disconnected {
        peripheral: PeripheralId,
        error: Option<TransportError>,
    },
    ServicesDiscovered {
        peripheral: PeripheralId,
        result: Result<Vec<Uuid>, TransportError>,
    },
    /// The peripheral changed its GATT database; listed services must be rediscovered.
    ServicesInvalidated {
        peripheral: PeripheralId,
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: Uuid,
        result: Result<Vec<CharacteristicHandle>, TransportError>,
    },
    /// A read completed or a notification arrived.
    ValueUpdated {
        handle: CharacteristicHandle,
        result: Result<Vec<u8>, TransportError>,
    },
    WriteCompleted {
        handle: CharacteristicHandle,
        result: Result<(), TransportError>,
    },
    NotifyStateChanged {
        handle: CharacteristicHandle,
        result: Result<bool, TransportError>,
    },
}

impl TransportEvent {
    /// The peripheral this event concerns, if any.
    pub fn peripheral(&self) -> Option<PeripheralId> {
        match self {
            TransportEvent::PowerChanged { .. }
            | TransportEvent::AuthorizationChanged { .. }
            | TransportEvent::SupportChanged { .. } => None,
            TransportEvent::Advertisement { peripheral, .. }
            | TransportEvent::Connected { peripheral }
            | TransportEvent::ConnectFailed { peripheral, .. }
            | TransportEvent::Disconnected { peripheral, .. }
            | TransportEvent::ServicesDiscovered { peripheral, .. }
            | TransportEvent::ServicesInvalidated { peripheral, .. }
            | TransportEvent::CharacteristicsDiscovered { peripheral, .. } => Some(*peripheral),
            TransportEvent::ValueUpdated { handle, .. }
            | TransportEvent::WriteCompleted { handle, .. }
            | TransportEvent::NotifyStateChanged { handle, .. } => Some(handle.peripheral),
        }
    }
}

/// Abstract BLE central interface.
///
/// This trait enables:
/// - Platform backends (CoreBluetooth, BlueZ, WinRT)
/// - Mock implementation for unit testing
///
/// An `Err` means the request could not be issued at all; failures after
/// issuing are reported through the matching `TransportEvent`.
pub trait BleTransport: Send + Sync {
    /// Start scanning for advertisements from peripherals offering `services`.
    fn start_scan(&self, services: &[Uuid], allow_duplicates: bool)
    -> Result<(), TransportError>;

    fn stop_scan(&self) -> Result<(), TransportError>;

    fn connect(&self, peripheral: PeripheralId) -> Result<(), TransportError>;

    /// Disconnect, or cancel a pending connection attempt.
    fn disconnect(&self, peripheral: PeripheralId) -> Result<(), TransportError>;

    fn discover_services(
        &self,
        peripheral: PeripheralId,
        services: &[Uuid],
    ) -> Result<(), TransportError>;

    fn discover_characteristics(
        &self,
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<(), TransportError>;

    fn read_value(&self, handle: &CharacteristicHandle) -> Result<(), TransportError>;

    fn write_value(&self, handle: &CharacteristicHandle, data: &[u8])
    -> Result<(), TransportError>;

    fn set_notify(&self, handle: &CharacteristicHandle, enabled: bool)
    -> Result<(), TransportError>;
}
