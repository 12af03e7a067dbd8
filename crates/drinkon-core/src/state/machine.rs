//! Kit and peripheral connection states.

use std::fmt;

use crate::error::KitError;

/// Library-wide state of the kit.
///
/// The kit is in exactly one of these at a time: it either scans or
/// connects, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KitState {
    /// Radio state not yet reported.
    #[default]
    Unknown,
    /// Idle and able to scan or connect.
    Ready,
    Scanning,
    Connecting,
    Connected,
    BluetoothPoweredOff,
    BluetoothUnauthorized,
    /// Permanent for the life of the process.
    BluetoothUnsupported,
}

impl KitState {
    pub fn description(&self) -> &'static str {
        match self {
            KitState::Unknown => "Undefined state.",
            KitState::Ready => "Ready",
            KitState::Scanning => "Scanning for DrinkOn peripherals.",
            KitState::Connecting => "Attempting to connect to a DrinkOn peripheral.",
            KitState::Connected => "Connected to a DrinkOn peripheral.",
            KitState::BluetoothPoweredOff => "Bluetooth is powered off.",
            KitState::BluetoothUnauthorized => {
                "Bluetooth access has not been authorized on this device."
            }
            KitState::BluetoothUnsupported => "Bluetooth is not supported on this device.",
        }
    }

    /// Gate for starting a scan or a connection.
    ///
    /// `Ok` only in `Ready`; otherwise the error explaining why the
    /// hardware is not available.
    pub fn access_check(&self) -> Result<(), KitError> {
        match self {
            KitState::Ready => Ok(()),
            KitState::Unknown => Err(KitError::InternalError),
            KitState::Scanning => Err(KitError::BusyScanning),
            KitState::Connecting => Err(KitError::BusyConnecting),
            KitState::Connected => Err(KitError::BusyConnected),
            KitState::BluetoothPoweredOff => Err(KitError::BluetoothPoweredOff),
            KitState::BluetoothUnauthorized => Err(KitError::BluetoothUnauthorized),
            KitState::BluetoothUnsupported => Err(KitError::BluetoothUnsupported),
        }
    }
}

impl fmt::Display for KitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KitState::Unknown => write!(f, "UNKNOWN"),
            KitState::Ready => write!(f, "READY"),
            KitState::Scanning => write!(f, "SCANNING"),
            KitState::Connecting => write!(f, "CONNECTING"),
            KitState::Connected => write!(f, "CONNECTED"),
            KitState::BluetoothPoweredOff => write!(f, "POWERED_OFF"),
            KitState::BluetoothUnauthorized => write!(f, "UNAUTHORIZED"),
            KitState::BluetoothUnsupported => write!(f, "UNSUPPORTED"),
        }
    }
}

/// Connection state of one peripheral session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Disconnecting => write!(f, "DISCONNECTING"),
        }
    }
}
