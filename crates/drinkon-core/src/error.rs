//! Library error types.
//!
//! `KitError` is the surfaced, sticky error published by the kit.
//! `CodecError` stays local to characteristic decoding and is only logged.
//! `RequestError` is returned by explicit per-peripheral requests.

use thiserror::Error;

use crate::protocol::CharacteristicKind;
use crate::transport::TransportError;

/// Errors surfaced to kit consumers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KitError {
    #[error("BLE is not supported by the device.")]
    BluetoothUnsupported,

    #[error("Bluetooth is powered off on the device.")]
    BluetoothPoweredOff,

    #[error("Bluetooth is not authorized on the device.")]
    BluetoothUnauthorized,

    #[error("Already scanning for DrinkOn peripherals.")]
    BusyScanning,

    #[error("Already attempting to connect to a DrinkOn peripheral, new connection not attempted.")]
    BusyConnecting,

    #[error("Already connected to a DrinkOn peripheral, new connection not attempted.")]
    BusyConnected,

    #[error("No DrinkOn peripherals were found before scanning timed out.")]
    NoPeripheralsFound,

    #[error("Connection failed.")]
    ConnectionFailed,

    #[error("Internal error.")]
    InternalError,
}

impl KitError {
    /// Human-readable description of the error.
    pub fn description(&self) -> String {
        self.to_string()
    }

    /// Errors raised by the single-operation gate.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            KitError::BusyScanning | KitError::BusyConnecting | KitError::BusyConnected
        )
    }
}

/// Characteristic payload decode/encode failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed {kind} payload: expected {expected} bytes, got {actual}")]
    MalformedPayload {
        kind: CharacteristicKind,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed {kind} payload: invalid {field}")]
    InvalidField {
        kind: CharacteristicKind,
        field: &'static str,
    },

    #[error("{kind} {field} is out of the encodable range")]
    OutOfRange {
        kind: CharacteristicKind,
        field: &'static str,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        CodecError::Io(e.to_string())
    }
}

/// Failures of refresh, write and notify requests on a peripheral session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Peripheral is not connected")]
    NotConnected,

    #[error("{0} characteristic has not been discovered")]
    Undiscovered(CharacteristicKind),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_classification() {
        assert!(KitError::BusyScanning.is_busy());
        assert!(KitError::BusyConnected.is_busy());
        assert!(!KitError::ConnectionFailed.is_busy());
        assert!(!KitError::BluetoothPoweredOff.is_busy());
    }

    #[test]
    fn test_description_matches_display() {
        let err = KitError::ConnectionFailed;
        assert_eq!(err.description(), "Connection failed.");
        assert_eq!(err.description(), err.to_string());
    }

    #[test]
    fn test_codec_error_message() {
        let err = CodecError::MalformedPayload {
            kind: CharacteristicKind::Status,
            expected: 10,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "Malformed Status payload: expected 10 bytes, got 4"
        );
    }

    #[test]
    fn test_request_error_wraps_transport() {
        let err: RequestError = TransportError::PoweredOff.into();
        assert_eq!(err.to_string(), "Bluetooth is powered off");
        assert_eq!(
            RequestError::Undiscovered(CharacteristicKind::LevelSensor).to_string(),
            "Level Sensor characteristic has not been discovered"
        );
    }
}
