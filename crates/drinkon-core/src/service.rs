//! Characteristic sequencing for the DrinkOn service of one connection.

use std::collections::HashMap;

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{CodecError, RequestError};
use crate::options::{CharacteristicReadStatus, ConnectionOptions};
use crate::protocol::{
    CharacteristicKind, InfoCharacteristic, LevelSensorCharacteristic, LogCharacteristic,
    SERVICE_UUID, StatusCharacteristic,
};
use crate::transport::{BleTransport, CharacteristicHandle, PeripheralId, TransportError};

/// A decoded value or state change reported by the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    Status(StatusCharacteristic),
    Info(InfoCharacteristic),
    LevelSensor(LevelSensorCharacteristic),
    /// One log page; the peripheral decides whether it continues its log.
    LogPage(LogCharacteristic),
    LevelSensorNotify { enabled: bool },
}

/// Handles and read status for the DrinkOn service of a connected peripheral.
///
/// Lives for one connection. Handles are only valid while connected.
#[derive(Debug)]
pub struct ServiceSession {
    peripheral: PeripheralId,
    handles: HashMap<CharacteristicKind, CharacteristicHandle>,
    read_status: CharacteristicReadStatus,
    /// Notify state requested but not yet confirmed by the peripheral.
    notify_pending: Option<bool>,
}

impl ServiceSession {
    pub fn new(peripheral: PeripheralId) -> Self {
        Self {
            peripheral,
            handles: HashMap::new(),
            read_status: CharacteristicReadStatus::empty(),
            notify_pending: None,
        }
    }

    pub fn read_status(&self) -> CharacteristicReadStatus {
        self.read_status
    }

    pub(crate) fn mark(&mut self, flag: CharacteristicReadStatus) {
        self.read_status.insert(flag);
    }

    pub fn handle(&self, kind: CharacteristicKind) -> Option<&CharacteristicHandle> {
        self.handles.get(&kind)
    }

    pub fn is_notifying(&self) -> bool {
        self.read_status
            .contains(CharacteristicReadStatus::LEVEL_SENSOR_NOTIFY_ENABLED)
    }

    /// Whether a notify request is still waiting for its completion.
    pub fn is_notify_pending(&self) -> bool {
        self.notify_pending.is_some()
    }

    /// Characteristic kinds implied by `options`.
    pub fn selected_kinds(options: ConnectionOptions) -> Vec<CharacteristicKind> {
        CharacteristicKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                CharacteristicKind::Status => options.contains(ConnectionOptions::READ_STATUS),
                CharacteristicKind::Info => options.contains(ConnectionOptions::READ_INFO),
                CharacteristicKind::LevelSensor => options.wants_level_sensor(),
                CharacteristicKind::Log => options.contains(ConnectionOptions::READ_LOG),
            })
            .collect()
    }

    /// Request discovery of the characteristics `options` selects.
    ///
    /// Returns `Ok(false)` without a request when nothing is selected.
    pub fn begin_discovery<T: BleTransport>(
        &self,
        transport: &T,
        options: ConnectionOptions,
    ) -> Result<bool, TransportError> {
        let uuids: Vec<Uuid> = Self::selected_kinds(options)
            .into_iter()
            .map(|kind| kind.uuid())
            .collect();
        if uuids.is_empty() {
            debug!(peripheral = %self.peripheral, "No characteristics selected");
            return Ok(false);
        }
        debug!(peripheral = %self.peripheral, count = uuids.len(), "Discovering characteristics");
        transport.discover_characteristics(self.peripheral, SERVICE_UUID, &uuids)?;
        Ok(true)
    }

    /// Record discovered handles and issue the reads and notify requests
    /// selected by `options`.
    ///
    /// A request that fails to issue is logged and does not stop the others.
    pub fn on_characteristics_discovered<T: BleTransport>(
        &mut self,
        transport: &T,
        handles: &[CharacteristicHandle],
        options: ConnectionOptions,
        info_known: bool,
    ) {
        for handle in handles {
            let Some(kind) = CharacteristicKind::from_uuid(&handle.uuid) else {
                trace!(uuid = %handle.uuid, "Ignoring unknown characteristic");
                continue;
            };
            self.handles.insert(kind, *handle);

            let read = match kind {
                CharacteristicKind::Status => options.contains(ConnectionOptions::READ_STATUS),
                CharacteristicKind::Info => {
                    options.contains(ConnectionOptions::READ_INFO) && !info_known
                }
                CharacteristicKind::LevelSensor => {
                    options.contains(ConnectionOptions::READ_LEVEL_SENSOR)
                }
                CharacteristicKind::Log => options.contains(ConnectionOptions::READ_LOG),
            };
            if read {
                debug!(peripheral = %self.peripheral, characteristic = %kind, "Reading");
                if let Err(e) = transport.read_value(handle) {
                    warn!(characteristic = %kind, error = %e, "Read request failed");
                }
            }

            if kind == CharacteristicKind::LevelSensor
                && options.contains(ConnectionOptions::NOTIFY_LEVEL_SENSOR)
                && let Err(e) = self.set_level_sensor_notify(transport, true)
            {
                warn!(error = %e, "Notify request failed");
            }
        }
    }

    /// Decode a value read from, or notified by, the peripheral.
    ///
    /// Status and level sensor reads set their read status bit here. The
    /// log bit is set by the owner once it accepts the page. `Ok(None)`
    /// means the handle is not a DrinkOn characteristic.
    pub fn on_value_updated(
        &mut self,
        handle: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<Option<ServiceEvent>, CodecError> {
        let Some(kind) = CharacteristicKind::from_uuid(&handle.uuid) else {
            return Ok(None);
        };
        trace!(characteristic = %kind, len = data.len(), "Value updated");

        let event = match kind {
            CharacteristicKind::Status => {
                let value = StatusCharacteristic::from_bytes(data)?;
                self.mark(CharacteristicReadStatus::STATUS_UPDATED);
                ServiceEvent::Status(value)
            }
            CharacteristicKind::Info => ServiceEvent::Info(InfoCharacteristic::from_bytes(data)?),
            CharacteristicKind::LevelSensor => {
                let value = LevelSensorCharacteristic::from_bytes(data)?;
                self.mark(CharacteristicReadStatus::LEVEL_SENSOR_UPDATED);
                ServiceEvent::LevelSensor(value)
            }
            CharacteristicKind::Log => ServiceEvent::LogPage(LogCharacteristic::from_bytes(data)?),
        };
        Ok(Some(event))
    }

    /// Track the level sensor notification state reported by the peripheral.
    pub fn on_notify_state_changed(
        &mut self,
        handle: &CharacteristicHandle,
        enabled: bool,
    ) -> Option<ServiceEvent> {
        if CharacteristicKind::from_uuid(&handle.uuid) != Some(CharacteristicKind::LevelSensor) {
            return None;
        }
        self.notify_pending = None;
        self.read_status
            .set(CharacteristicReadStatus::LEVEL_SENSOR_NOTIFY_ENABLED, enabled);
        Some(ServiceEvent::LevelSensorNotify { enabled })
    }

    /// A notify request failed; the notify state is unchanged.
    pub fn on_notify_failed(&mut self, handle: &CharacteristicHandle) {
        if CharacteristicKind::from_uuid(&handle.uuid) == Some(CharacteristicKind::LevelSensor) {
            self.notify_pending = None;
        }
    }

    /// Ask the peripheral to start or stop level sensor notifications.
    ///
    /// Returns `Ok(false)` when already in, or already heading to, the
    /// requested state.
    pub fn set_level_sensor_notify<T: BleTransport>(
        &mut self,
        transport: &T,
        enable: bool,
    ) -> Result<bool, RequestError> {
        if self.notify_pending.unwrap_or(self.is_notifying()) == enable {
            return Ok(false);
        }
        let handle = self.require(CharacteristicKind::LevelSensor)?;
        debug!(peripheral = %self.peripheral, enable, "Setting level sensor notify");
        transport.set_notify(handle, enable)?;
        self.notify_pending = Some(enable);
        Ok(true)
    }

    /// Re-issue a read for `kind`.
    pub fn refresh<T: BleTransport>(
        &self,
        transport: &T,
        kind: CharacteristicKind,
    ) -> Result<(), RequestError> {
        let handle = self.require(kind)?;
        debug!(peripheral = %self.peripheral, characteristic = %kind, "Refreshing");
        transport.read_value(handle)?;
        Ok(())
    }

    pub fn write<T: BleTransport>(
        &self,
        transport: &T,
        kind: CharacteristicKind,
        data: &[u8],
    ) -> Result<(), RequestError> {
        let handle = self.require(kind)?;
        debug!(peripheral = %self.peripheral, characteristic = %kind, len = data.len(), "Writing");
        transport.write_value(handle, data)?;
        Ok(())
    }

    /// Forget handles after the peripheral changed its GATT database.
    ///
    /// Read status survives, except the notify flag: the subscription went
    /// with the old handles.
    pub fn invalidate(&mut self) {
        self.handles.clear();
        self.notify_pending = None;
        self.read_status
            .remove(CharacteristicReadStatus::LEVEL_SENSOR_NOTIFY_ENABLED);
    }

    fn require(&self, kind: CharacteristicKind) -> Result<&CharacteristicHandle, RequestError> {
        self.handles.get(&kind).ok_or(RequestError::Undiscovered(kind))
    }
}
