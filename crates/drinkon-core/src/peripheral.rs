//! Connection lifecycle and published snapshots of one DrinkOn peripheral.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RequestError;
use crate::events::{KitEvent, KitObserver, LogLevel};
use crate::options::{CharacteristicReadStatus, ConnectionOptions};
use crate::protocol::{
    CharacteristicKind, InfoCharacteristic, LevelSensorCharacteristic, LogCharacteristic,
    LogDataPoint, SERVICE_UUID, StatusCharacteristic,
};
use crate::service::{ServiceEvent, ServiceSession};
use crate::state::ConnectionState;
use crate::transport::{BleTransport, CharacteristicHandle, PeripheralId, TransportError};

/// Resources a session needs while handling a request or callback.
pub struct SessionContext<'a, T: BleTransport, O: KitObserver> {
    pub transport: &'a T,
    pub observer: &'a O,
}

impl<'a, T: BleTransport, O: KitObserver> SessionContext<'a, T, O> {
    pub fn new(transport: &'a T, observer: &'a O) -> Self {
        Self {
            transport,
            observer,
        }
    }

    fn emit(&self, event: KitEvent) {
        self.observer.on_event(&event);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(KitEvent::Log {
            level,
            message: message.into(),
        });
    }
}

/// One peripheral the kit connects to.
///
/// Characteristic snapshots survive a disconnect; handles do not.
#[derive(Debug)]
pub struct PeripheralSession {
    id: PeripheralId,
    state: ConnectionState,
    options: ConnectionOptions,
    service: Option<ServiceSession>,
    status: Option<StatusCharacteristic>,
    info: Option<InfoCharacteristic>,
    level_sensor: Option<LevelSensorCharacteristic>,
    log: Option<LogCharacteristic>,
    /// Log points accepted during the current connection.
    log_points: Vec<LogDataPoint>,
    queued_disconnect: bool,
}

impl PeripheralSession {
    pub fn new(id: PeripheralId, options: ConnectionOptions) -> Self {
        Self {
            id,
            state: ConnectionState::Disconnected,
            options,
            service: None,
            status: None,
            info: None,
            level_sensor: None,
            log: None,
            log_points: Vec::new(),
            queued_disconnect: false,
        }
    }

    pub fn id(&self) -> PeripheralId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn options(&self) -> ConnectionOptions {
        self.options
    }

    /// Characteristics read or enabled during the current connection.
    pub fn read_status(&self) -> CharacteristicReadStatus {
        self.service
            .as_ref()
            .map(ServiceSession::read_status)
            .unwrap_or_default()
    }

    pub fn service(&self) -> Option<&ServiceSession> {
        self.service.as_ref()
    }

    pub fn status(&self) -> Option<&StatusCharacteristic> {
        self.status.as_ref()
    }

    pub fn info(&self) -> Option<&InfoCharacteristic> {
        self.info.as_ref()
    }

    pub fn level_sensor(&self) -> Option<&LevelSensorCharacteristic> {
        self.level_sensor.as_ref()
    }

    pub fn log(&self) -> Option<&LogCharacteristic> {
        self.log.as_ref()
    }

    pub fn is_disconnect_queued(&self) -> bool {
        self.queued_disconnect
    }

    fn set_state<T: BleTransport, O: KitObserver>(
        &mut self,
        ctx: &SessionContext<'_, T, O>,
        to: ConnectionState,
    ) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!(peripheral = %self.id, from = %from, to = %to, "Connection state");
        ctx.emit(KitEvent::ConnectionStateChanged {
            peripheral: self.id,
            from,
            to,
        });
    }

    /// Request a connection using `options` once connected.
    pub fn connect<T: BleTransport, O: KitObserver>(
        &mut self,
        ctx: &SessionContext<'_, T, O>,
        options: ConnectionOptions,
    ) -> Result<(), TransportError> {
        self.options = options;
        self.queued_disconnect = false;
        self.set_state(ctx, ConnectionState::Connecting);
        info!(peripheral = %self.id, options = ?options, "Connecting");
        if let Err(e) = ctx.transport.connect(self.id) {
            warn!(peripheral = %self.id, error = %e, "Connect request failed");
            self.set_state(ctx, ConnectionState::Disconnected);
            return Err(e);
        }
        Ok(())
    }

    /// Transport reported the link is up.
    ///
    /// Returns `false` if no connection was pending, in which case the
    /// callback is ignored.
    pub fn on_connected<T: BleTransport, O: KitObserver>(
        &mut self,
        ctx: &SessionContext<'_, T, O>,
    ) -> bool {
        if self.state != ConnectionState::Connecting {
            ctx.log(
                LogLevel::Warn,
                format!("Ignoring connect from {} while {}", self.id, self.state),
            );
            return false;
        }
        self.service = None;
        self.log_points.clear();
        self.queued_disconnect = false;
        self.set_state(ctx, ConnectionState::Connected);
        info!(peripheral = %self.id, "Connected");
        self.discover_service(ctx);
        true
    }

    pub fn on_connect_failed<T: BleTransport, O: KitObserver>(
        &mut self,
        ctx: &SessionContext<'_, T, O>,
        error: Option<&TransportError>,
    ) {
        if let Some(e) = error {
            warn!(peripheral = %self.id, error = %e, "Connection failed");
        }
        self.service = None;
        self.set_state(ctx, ConnectionState::Disconnected);
    }

    pub fn on_disconnected<T: BleTransport, O: KitObserver>(
        &mut self,
        ctx: &SessionContext<'_, T, O>,
        error: Option<&TransportError>,
    ) {
        match error {
            Some(e) => warn!(peripheral = %self.id, error = %e, "Disconnected"),
            None => info!(peripheral = %self.id, "Disconnected"),
        }
        self.service = None;
        self.queued_disconnect = false;
        self.set_state(ctx, ConnectionState::Disconnected);
    }

    fn discover_service<T: BleTransport, O: KitObserver>(&self, ctx: &SessionContext<'_, T, O>) {
        if let Err(e) = ctx.transport.discover_services(self.id, &[SERVICE_UUID]) {
            ctx.log(
                LogLevel::Warn,
                format!("Service discovery request failed: {}", e),
            );
        }
    }

    pub fn on_services_discovered<T: BleTransport, O: KitObserver>(
        &mut self,
        ctx: &SessionContext<'_, T, O>,
        result: Result<&[Uuid], &TransportError>,
    ) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let services = match result {
            Ok(services) => services,
            Err(e) => {
                ctx.log(LogLevel::Warn, format!("Service discovery failed: {}", e));
                return;
            }
        };
        if !services.contains(&SERVICE_UUID) {
            ctx.log(
                LogLevel::Warn,
                format!("{} does not offer the DrinkOn service", self.id),
            );
            return;
        }

        // Rediscovery after invalidation keeps this connection's read status.
        let service = self
            .service
            .get_or_insert_with(|| ServiceSession::new(self.id));
        if let Err(e) = service.begin_discovery(ctx.transport, self.options) {
            ctx.log(
                LogLevel::Warn,
                format!("Characteristic discovery request failed: {}", e),
            );
        }
    }

    /// The peripheral changed its GATT database.
    pub fn on_services_invalidated<T: BleTransport, O: KitObserver>(
        &mut self,
        ctx: &SessionContext<'_, T, O>,
        services: &[Uuid],
    ) {
        if self.state != ConnectionState::Connected || !services.contains(&SERVICE_UUID) {
            return;
        }
        info!(peripheral = %self.id, "DrinkOn service invalidated, rediscovering");
        if let Some(service) = self.service.as_mut() {
            service.invalidate();
        }
        self.discover_service(ctx);
    }

    pub fn on_characteristics_discovered<T: BleTransport, O: KitObserver>(
        &mut self,
        ctx: &SessionContext<'_, T, O>,
        service_uuid: Uuid,
        result: Result<&[CharacteristicHandle], &TransportError>,
    ) {
        if service_uuid != SERVICE_UUID || self.state != ConnectionState::Connected {
            return;
        }
        let handles = match result {
            Ok(handles) => handles,
            Err(e) => {
                ctx.log(
                    LogLevel::Warn,
                    format!("Characteristic discovery failed: {}", e),
                );
                return;
            }
        };
        let info_known = self.info.is_some();
        if let Some(service) = self.service.as_mut() {
            service.on_characteristics_discovered(ctx.transport, handles, self.options, info_known);
        }
    }

    pub fn on_value_updated<T: BleTransport, O: KitObserver>(
        &mut self,
        ctx: &SessionContext<'_, T, O>,
        handle: &CharacteristicHandle,
        result: Result<&[u8], &TransportError>,
    ) {
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                ctx.log(LogLevel::Warn, format!("Read failed: {}", e));
                return;
            }
        };
        let Some(service) = self.service.as_mut() else {
            return;
        };
        let event = match service.on_value_updated(handle, data) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                ctx.log(LogLevel::Warn, format!("Dropping payload: {}", e));
                return;
            }
        };

        match event {
            ServiceEvent::Status(value) => {
                self.status = Some(value.clone());
                ctx.emit(KitEvent::StatusUpdated {
                    peripheral: self.id,
                    value,
                });
            }
            ServiceEvent::Info(value) => {
                self.info = Some(value.clone());
                ctx.emit(KitEvent::InfoUpdated {
                    peripheral: self.id,
                    value,
                });
            }
            ServiceEvent::LevelSensor(value) => {
                self.level_sensor = Some(value.clone());
                ctx.emit(KitEvent::LevelSensorUpdated {
                    peripheral: self.id,
                    value,
                });
            }
            ServiceEvent::LogPage(page) => {
                if !self.accept_log_page(page) {
                    return;
                }
                if let Some(service) = self.service.as_mut() {
                    service.mark(CharacteristicReadStatus::LOG_UPDATED);
                }
                if let Some(log) = &self.log {
                    ctx.emit(KitEvent::LogUpdated {
                        peripheral: self.id,
                        value: log.clone(),
                    });
                }
            }
            ServiceEvent::LevelSensorNotify { .. } => {}
        }
        self.check_auto_disconnect(ctx);
    }

    /// Append a log page if it continues this connection's log.
    fn accept_log_page(&mut self, page: LogCharacteristic) -> bool {
        let expected = self.log_points.len() as u32;
        if page.first_hour_offset() != Some(expected) {
            debug!(
                peripheral = %self.id,
                offset = ?page.first_hour_offset(),
                expected,
                "Dropping out-of-sequence log page"
            );
            return false;
        }
        self.log_points.extend_from_slice(&page.points);
        self.log = Some(LogCharacteristic {
            points: self.log_points.clone(),
            captured_at: page.captured_at,
        });
        true
    }

    pub fn on_notify_state_changed<T: BleTransport, O: KitObserver>(
        &mut self,
        ctx: &SessionContext<'_, T, O>,
        handle: &CharacteristicHandle,
        result: Result<bool, &TransportError>,
    ) {
        match result {
            Ok(enabled) => {
                let event = self
                    .service
                    .as_mut()
                    .and_then(|service| service.on_notify_state_changed(handle, enabled));
                if let Some(ServiceEvent::LevelSensorNotify { enabled }) = event {
                    info!(peripheral = %self.id, enabled, "Level sensor notifications");
                    if enabled {
                        self.check_auto_disconnect(ctx);
                    }
                }
            }
            Err(e) => {
                if let Some(service) = self.service.as_mut() {
                    service.on_notify_failed(handle);
                }
                ctx.log(LogLevel::Warn, format!("Notify state change failed: {}", e));
            }
        }

        if !self.queued_disconnect {
            return;
        }
        // An enable that lands after the disconnect was queued is undone first.
        // A failed request is not retried.
        if result.is_ok() && self.queue_behind_notify(ctx) {
            debug!(peripheral = %self.id, "Disconnect still waiting on notify request");
            return;
        }
        self.queued_disconnect = false;
        self.request_disconnect(ctx);
    }

    pub fn on_write_completed<T: BleTransport, O: KitObserver>(
        &self,
        ctx: &SessionContext<'_, T, O>,
        handle: &CharacteristicHandle,
        result: Result<(), &TransportError>,
    ) {
        match result {
            Ok(()) => debug!(peripheral = %self.id, uuid = %handle.uuid, "Write completed"),
            Err(e) => ctx.log(LogLevel::Warn, format!("Write failed: {}", e)),
        }
    }

    /// Whether every characteristic selected by the options has been
    /// read this connection. Notifications count once the peripheral has
    /// confirmed them and sent a value.
    pub fn reads_complete(&self) -> bool {
        let status = self.read_status();
        let required = [
            (ConnectionOptions::READ_STATUS, CharacteristicReadStatus::STATUS_UPDATED),
            (
                ConnectionOptions::READ_LEVEL_SENSOR,
                CharacteristicReadStatus::LEVEL_SENSOR_UPDATED,
            ),
            (
                ConnectionOptions::NOTIFY_LEVEL_SENSOR,
                CharacteristicReadStatus::LEVEL_SENSOR_UPDATED,
            ),
            (
                ConnectionOptions::NOTIFY_LEVEL_SENSOR,
                CharacteristicReadStatus::LEVEL_SENSOR_NOTIFY_ENABLED,
            ),
            (ConnectionOptions::READ_LOG, CharacteristicReadStatus::LOG_UPDATED),
        ];
        let flags_ok = required
            .iter()
            .all(|(option, flag)| !self.options.contains(*option) || status.contains(*flag));
        let info_ok = !self.options.contains(ConnectionOptions::READ_INFO) || self.info.is_some();
        flags_ok && info_ok
    }

    fn check_auto_disconnect<T: BleTransport, O: KitObserver>(
        &mut self,
        ctx: &SessionContext<'_, T, O>,
    ) {
        if self.state != ConnectionState::Connected
            || self.options.contains(ConnectionOptions::DISABLE_AUTO_DISCONNECT)
            || !self.reads_complete()
        {
            return;
        }
        info!(peripheral = %self.id, "All requested characteristics read, disconnecting");
        self.disconnect(ctx);
    }

    /// Disconnect, disabling level sensor notifications first if enabled.
    ///
    /// A pending connection attempt is cancelled instead.
    pub fn disconnect<T: BleTransport, O: KitObserver>(&mut self, ctx: &SessionContext<'_, T, O>) {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Disconnecting => {}
            ConnectionState::Connecting => self.cancel_connect(ctx),
            ConnectionState::Connected => {
                self.set_state(ctx, ConnectionState::Disconnecting);
                if self.queue_behind_notify(ctx) {
                    debug!(peripheral = %self.id, "Disconnect queued behind notify request");
                    self.queued_disconnect = true;
                    return;
                }
                self.request_disconnect(ctx);
            }
        }
    }

    /// Whether a notify request must complete before the link can drop.
    ///
    /// Starts the notify disable when notifications are on.
    fn queue_behind_notify<T: BleTransport, O: KitObserver>(
        &mut self,
        ctx: &SessionContext<'_, T, O>,
    ) -> bool {
        let Some(service) = self.service.as_mut() else {
            return false;
        };
        if service.is_notify_pending() {
            return true;
        }
        if !service.is_notifying() {
            return false;
        }
        match service.set_level_sensor_notify(ctx.transport, false) {
            Ok(queued) => queued,
            Err(e) => {
                warn!(peripheral = %self.id, error = %e, "Notify disable failed");
                false
            }
        }
    }

    fn request_disconnect<T: BleTransport, O: KitObserver>(&self, ctx: &SessionContext<'_, T, O>) {
        if let Err(e) = ctx.transport.disconnect(self.id) {
            ctx.log(LogLevel::Warn, format!("Disconnect request failed: {}", e));
        }
    }

    /// Abandon a pending connection attempt.
    pub fn cancel_connect<T: BleTransport, O: KitObserver>(
        &mut self,
        ctx: &SessionContext<'_, T, O>,
    ) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        info!(peripheral = %self.id, "Cancelling connection attempt");
        self.request_disconnect(ctx);
        self.set_state(ctx, ConnectionState::Disconnected);
    }

    /// Drop the link state without talking to the transport, e.g. when the
    /// radio has gone away.
    pub fn reset<T: BleTransport, O: KitObserver>(&mut self, ctx: &SessionContext<'_, T, O>) {
        self.service = None;
        self.queued_disconnect = false;
        self.set_state(ctx, ConnectionState::Disconnected);
    }

    /// Re-read a characteristic.
    pub fn refresh<T: BleTransport>(
        &self,
        transport: &T,
        kind: CharacteristicKind,
    ) -> Result<(), RequestError> {
        self.connected_service()?.refresh(transport, kind)
    }

    /// Encode `status` and write it to the peripheral.
    pub fn write_status<T: BleTransport>(
        &self,
        transport: &T,
        status: &StatusCharacteristic,
    ) -> Result<(), RequestError> {
        let service = self.connected_service()?;
        let data = status.to_bytes()?;
        service.write(transport, CharacteristicKind::Status, &data)
    }

    /// Start or stop level sensor notifications while connected.
    pub fn set_level_sensor_notify<T: BleTransport>(
        &mut self,
        transport: &T,
        enable: bool,
    ) -> Result<(), RequestError> {
        if !self.state.is_connected() {
            return Err(RequestError::NotConnected);
        }
        self.service
            .as_mut()
            .ok_or(RequestError::NotConnected)?
            .set_level_sensor_notify(transport, enable)
            .map(|_| ())
    }

    fn connected_service(&self) -> Result<&ServiceSession, RequestError> {
        if !self.state.is_connected() {
            return Err(RequestError::NotConnected);
        }
        self.service.as_ref().ok_or(RequestError::NotConnected)
    }
}
