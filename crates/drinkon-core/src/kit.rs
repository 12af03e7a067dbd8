//! DrinkOn kit - top-level coordinator for scanning and connecting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{KitError, RequestError};
use crate::events::{KitEvent, KitObserver, LogLevel, TracingObserver};
use crate::options::ConnectionOptions;
use crate::peripheral::{PeripheralSession, SessionContext};
use crate::protocol::{
    Advertisement, CharacteristicKind, SERVICE_UUID, StatusCharacteristic,
    parse_manufacturer_data,
};
use crate::registry::ScannedPeripheralRegistry;
use crate::state::{ConnectionState, KitState};
use crate::transport::{BleTransport, PeripheralId, TransportError, TransportEvent};

/// Configuration for a kit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KitConfig {
    /// How long a connection attempt may take.
    pub connection_timeout_ms: u64,
    /// Stop scanning after this long. `None` scans until stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_timeout_ms: Option<u64>,
    /// Report every advertisement, not just the first per peripheral.
    pub allow_duplicates: bool,
    /// Options used by `DrinkOnKit::connect`.
    pub default_options: ConnectionOptions,
}

impl Default for KitConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: crate::protocol::DEFAULT_CONNECTION_TIMEOUT_MS,
            scan_timeout_ms: None,
            allow_duplicates: true,
            default_options: ConnectionOptions::READ_ALL,
        }
    }
}

impl KitConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KitConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Option<Duration> {
        self.scan_timeout_ms.map(Duration::from_millis)
    }
}

/// What the radio last told us about itself.
#[derive(Debug, Clone, Copy)]
struct RadioStatus {
    powered_on: Option<bool>,
    authorized: bool,
    unsupported: bool,
}

impl RadioStatus {
    fn state(&self) -> KitState {
        if self.unsupported {
            return KitState::BluetoothUnsupported;
        }
        if !self.authorized {
            return KitState::BluetoothUnauthorized;
        }
        match self.powered_on {
            Some(true) => KitState::Ready,
            Some(false) => KitState::BluetoothPoweredOff,
            None => KitState::Unknown,
        }
    }
}

/// Single owner of the BLE session: one scan or one connection at a time.
///
/// The host feeds transport callbacks to `handle_event` and calls `tick`
/// periodically so timeouts can fire. Consumers observe state through the
/// `KitObserver` and read-only accessors.
pub struct DrinkOnKit<T: BleTransport, O: KitObserver> {
    config: KitConfig,
    transport: T,
    observer: Arc<O>,
    state: KitState,
    error: Option<KitError>,
    radio: RadioStatus,
    registry: ScannedPeripheralRegistry,
    peripheral: Option<PeripheralSession>,
    connect_deadline: Option<Instant>,
    scan_deadline: Option<Instant>,
}

impl<T: BleTransport> DrinkOnKit<T, TracingObserver> {
    /// Create a kit with the default tracing observer.
    pub fn new(transport: T, config: KitConfig) -> Self {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }
}

impl<T: BleTransport, O: KitObserver> DrinkOnKit<T, O> {
    /// Create a kit with a custom observer.
    pub fn with_observer(transport: T, config: KitConfig, observer: Arc<O>) -> Self {
        Self {
            config,
            transport,
            observer,
            state: KitState::Unknown,
            error: None,
            radio: RadioStatus {
                powered_on: None,
                authorized: true,
                unsupported: false,
            },
            registry: ScannedPeripheralRegistry::new(),
            peripheral: None,
            connect_deadline: None,
            scan_deadline: None,
        }
    }

    pub fn state(&self) -> KitState {
        self.state
    }

    /// Last error raised; overwritten by the next one.
    pub fn error(&self) -> Option<KitError> {
        self.error
    }

    pub fn registry(&self) -> &ScannedPeripheralRegistry {
        &self.registry
    }

    /// The current or most recent peripheral session.
    pub fn peripheral(&self) -> Option<&PeripheralSession> {
        self.peripheral.as_ref()
    }

    pub fn config(&self) -> &KitConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn observer(&self) -> &Arc<O> {
        &self.observer
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

    fn set_state(&mut self, to: KitState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(from = %from, to = %to, "{}", to.description());
        self.emit(KitEvent::StateChanged { from, to });
    }

    fn set_error(&mut self, error: Option<KitError>) {
        if self.error == error {
            return;
        }
        self.error = error;
        self.emit(KitEvent::ErrorChanged { error });
    }

    /// Refuse an operation unless the kit is ready.
    fn gate(&mut self) -> Result<(), KitError> {
        if let Err(e) = self.state.access_check() {
            debug!(state = %self.state, error = ?e, "Operation refused");
            self.set_error(Some(e));
            return Err(e);
        }
        Ok(())
    }

    /// Start scanning for DrinkOn peripherals.
    #[instrument(skip(self))]
    pub fn scan(&mut self, clear_previous: bool) -> Result<(), KitError> {
        self.gate()?;
        if clear_previous {
            self.registry.clear();
        }
        if let Err(e) = self
            .transport
            .start_scan(&[SERVICE_UUID], self.config.allow_duplicates)
        {
            let error = transport_failure(&e);
            warn!(error = %e, "Scan request failed");
            self.set_error(Some(error));
            return Err(error);
        }
        self.scan_deadline = self.config.scan_timeout().map(|t| Instant::now() + t);
        self.set_state(KitState::Scanning);
        Ok(())
    }

    /// Stop scanning. Does nothing unless scanning.
    #[instrument(skip(self))]
    pub fn stop_scan(&mut self) {
        if self.state != KitState::Scanning {
            return;
        }
        if let Err(e) = self.transport.stop_scan() {
            warn!(error = %e, "Stop scan request failed");
        }
        self.scan_deadline = None;
        self.set_state(KitState::Ready);
        if self.error.is_some_and(|e| e.is_busy()) {
            self.set_error(None);
        }
    }

    /// Connect using the configured default options.
    pub fn connect(&mut self, peripheral: PeripheralId) -> Result<(), KitError> {
        let options = self.config.default_options;
        self.connect_with_options(peripheral, options)
    }

    /// Connect to the peripheral with the strongest advertised signal.
    pub fn connect_strongest(&mut self, options: ConnectionOptions) -> Result<(), KitError> {
        let Some(id) = self.registry.strongest_signal().map(|p| p.id()) else {
            self.set_error(Some(KitError::NoPeripheralsFound));
            return Err(KitError::NoPeripheralsFound);
        };
        self.connect_with_options(id, options)
    }

    #[instrument(skip(self))]
    pub fn connect_with_options(
        &mut self,
        peripheral: PeripheralId,
        options: ConnectionOptions,
    ) -> Result<(), KitError> {
        self.gate()?;

        // Snapshots persist when reconnecting to the same peripheral.
        let session = match self.peripheral.take() {
            Some(session) if session.id() == peripheral => session,
            _ => PeripheralSession::new(peripheral, options),
        };
        self.set_state(KitState::Connecting);
        let session = self.peripheral.insert(session);
        let ctx = SessionContext::new(&self.transport, self.observer.as_ref());
        if session.connect(&ctx, options).is_err() {
            self.set_state(KitState::Ready);
            self.set_error(Some(KitError::ConnectionFailed));
            return Err(KitError::ConnectionFailed);
        }
        self.connect_deadline = Some(Instant::now() + self.config.connection_timeout());
        Ok(())
    }

    /// Disconnect from, or stop connecting to, the current peripheral.
    #[instrument(skip(self))]
    pub fn disconnect(&mut self) {
        let Some(session) = self.peripheral.as_mut() else {
            return;
        };
        let ctx = SessionContext::new(&self.transport, self.observer.as_ref());
        let was_connecting = session.state() == ConnectionState::Connecting;
        session.disconnect(&ctx);
        if was_connecting {
            let id = session.id();
            self.connect_deadline = None;
            self.mark_connected(id, false);
            self.set_state(KitState::Ready);
        }
    }

    /// Re-read a characteristic of the connected peripheral.
    pub fn refresh(&self, kind: CharacteristicKind) -> Result<(), RequestError> {
        let session = self.peripheral.as_ref().ok_or(RequestError::NotConnected)?;
        session.refresh(&self.transport, kind)
    }

    /// Write a status value to the connected peripheral.
    pub fn write_status(&self, status: &StatusCharacteristic) -> Result<(), RequestError> {
        let session = self.peripheral.as_ref().ok_or(RequestError::NotConnected)?;
        session.write_status(&self.transport, status)
    }

    /// Start or stop level sensor notifications on the connected peripheral.
    pub fn set_level_sensor_notify(&mut self, enable: bool) -> Result<(), RequestError> {
        let session = self.peripheral.as_mut().ok_or(RequestError::NotConnected)?;
        session.set_level_sensor_notify(&self.transport, enable)
    }

    /// Fire any timeouts due at `now`.
    pub fn tick(&mut self, now: Instant) {
        if let Some(deadline) = self.connect_deadline
            && now >= deadline
        {
            self.connect_deadline = None;
            self.on_connect_timeout();
        }
        if let Some(deadline) = self.scan_deadline
            && now >= deadline
        {
            self.scan_deadline = None;
            self.on_scan_timeout();
        }
    }

    fn on_connect_timeout(&mut self) {
        if self.state != KitState::Connecting {
            return;
        }
        warn!(timeout_ms = self.config.connection_timeout_ms, "Connection timed out");
        if let Some(session) = self.peripheral.as_mut() {
            let ctx = SessionContext::new(&self.transport, self.observer.as_ref());
            session.cancel_connect(&ctx);
        }
        self.set_state(KitState::Ready);
        self.set_error(Some(KitError::ConnectionFailed));
    }

    fn on_scan_timeout(&mut self) {
        if self.state != KitState::Scanning {
            return;
        }
        info!(found = self.registry.len(), "Scan timed out");
        if let Err(e) = self.transport.stop_scan() {
            warn!(error = %e, "Stop scan request failed");
        }
        self.set_state(KitState::Ready);
        if self.registry.is_empty() {
            self.set_error(Some(KitError::NoPeripheralsFound));
        }
    }

    /// Feed one transport callback into the kit.
    pub fn handle_event(&mut self, event: TransportEvent) {
        trace!(peripheral = ?event.peripheral(), event = ?event, "Transport event");
        match event {
            TransportEvent::PowerChanged { powered_on } => {
                self.radio.powered_on = Some(powered_on);
                self.on_radio_changed();
            }
            TransportEvent::AuthorizationChanged { authorized } => {
                self.radio.authorized = authorized;
                self.on_radio_changed();
            }
            TransportEvent::SupportChanged { supported } => {
                // Once unsupported, always unsupported.
                if !supported {
                    self.radio.unsupported = true;
                }
                self.on_radio_changed();
            }
            TransportEvent::Advertisement {
                peripheral,
                name,
                rssi,
                manufacturer_data,
            } => self.on_advertisement(peripheral, name, rssi, manufacturer_data.as_deref()),
            TransportEvent::Connected { peripheral } => self.on_connected(peripheral),
            TransportEvent::ConnectFailed { peripheral, error } => {
                self.on_connect_failed(peripheral, error.as_ref())
            }
            TransportEvent::Disconnected { peripheral, error } => {
                self.on_disconnected(peripheral, error.as_ref())
            }
            TransportEvent::ServicesDiscovered { peripheral, result } => {
                self.with_session(peripheral, |session, ctx| {
                    session.on_services_discovered(ctx, result.as_deref())
                });
            }
            TransportEvent::ServicesInvalidated {
                peripheral,
                services,
            } => {
                self.with_session(peripheral, |session, ctx| {
                    session.on_services_invalidated(ctx, &services)
                });
            }
            TransportEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => {
                self.with_session(peripheral, |session, ctx| {
                    session.on_characteristics_discovered(ctx, service, result.as_deref())
                });
            }
            TransportEvent::ValueUpdated { handle, result } => {
                self.with_session(handle.peripheral, |session, ctx| {
                    session.on_value_updated(ctx, &handle, result.as_deref())
                });
            }
            TransportEvent::WriteCompleted { handle, result } => {
                self.with_session(handle.peripheral, |session, ctx| {
                    session.on_write_completed(ctx, &handle, result.as_ref().copied())
                });
            }
            TransportEvent::NotifyStateChanged { handle, result } => {
                self.with_session(handle.peripheral, |session, ctx| {
                    session.on_notify_state_changed(ctx, &handle, result.as_ref().copied())
                });
            }
        }
    }

    /// Run `f` against the session for `peripheral`, if it is the current one.
    fn with_session<F>(&mut self, peripheral: PeripheralId, f: F)
    where
        F: FnOnce(&mut PeripheralSession, &SessionContext<'_, T, O>),
    {
        match self.peripheral.as_mut() {
            Some(session) if session.id() == peripheral => {
                let ctx = SessionContext::new(&self.transport, self.observer.as_ref());
                f(session, &ctx);
            }
            _ => trace!(peripheral = %peripheral, "Event for inactive peripheral"),
        }
    }

    fn on_radio_changed(&mut self) {
        let target = self.radio.state();
        match target {
            KitState::Ready => {
                if matches!(
                    self.state,
                    KitState::Ready
                        | KitState::Scanning
                        | KitState::Connecting
                        | KitState::Connected
                ) {
                    return;
                }
                self.set_state(KitState::Ready);
                if matches!(
                    self.error,
                    Some(KitError::BluetoothPoweredOff | KitError::BluetoothUnauthorized)
                ) {
                    self.set_error(None);
                }
            }
            KitState::Unknown => self.set_state(KitState::Unknown),
            _ => {
                self.abandon_activity();
                self.set_state(target);
                self.set_error(target.access_check().err());
            }
        }
    }

    /// Drop scan and connection state after the radio became unavailable.
    fn abandon_activity(&mut self) {
        self.scan_deadline = None;
        self.connect_deadline = None;
        if let Some(session) = self.peripheral.as_mut()
            && session.state() != ConnectionState::Disconnected
        {
            let ctx = SessionContext::new(&self.transport, self.observer.as_ref());
            session.reset(&ctx);
            let id = session.id();
            self.mark_connected(id, false);
        }
    }

    fn on_advertisement(
        &mut self,
        peripheral: PeripheralId,
        name: Option<String>,
        rssi: Option<i16>,
        manufacturer_data: Option<&[u8]>,
    ) {
        if self.state != KitState::Scanning {
            trace!(peripheral = %peripheral, "Advertisement while not scanning");
            return;
        }
        let known = self.registry.contains(peripheral);
        let entry = self.registry.upsert(peripheral, rssi);
        if let Some(name) = name {
            entry.set_name(name);
        }
        if let Some(Advertisement::Level(level)) =
            manufacturer_data.and_then(parse_manufacturer_data)
        {
            entry.apply_advertisement(&level);
        }
        let snapshot = entry.clone();
        if known {
            self.emit(KitEvent::PeripheralUpdated(snapshot));
        } else {
            self.emit(KitEvent::PeripheralDiscovered(snapshot));
        }
    }

    fn on_connected(&mut self, peripheral: PeripheralId) {
        let Some(session) = self.peripheral.as_mut().filter(|s| s.id() == peripheral) else {
            self.log(
                LogLevel::Warn,
                format!("Unexpected connection from {}", peripheral),
            );
            return;
        };
        let ctx = SessionContext::new(&self.transport, self.observer.as_ref());
        if !session.on_connected(&ctx) {
            return;
        }
        self.connect_deadline = None;
        self.mark_connected(peripheral, true);
        self.set_state(KitState::Connected);
    }

    fn on_connect_failed(&mut self, peripheral: PeripheralId, error: Option<&TransportError>) {
        let handled = match self.peripheral.as_mut() {
            Some(session)
                if session.id() == peripheral
                    && session.state() == ConnectionState::Connecting =>
            {
                let ctx = SessionContext::new(&self.transport, self.observer.as_ref());
                session.on_connect_failed(&ctx, error);
                true
            }
            _ => false,
        };
        if !handled {
            return;
        }
        self.connect_deadline = None;
        if self.state == KitState::Connecting {
            self.set_state(KitState::Ready);
        }
        self.set_error(Some(KitError::ConnectionFailed));
    }

    fn on_disconnected(&mut self, peripheral: PeripheralId, error: Option<&TransportError>) {
        let was_connecting = match self.peripheral.as_mut() {
            Some(session) if session.id() == peripheral => {
                let was_connecting = session.state() == ConnectionState::Connecting;
                let ctx = SessionContext::new(&self.transport, self.observer.as_ref());
                session.on_disconnected(&ctx, error);
                was_connecting
            }
            _ => return,
        };
        self.mark_connected(peripheral, false);
        if matches!(self.state, KitState::Connecting | KitState::Connected) {
            self.connect_deadline = None;
            self.set_state(KitState::Ready);
        }
        if was_connecting {
            self.set_error(Some(KitError::ConnectionFailed));
        }
    }

    fn mark_connected(&mut self, peripheral: PeripheralId, connected: bool) {
        let Some(entry) = self.registry.get_mut(peripheral) else {
            return;
        };
        if entry.is_connected() == connected {
            return;
        }
        entry.set_connected(connected);
        let snapshot = entry.clone();
        self.emit(KitEvent::PeripheralUpdated(snapshot));
    }
}

/// Map a request the transport refused outright onto the surfaced taxonomy.
fn transport_failure(error: &TransportError) -> KitError {
    match error {
        TransportError::PoweredOff => KitError::BluetoothPoweredOff,
        _ => KitError::InternalError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::QueuedObserver;
    use crate::transport::{MockTransport, SimulatedDevice, TransportRequest};
    use uuid::Uuid;

    type TestKit = DrinkOnKit<MockTransport, QueuedObserver>;

    fn kit_with(config: KitConfig) -> (TestKit, MockTransport, SimulatedDevice) {
        let mock = MockTransport::new();
        let mut kit =
            DrinkOnKit::with_observer(mock.clone(), config, Arc::new(QueuedObserver::new()));
        kit.handle_event(TransportEvent::PowerChanged { powered_on: true });
        let device = SimulatedDevice::new(PeripheralId(Uuid::from_u128(0xB0)));
        (kit, mock, device)
    }

    fn kit() -> (TestKit, MockTransport, SimulatedDevice) {
        kit_with(KitConfig::default())
    }

    /// Answer pending requests until the transport goes quiet.
    fn pump(kit: &mut TestKit, mock: &MockTransport, device: &mut SimulatedDevice) {
        loop {
            let requests = mock.take_requests();
            if requests.is_empty() {
                break;
            }
            for request in &requests {
                for event in device.answer(request) {
                    kit.handle_event(event);
                }
            }
        }
    }

    #[test]
    fn test_power_on_makes_ready() {
        let mock = MockTransport::new();
        let mut kit = DrinkOnKit::with_observer(
            mock,
            KitConfig::default(),
            Arc::new(QueuedObserver::new()),
        );
        assert_eq!(kit.state(), KitState::Unknown);
        assert_eq!(kit.scan(false), Err(KitError::InternalError));
        kit.handle_event(TransportEvent::PowerChanged { powered_on: true });
        assert_eq!(kit.state(), KitState::Ready);
    }

    #[test]
    fn test_scan_records_advertisements() {
        let (mut kit, mock, device) = kit();
        kit.scan(true).unwrap();
        assert_eq!(kit.state(), KitState::Scanning);
        assert_eq!(
            mock.requests(),
            vec![TransportRequest::StartScan {
                services: vec![SERVICE_UUID],
                allow_duplicates: true
            }]
        );

        kit.handle_event(device.advertisement());
        kit.handle_event(device.advertisement());
        assert_eq!(kit.registry().len(), 1);
        let entry = kit.registry().get(device.id).unwrap();
        assert_eq!(entry.display_name(), "DrinkOn");
        assert!((entry.level().unwrap() - 0.84).abs() < 1e-9);
        assert!((entry.consumed_24hr().unwrap() - 4.3).abs() < 1e-9);

        let events = kit.observer().drain_events();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, KitEvent::PeripheralDiscovered(_)))
                .count(),
            1
        );
        assert!(events.iter().any(|e| matches!(e, KitEvent::PeripheralUpdated(_))));
    }

    #[test]
    fn test_gate_refuses_second_operation() {
        let (mut kit, mock, device) = kit();
        kit.scan(false).unwrap();
        mock.clear_requests();

        assert_eq!(kit.scan(false), Err(KitError::BusyScanning));
        assert_eq!(kit.connect(device.id), Err(KitError::BusyScanning));
        assert_eq!(kit.error(), Some(KitError::BusyScanning));
        assert!(mock.requests().is_empty());
        assert_eq!(kit.state(), KitState::Scanning);

        kit.stop_scan();
        assert_eq!(kit.state(), KitState::Ready);
        assert_eq!(kit.error(), None);
    }

    #[test]
    fn test_refused_scan_keeps_registry() {
        let (mut kit, _mock, device) = kit();
        kit.scan(false).unwrap();
        kit.handle_event(device.advertisement());
        assert_eq!(kit.scan(true), Err(KitError::BusyScanning));
        assert_eq!(kit.registry().len(), 1);
    }

    #[test]
    fn test_full_read_cycle() {
        let (mut kit, mock, mut device) = kit();
        kit.scan(true).unwrap();
        kit.handle_event(device.advertisement());
        kit.stop_scan();
        mock.clear_requests();

        kit.connect_strongest(ConnectionOptions::READ_ALL).unwrap();
        assert_eq!(kit.state(), KitState::Connecting);
        pump(&mut kit, &mock, &mut device);

        assert_eq!(kit.state(), KitState::Ready);
        assert_eq!(kit.error(), None);
        let session = kit.peripheral().unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.status().is_some());
        assert!(session.info().is_some());
        assert!(session.level_sensor().is_some());
        assert!(session.log().is_some());
        assert!(!kit.registry().get(device.id).unwrap().is_connected());

        let events = kit.observer().drain_events();
        assert!(events.contains(&KitEvent::StateChanged {
            from: KitState::Connecting,
            to: KitState::Connected
        }));
        assert!(events.contains(&KitEvent::StateChanged {
            from: KitState::Connected,
            to: KitState::Ready
        }));
    }

    #[test]
    fn test_connect_strongest_prefers_reported_rssi() {
        let (mut kit, mock, _device) = kit();
        let silent = SimulatedDevice::new(PeripheralId(Uuid::from_u128(0xC1))).with_rssi(None);
        let weak = SimulatedDevice::new(PeripheralId(Uuid::from_u128(0xC2))).with_rssi(Some(-90));
        kit.scan(true).unwrap();
        kit.handle_event(silent.advertisement());
        kit.handle_event(weak.advertisement());
        kit.stop_scan();
        mock.clear_requests();

        kit.connect_strongest(ConnectionOptions::READ_STATUS).unwrap();
        assert_eq!(mock.requests(), vec![TransportRequest::Connect(weak.id)]);
    }

    #[test]
    fn test_requests_reach_connected_peripheral() {
        let (mut kit, mock, mut device) = kit();
        assert_eq!(
            kit.refresh(CharacteristicKind::Status),
            Err(RequestError::NotConnected)
        );

        kit.connect_with_options(device.id, ConnectionOptions::ENABLE_LEVEL_SENSOR_NOTIFICATIONS)
            .unwrap();
        pump(&mut kit, &mock, &mut device);
        assert!(device.is_notifying());

        kit.set_level_sensor_notify(false).unwrap();
        kit.refresh(CharacteristicKind::Status).unwrap();
        pump(&mut kit, &mock, &mut device);
        assert!(!device.is_notifying());
        assert_eq!(kit.state(), KitState::Connected);

        kit.disconnect();
        pump(&mut kit, &mock, &mut device);
        assert_eq!(
            kit.set_level_sensor_notify(true),
            Err(RequestError::NotConnected)
        );
    }

    #[test]
    fn test_connected_flag_tracks_link() {
        let (mut kit, mock, mut device) = kit();
        kit.scan(true).unwrap();
        kit.handle_event(device.advertisement());
        kit.stop_scan();
        mock.clear_requests();

        kit.connect_with_options(device.id, ConnectionOptions::ENABLE_LEVEL_SENSOR_NOTIFICATIONS)
            .unwrap();
        pump(&mut kit, &mock, &mut device);
        assert_eq!(kit.state(), KitState::Connected);
        assert!(kit.registry().get(device.id).unwrap().is_connected());

        kit.disconnect();
        pump(&mut kit, &mock, &mut device);
        assert_eq!(kit.state(), KitState::Ready);
        assert!(!kit.registry().get(device.id).unwrap().is_connected());
        assert!(!device.is_notifying());
    }

    #[test]
    fn test_connection_timeout() {
        let (mut kit, mock, device) = kit();
        let start = Instant::now();
        kit.connect(device.id).unwrap();
        mock.clear_requests();

        kit.tick(start + Duration::from_millis(100));
        assert_eq!(kit.state(), KitState::Connecting);

        kit.tick(start + Duration::from_secs(5));
        assert_eq!(kit.state(), KitState::Ready);
        assert_eq!(kit.error(), Some(KitError::ConnectionFailed));
        assert_eq!(mock.requests(), vec![TransportRequest::Disconnect(device.id)]);

        // A late success no longer counts.
        kit.handle_event(TransportEvent::Connected {
            peripheral: device.id,
        });
        assert_eq!(kit.state(), KitState::Ready);
        assert_eq!(
            kit.peripheral().unwrap().state(),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_connect_failed_event() {
        let (mut kit, _mock, device) = kit();
        kit.connect(device.id).unwrap();
        kit.handle_event(TransportEvent::ConnectFailed {
            peripheral: device.id,
            error: Some(TransportError::Gatt("refused".to_string())),
        });
        assert_eq!(kit.state(), KitState::Ready);
        assert_eq!(kit.error(), Some(KitError::ConnectionFailed));
    }

    #[test]
    fn test_connect_request_rejected() {
        let (mut kit, mock, device) = kit();
        mock.power_off();
        assert_eq!(kit.connect(device.id), Err(KitError::ConnectionFailed));
        assert_eq!(kit.state(), KitState::Ready);
    }

    #[test]
    fn test_scan_timeout_without_results() {
        let config = KitConfig {
            scan_timeout_ms: Some(1000),
            ..KitConfig::default()
        };
        let (mut kit, mock, _device) = kit_with(config);
        kit.scan(false).unwrap();
        kit.tick(Instant::now() + Duration::from_secs(2));
        assert_eq!(kit.state(), KitState::Ready);
        assert_eq!(kit.error(), Some(KitError::NoPeripheralsFound));
        assert!(mock.requests().contains(&TransportRequest::StopScan));
    }

    #[test]
    fn test_scan_timeout_with_results() {
        let config = KitConfig {
            scan_timeout_ms: Some(1000),
            ..KitConfig::default()
        };
        let (mut kit, _mock, device) = kit_with(config);
        kit.scan(false).unwrap();
        kit.handle_event(device.advertisement());
        kit.tick(Instant::now() + Duration::from_secs(2));
        assert_eq!(kit.state(), KitState::Ready);
        assert_eq!(kit.error(), None);
    }

    #[test]
    fn test_power_off_and_back() {
        let (mut kit, mock, mut device) = kit();
        kit.connect_with_options(device.id, ConnectionOptions::ENABLE_LEVEL_SENSOR_NOTIFICATIONS)
            .unwrap();
        pump(&mut kit, &mock, &mut device);
        assert_eq!(kit.state(), KitState::Connected);

        kit.handle_event(TransportEvent::PowerChanged { powered_on: false });
        assert_eq!(kit.state(), KitState::BluetoothPoweredOff);
        assert_eq!(kit.error(), Some(KitError::BluetoothPoweredOff));
        assert_eq!(
            kit.peripheral().unwrap().state(),
            ConnectionState::Disconnected
        );
        assert_eq!(kit.scan(false), Err(KitError::BluetoothPoweredOff));

        kit.handle_event(TransportEvent::PowerChanged { powered_on: true });
        assert_eq!(kit.state(), KitState::Ready);
        assert_eq!(kit.error(), None);
    }

    #[test]
    fn test_unsupported_is_permanent() {
        let (mut kit, _mock, _device) = kit();
        kit.handle_event(TransportEvent::SupportChanged { supported: false });
        assert_eq!(kit.state(), KitState::BluetoothUnsupported);
        kit.handle_event(TransportEvent::SupportChanged { supported: true });
        kit.handle_event(TransportEvent::PowerChanged { powered_on: true });
        assert_eq!(kit.state(), KitState::BluetoothUnsupported);
        assert_eq!(kit.error(), Some(KitError::BluetoothUnsupported));
    }

    #[test]
    fn test_unauthorized_reversible() {
        let (mut kit, _mock, _device) = kit();
        kit.handle_event(TransportEvent::AuthorizationChanged { authorized: false });
        assert_eq!(kit.state(), KitState::BluetoothUnauthorized);
        kit.handle_event(TransportEvent::AuthorizationChanged { authorized: true });
        assert_eq!(kit.state(), KitState::Ready);
    }

    #[test]
    fn test_config_toml_defaults() {
        let config: KitConfig = toml::from_str("connection_timeout_ms = 2500").unwrap();
        assert_eq!(config.connection_timeout(), Duration::from_millis(2500));
        assert!(config.allow_duplicates);
        assert_eq!(config.default_options, ConnectionOptions::READ_ALL);
        assert_eq!(config.scan_timeout(), None);

        let text = toml::to_string_pretty(&config).unwrap();
        let back: KitConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
