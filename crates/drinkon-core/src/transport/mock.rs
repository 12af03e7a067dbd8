//! Mock BLE transport and simulated bottle for testing.

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::traits::{
    BleTransport, CharacteristicHandle, PeripheralId, TransportError, TransportEvent,
};
use crate::protocol::{CharacteristicKind, SERVICE_UUID};

/// A request captured by `MockTransport`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportRequest {
    StartScan {
        services: Vec<Uuid>,
        allow_duplicates: bool,
    },
    StopScan,
    Connect(PeripheralId),
    Disconnect(PeripheralId),
    DiscoverServices {
        peripheral: PeripheralId,
        services: Vec<Uuid>,
    },
    DiscoverCharacteristics {
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    Read(CharacteristicHandle),
    Write {
        handle: CharacteristicHandle,
        data: Vec<u8>,
    },
    SetNotify {
        handle: CharacteristicHandle,
        enabled: bool,
    },
}

/// Mock transport that records requests instead of talking to a radio.
///
/// Clones share the same request log, so a test can keep one clone while
/// the kit owns another.
#[derive(Clone)]
pub struct MockTransport {
    /// Captured requests.
    requests: Arc<Mutex<Vec<TransportRequest>>>,
    /// Whether the simulated radio accepts requests.
    powered: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            powered: Arc::new(Mutex::new(true)),
        }
    }

    /// All captured requests.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Drain captured requests.
    pub fn take_requests(&self) -> Vec<TransportRequest> {
        std::mem::take(&mut *self.requests.lock().unwrap())
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    /// Number of captured requests matching `pred`.
    pub fn count(&self, pred: impl Fn(&TransportRequest) -> bool) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| pred(r)).count()
    }

    /// Make every subsequent request fail with `PoweredOff`.
    pub fn power_off(&self) {
        *self.powered.lock().unwrap() = false;
    }

    pub fn power_on(&self) {
        *self.powered.lock().unwrap() = true;
    }

    fn record(&self, request: TransportRequest) -> Result<(), TransportError> {
        if !*self.powered.lock().unwrap() {
            return Err(TransportError::PoweredOff);
        }
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BleTransport for MockTransport {
    fn start_scan(&self, services: &[Uuid], allow_duplicates: bool) -> Result<(), TransportError> {
        self.record(TransportRequest::StartScan {
            services: services.to_vec(),
            allow_duplicates,
        })
    }

    fn stop_scan(&self) -> Result<(), TransportError> {
        self.record(TransportRequest::StopScan)
    }

    fn connect(&self, peripheral: PeripheralId) -> Result<(), TransportError> {
        self.record(TransportRequest::Connect(peripheral))
    }

    fn disconnect(&self, peripheral: PeripheralId) -> Result<(), TransportError> {
        self.record(TransportRequest::Disconnect(peripheral))
    }

    fn discover_services(
        &self,
        peripheral: PeripheralId,
        services: &[Uuid],
    ) -> Result<(), TransportError> {
        self.record(TransportRequest::DiscoverServices {
            peripheral,
            services: services.to_vec(),
        })
    }

    fn discover_characteristics(
        &self,
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<(), TransportError> {
        self.record(TransportRequest::DiscoverCharacteristics {
            peripheral,
            service,
            characteristics: characteristics.to_vec(),
        })
    }

    fn read_value(&self, handle: &CharacteristicHandle) -> Result<(), TransportError> {
        self.record(TransportRequest::Read(*handle))
    }

    fn write_value(
        &self,
        handle: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.record(TransportRequest::Write {
            handle: *handle,
            data: data.to_vec(),
        })
    }

    fn set_notify(
        &self,
        handle: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.record(TransportRequest::SetNotify {
            handle: *handle,
            enabled,
        })
    }
}

/// A DrinkOn bottle that answers `TransportRequest`s with the events a
/// real device would produce.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub id: PeripheralId,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub manufacturer_data: Vec<u8>,
    pub status: Vec<u8>,
    pub info: Vec<u8>,
    pub level_sensor: Vec<u8>,
    /// Log pages returned by successive reads, cycling.
    pub log_pages: Vec<Vec<u8>>,
    next_log_page: usize,
    connected: bool,
    notifying: bool,
}

impl SimulatedDevice {
    pub fn new(id: PeripheralId) -> Self {
        let mut second_page = vec![24];
        second_page.extend_from_slice(&[0x05; 18]);
        Self {
            id,
            name: Some("DrinkOn".to_string()),
            rssi: Some(-55),
            manufacturer_data: vec![0x0B, 0x07, 0x11, 84, 43],
            status: vec![50, 84, 0, 0, 0x40, 0x41, 4, 54, 0xD2, 0x04],
            info: vec![0, 153, 11, 100, 0, b'F'],
            level_sensor: vec![0x10, 0x27, 0x00, 0x00],
            log_pages: vec![
                vec![
                    0, 0x0A, 0x05, 0x00, 0xC1, 0x42, 0x83, 0x00, 0x00, 0x00, 0x14, 0x1E, 0x28,
                    0x00, 0x00, 0x00, 0x03, 0x00, 0x01,
                ],
                second_page,
            ],
            next_log_page: 0,
            connected: false,
            notifying: false,
        }
    }

    pub fn with_rssi(mut self, rssi: Option<i16>) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_notifying(&self) -> bool {
        self.notifying
    }

    /// The handle this device assigns to `kind`.
    pub fn handle(&self, kind: CharacteristicKind) -> CharacteristicHandle {
        let attribute = match kind {
            CharacteristicKind::Status => 0x0010,
            CharacteristicKind::LevelSensor => 0x0013,
            CharacteristicKind::Info => 0x0017,
            CharacteristicKind::Log => 0x001A,
        };
        CharacteristicHandle {
            peripheral: self.id,
            uuid: kind.uuid(),
            attribute,
        }
    }

    pub fn advertisement(&self) -> TransportEvent {
        TransportEvent::Advertisement {
            peripheral: self.id,
            name: self.name.clone(),
            rssi: self.rssi,
            manufacturer_data: Some(self.manufacturer_data.clone()),
        }
    }

    /// A level sensor notification, if notifications are enabled.
    pub fn notify_level_sensor(&mut self, raw: i32) -> Option<TransportEvent> {
        self.level_sensor = raw.to_le_bytes().to_vec();
        if !(self.connected && self.notifying) {
            return None;
        }
        Some(TransportEvent::ValueUpdated {
            handle: self.handle(CharacteristicKind::LevelSensor),
            result: Ok(self.level_sensor.clone()),
        })
    }

    /// Events answering `request`; empty if it is not addressed to this device.
    pub fn answer(&mut self, request: &TransportRequest) -> Vec<TransportEvent> {
        let peripheral = self.id;
        match request {
            TransportRequest::StartScan { .. } | TransportRequest::StopScan => Vec::new(),
            TransportRequest::Connect(id) if *id == peripheral => {
                self.connected = true;
                vec![TransportEvent::Connected { peripheral }]
            }
            TransportRequest::Disconnect(id) if *id == peripheral => {
                self.connected = false;
                self.notifying = false;
                vec![TransportEvent::Disconnected {
                    peripheral,
                    error: None,
                }]
            }
            TransportRequest::DiscoverServices { peripheral: id, .. } if *id == peripheral => {
                vec![TransportEvent::ServicesDiscovered {
                    peripheral,
                    result: Ok(vec![SERVICE_UUID]),
                }]
            }
            TransportRequest::DiscoverCharacteristics {
                peripheral: id,
                service,
                characteristics,
            } if *id == peripheral => {
                let handles = CharacteristicKind::ALL
                    .into_iter()
                    .filter(|kind| {
                        characteristics.is_empty() || characteristics.contains(&kind.uuid())
                    })
                    .map(|kind| self.handle(kind))
                    .collect();
                vec![TransportEvent::CharacteristicsDiscovered {
                    peripheral,
                    service: *service,
                    result: Ok(handles),
                }]
            }
            TransportRequest::Read(handle) if handle.peripheral == peripheral => {
                vec![TransportEvent::ValueUpdated {
                    handle: *handle,
                    result: self.read(handle),
                }]
            }
            TransportRequest::Write { handle, data } if handle.peripheral == peripheral => {
                let result = match CharacteristicKind::from_uuid(&handle.uuid) {
                    Some(CharacteristicKind::Status) => {
                        self.status = data.clone();
                        Ok(())
                    }
                    _ => Err(TransportError::Gatt("write not permitted".to_string())),
                };
                vec![TransportEvent::WriteCompleted {
                    handle: *handle,
                    result,
                }]
            }
            TransportRequest::SetNotify { handle, enabled } if handle.peripheral == peripheral => {
                let result = match CharacteristicKind::from_uuid(&handle.uuid) {
                    Some(CharacteristicKind::LevelSensor) => {
                        self.notifying = *enabled;
                        Ok(*enabled)
                    }
                    _ => Err(TransportError::Gatt("notify not supported".to_string())),
                };
                vec![TransportEvent::NotifyStateChanged {
                    handle: *handle,
                    result,
                }]
            }
            _ => Vec::new(),
        }
    }

    fn read(&mut self, handle: &CharacteristicHandle) -> Result<Vec<u8>, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected(self.id));
        }
        match CharacteristicKind::from_uuid(&handle.uuid) {
            Some(CharacteristicKind::Status) => Ok(self.status.clone()),
            Some(CharacteristicKind::Info) => Ok(self.info.clone()),
            Some(CharacteristicKind::LevelSensor) => Ok(self.level_sensor.clone()),
            Some(CharacteristicKind::Log) if !self.log_pages.is_empty() => {
                let page = self.log_pages[self.next_log_page % self.log_pages.len()].clone();
                self.next_log_page += 1;
                Ok(page)
            }
            _ => Err(TransportError::Gatt("read not permitted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> SimulatedDevice {
        SimulatedDevice::new(PeripheralId(Uuid::from_u128(1)))
    }

    #[test]
    fn test_mock_request_capture() {
        let mock = MockTransport::new();
        mock.start_scan(&[SERVICE_UUID], true).unwrap();
        mock.stop_scan().unwrap();

        let requests = mock.take_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0],
            TransportRequest::StartScan {
                services: vec![SERVICE_UUID],
                allow_duplicates: true
            }
        );
        assert_eq!(requests[1], TransportRequest::StopScan);
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn test_mock_clones_share_log() {
        let mock = MockTransport::new();
        let other = mock.clone();
        other.connect(PeripheralId(Uuid::nil())).unwrap();
        assert_eq!(mock.count(|r| matches!(r, TransportRequest::Connect(_))), 1);
    }

    #[test]
    fn test_mock_power_off() {
        let mock = MockTransport::new();
        mock.power_off();
        assert_eq!(mock.stop_scan(), Err(TransportError::PoweredOff));
        assert!(mock.requests().is_empty());
        mock.power_on();
        assert!(mock.stop_scan().is_ok());
    }

    #[test]
    fn test_device_connect_and_read() {
        let mut dev = device();
        let events = dev.answer(&TransportRequest::Connect(dev.id));
        assert_eq!(events, vec![TransportEvent::Connected { peripheral: dev.id }]);

        let handle = dev.handle(CharacteristicKind::Info);
        let events = dev.answer(&TransportRequest::Read(handle));
        assert_eq!(
            events,
            vec![TransportEvent::ValueUpdated {
                handle,
                result: Ok(vec![0, 153, 11, 100, 0, b'F'])
            }]
        );
    }

    #[test]
    fn test_device_log_pages_cycle() {
        let mut dev = device();
        dev.answer(&TransportRequest::Connect(dev.id));
        let handle = dev.handle(CharacteristicKind::Log);
        let first = dev.read(&handle).unwrap();
        let second = dev.read(&handle).unwrap();
        assert_eq!(first[0], 0);
        assert_eq!(second[0], 24);
        assert_eq!(dev.read(&handle).unwrap(), first);
    }

    #[test]
    fn test_device_ignores_other_peripherals() {
        let mut dev = device();
        let other = PeripheralId(Uuid::from_u128(2));
        assert!(dev.answer(&TransportRequest::Connect(other)).is_empty());
        assert!(!dev.is_connected());
    }

    #[test]
    fn test_device_notify_only_level_sensor() {
        let mut dev = device();
        dev.answer(&TransportRequest::Connect(dev.id));
        let status = dev.handle(CharacteristicKind::Status);
        let events = dev.answer(&TransportRequest::SetNotify {
            handle: status,
            enabled: true,
        });
        assert!(matches!(
            &events[0],
            TransportEvent::NotifyStateChanged { result: Err(_), .. }
        ));
        assert!(dev.notify_level_sensor(5).is_none());

        let level = dev.handle(CharacteristicKind::LevelSensor);
        dev.answer(&TransportRequest::SetNotify {
            handle: level,
            enabled: true,
        });
        assert!(dev.is_notifying());
        assert!(dev.notify_level_sensor(5).is_some());
    }
}
