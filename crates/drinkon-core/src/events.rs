//! Event system for UI decoupling.
//!
//! Every change to kit state, the sticky error, the scan registry or a
//! peripheral's published snapshots is announced as a `KitEvent`, after the
//! change has been applied. Observers are the single delivery point for
//! consumers; nothing else hands out mutable views of kit state.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::KitError;
use crate::protocol::{
    InfoCharacteristic, LevelSensorCharacteristic, LogCharacteristic, StatusCharacteristic,
};
use crate::registry::ScannedPeripheral;
use crate::state::{ConnectionState, KitState};
use crate::transport::PeripheralId;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by the kit.
#[derive(Debug, Clone, PartialEq)]
pub enum KitEvent {
    /// Library-wide state changed.
    StateChanged { from: KitState, to: KitState },
    /// Sticky error set, replaced or cleared.
    ErrorChanged { error: Option<KitError> },
    /// First advertisement from a peripheral.
    PeripheralDiscovered(ScannedPeripheral),
    /// Registry entry changed (RSSI, advertised telemetry, connected flag).
    PeripheralUpdated(ScannedPeripheral),
    ConnectionStateChanged {
        peripheral: PeripheralId,
        from: ConnectionState,
        to: ConnectionState,
    },
    StatusUpdated {
        peripheral: PeripheralId,
        value: StatusCharacteristic,
    },
    InfoUpdated {
        peripheral: PeripheralId,
        value: InfoCharacteristic,
    },
    LevelSensorUpdated {
        peripheral: PeripheralId,
        value: LevelSensorCharacteristic,
    },
    /// Accumulated log after a page was accepted.
    LogUpdated {
        peripheral: PeripheralId,
        value: LogCharacteristic,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
}

/// Observer trait for receiving kit events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait KitObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &KitEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl KitObserver for NullObserver {
    fn on_event(&self, _event: &KitEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl KitObserver for TracingObserver {
    fn on_event(&self, event: &KitEvent) {
        match event {
            KitEvent::StateChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Kit state changed");
            }
            KitEvent::ErrorChanged { error } => match error {
                Some(e) => tracing::warn!(error = ?e, "{}", e),
                None => tracing::debug!("Error cleared"),
            },
            KitEvent::PeripheralDiscovered(p) => {
                tracing::info!(
                    peripheral = %p.id(),
                    name = p.display_name(),
                    rssi = ?p.rssi(),
                    "Peripheral discovered"
                );
            }
            KitEvent::PeripheralUpdated(p) => {
                tracing::trace!(
                    peripheral = %p.id(),
                    rssi = ?p.rssi(),
                    level = ?p.level(),
                    connected = p.is_connected(),
                    "Peripheral updated"
                );
            }
            KitEvent::ConnectionStateChanged {
                peripheral,
                from,
                to,
            } => {
                tracing::info!(
                    peripheral = %peripheral,
                    from = %from,
                    to = %to,
                    "Connection state changed"
                );
            }
            KitEvent::StatusUpdated { peripheral, value } => {
                tracing::info!(
                    peripheral = %peripheral,
                    goal = value.goal_24hr,
                    level = value.bottle_level,
                    consumed = value.consumed_24hr,
                    battery = value.battery_level,
                    "Status"
                );
            }
            KitEvent::InfoUpdated { peripheral, value } => {
                tracing::info!(
                    peripheral = %peripheral,
                    firmware = %value.firmware_version,
                    model = value.model_code,
                    hardware = %value.hardware_code,
                    "Info"
                );
            }
            KitEvent::LevelSensorUpdated { peripheral, value } => {
                tracing::debug!(peripheral = %peripheral, raw = value.raw, "Level sensor");
            }
            KitEvent::LogUpdated { peripheral, value } => {
                tracing::info!(
                    peripheral = %peripheral,
                    hours = value.points.len(),
                    total = value.total_consumed(),
                    "Log"
                );
            }
            KitEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

/// Observer that queues events for a single consumer to drain.
///
/// The queue is bounded; when full the oldest event is dropped.
pub struct QueuedObserver {
    events: Mutex<VecDeque<KitEvent>>,
    capacity: usize,
}

impl QueuedObserver {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn drain_events(&self) -> Vec<KitEvent> {
        let mut events = self.events.lock().unwrap();
        events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for QueuedObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl KitObserver for QueuedObserver {
    fn on_event(&self, event: &KitEvent) {
        let mut events = self.events.lock().unwrap();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(message: &str) -> KitEvent {
        KitEvent::Log {
            level: LogLevel::Info,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_queued_observer_drains_in_order() {
        let observer = QueuedObserver::new();
        observer.on_event(&log("a"));
        observer.on_event(&KitEvent::ErrorChanged { error: None });
        assert_eq!(observer.len(), 2);

        let events = observer.drain_events();
        assert_eq!(events[0], log("a"));
        assert_eq!(events[1], KitEvent::ErrorChanged { error: None });
        assert!(observer.is_empty());
    }

    #[test]
    fn test_queued_observer_drops_oldest() {
        let observer = QueuedObserver::with_capacity(2);
        observer.on_event(&log("a"));
        observer.on_event(&log("b"));
        observer.on_event(&log("c"));
        assert_eq!(observer.drain_events(), vec![log("b"), log("c")]);
    }
}
