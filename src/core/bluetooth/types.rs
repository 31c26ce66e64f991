//! Defines shared data structures for the Bluetooth module.

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::device::PeripheralRef;

/// Lifecycle of the single glasses connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "peripheral", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting(PeripheralRef),
    Connected(PeripheralRef),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    /// The peripheral being connected to or held, if any
    pub fn peripheral(&self) -> Option<&PeripheralRef> {
        match self {
            ConnectionState::Connecting(p) | ConnectionState::Connected(p) => Some(p),
            _ => None,
        }
    }
}

/// Events broadcast by the connection manager and the delivery pacer.
///
/// They replace the UI callbacks of the companion app; a shell can forward
/// them to its frontend as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LinkEvent {
    ScanStarted,
    PeripheralDiscovered { peripheral: PeripheralRef },
    ScanStopped,
    ScanFailed { reason: String },
    StateChanged { state: ConnectionState },
    LinkLost { peripheral: PeripheralRef },
    Notification { text: String },
    DeliveryFailed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serialization() {
        let state = ConnectionState::Connected(PeripheralRef::new("abc", Some("Glasses".into()), None));
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "connected");
        assert_eq!(json["peripheral"]["id"], "abc");

        let json = serde_json::to_value(ConnectionState::Disconnected).unwrap();
        assert_eq!(json["state"], "disconnected");
    }

    #[test]
    fn test_event_tag() {
        let json = serde_json::to_value(LinkEvent::ScanStarted).unwrap();
        assert_eq!(json["event"], "scan-started");
    }

    #[test]
    fn test_peripheral_accessor() {
        let p = PeripheralRef::new("abc", None, None);
        assert_eq!(ConnectionState::Connecting(p.clone()).peripheral(), Some(&p));
        assert!(!ConnectionState::Connecting(p).is_connected());
        assert_eq!(ConnectionState::Scanning.peripheral(), None);
    }
}
