//! Discovered peripheral representation and related functionality

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::UNKNOWN_DEVICE_NAME;

/// Represents a discovered Bluetooth peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralRef {
    /// Platform-specific unique identifier for the device (especially important on macOS)
    pub id: String,
    /// The advertised name of the device, if available
    pub name: Option<String>,
    /// The signal strength (RSSI, dBm) at the time the device was first seen
    pub rssi: Option<i16>,
}

impl PeripheralRef {
    /// Creates a new PeripheralRef instance
    pub fn new(id: impl Into<String>, name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            id: id.into(),
            name,
            rssi,
        }
    }

    /// The advertised name, or a placeholder for nameless devices
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_DEVICE_NAME)
    }

    /// Returns true if the device advertised a non-empty name
    pub fn has_name(&self) -> bool {
        self.name.as_ref().is_some_and(|name| !name.trim().is_empty())
    }

    /// Extracts the MAC address embedded in the platform id, if any.
    ///
    /// Windows and Linux ids carry the address; CoreBluetooth ids are UUIDs and yield `None`.
    pub fn address(&self) -> Option<String> {
        static MAC: OnceLock<Regex> = OnceLock::new();
        let re = MAC.get_or_init(|| {
            Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}[0-9A-Fa-f]{2}").expect("valid MAC regex")
        });
        re.find_iter(&self.id)
            .last()
            .map(|m| m.as_str().replace(['_', '-'], ":").to_uppercase())
    }
}
