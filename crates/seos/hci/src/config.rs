//! Controller configuration

use std::time::Duration;

use crate::packet::Address;

/// Manufacturer data capability bits advertised to readers
pub mod capability {
    /// Twist and go
    pub const TWIST_AND_GO: u8 = 0x02;
    /// Tap
    pub const ALLOW_TAP: u8 = 0x04;
    /// App specific
    pub const APP_SPECIFIC: u8 = 0x08;
    /// Enhanced tap
    pub const ENHANCED_TAP: u8 = 0x40;
}

/// Name used when none is configured
pub const DEFAULT_DEVICE_NAME: &str = "Flipper";

/// Settings of the HCI controller engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciConfig {
    /// How long to wait for an advertising enable or disable to complete
    pub advertising_retry: Duration,
    /// How long to wait for a scan enable or disable to complete
    pub scan_retry: Duration,
    /// Number of scanned addresses remembered before new ones are ignored
    pub known_address_capacity: usize,
    /// LE random address, wire order
    pub random_address: Address,
    /// Public address written when the controller reports none, wire order
    pub public_address: Address,
    /// Complete local name, cut to 8 bytes to fit the scan response
    pub device_name: String,
    /// Capability bits, see [`capability`]
    pub capabilities: u8,
    /// Tap, twist, seamless and app RSSI thresholds in dBm
    pub rssi_thresholds: [i8; 4],
}

impl Default for HciConfig {
    fn default() -> Self {
        Self {
            advertising_retry: Duration::from_secs(1),
            scan_retry: Duration::from_millis(100),
            known_address_capacity: 32,
            random_address: [0xCA, 0xFE, 0x00, 0x00, 0x00, 0x03],
            public_address: [0x00, 0x00, 0x01, 0x02, 0x21, 0xAD],
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            capabilities: capability::TWIST_AND_GO
                | capability::ALLOW_TAP
                | capability::APP_SPECIFIC
                | capability::ENHANCED_TAP,
            rssi_thresholds: [-75; 4],
        }
    }
}
