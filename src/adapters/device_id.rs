//! Gateway identity derived from the factory MAC address.
//!
//! - The BLE identity address is the Bluetooth MAC (base MAC + 2 on
//!   ESP32), stored little-endian as the controller reports it.
//! - The cloud client id is the full MAC in uppercase hex; it names the
//!   gateway's topics.

use core::fmt::Write;

use crate::app::service::GatewayIdentity;

/// Full 6-byte MAC address (transmission order).
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_read_mac(
            mac.as_mut_ptr(),
            esp_idf_svc::sys::esp_mac_type_t_ESP_MAC_BT,
        );
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Controller byte order (least significant first).
pub fn ble_addr(mac: &MacAddress) -> [u8; 6] {
    let mut addr = *mac;
    addr.reverse();
    addr
}

/// Cloud client id, e.g. `DEADBEEFCAFE`.
pub fn client_id(mac: &MacAddress) -> heapless::String<12> {
    let mut id = heapless::String::new();
    for b in mac {
        let _ = write!(id, "{:02X}", b);
    }
    id
}

/// Identity of this gateway, with the crate version as firmware version.
pub fn identity(mac: &MacAddress) -> GatewayIdentity {
    let major = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0);
    let minor = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0);
    let patch = env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0);
    GatewayIdentity {
        id: client_id(mac).as_str().into(),
        addr: ble_addr(mac),
        fw_version: GatewayIdentity::fw_version_bytes(major, minor, patch),
    }
}
