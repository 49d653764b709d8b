//! The concrete [`GatewayIo`](crate::app::ports::GatewayIo) bundle.
//!
//! `GatewayService` takes one `&mut` borrow for everything it drives.
//! `Platform` owns the individual adapters and forwards each port to the
//! one that implements it, so `main()` hands over a single value.

use crate::app::ports::{
    AdvertiserPort, BlePort, ClockPort, CloudStatus, KeyStore, LedPort, StorageError, SystemPort,
};
use crate::central::{BtAddr, ConnHandle, LedIndication};
use crate::config::TOPIC_PREFIX_MAX;
use crate::crypto::AesKey;
use crate::drivers::led_patterns::LedPatternEngine;
use crate::error::BleError;
use crate::peripheral::AdvMode;
use crate::smp::SmpTransport;

use super::ble::BleAdapter;
use super::cloud::CloudLink;
use super::nvs::NvsAdapter;
use super::system::SystemControl;
use super::time::GatewayClock;

pub struct Platform {
    pub ble: BleAdapter,
    pub clock: GatewayClock,
    pub nvs: NvsAdapter,
    pub cloud: CloudLink,
    pub led: LedPatternEngine,
    pub system: SystemControl,
}

// ── SMP / BLE ─────────────────────────────────────────────────

impl SmpTransport for Platform {
    fn smp_mtu(&self) -> Option<usize> {
        self.ble.smp_mtu()
    }

    fn smp_write(&mut self, frame: &[u8]) -> Result<(), BleError> {
        self.ble.smp_write(frame)
    }
}

impl BlePort for Platform {
    fn start_scan(&mut self) -> Result<(), BleError> {
        self.ble.start_scan()
    }

    fn stop_scan(&mut self) -> Result<(), BleError> {
        self.ble.stop_scan()
    }

    fn connect(&mut self, addr: &BtAddr) -> Result<ConnHandle, BleError> {
        self.ble.connect(addr)
    }

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), BleError> {
        self.ble.disconnect(conn)
    }

    fn exchange_mtu(&mut self, conn: ConnHandle) -> Result<(), BleError> {
        self.ble.exchange_mtu(conn)
    }

    fn discover_smp_service(&mut self, conn: ConnHandle) -> Result<(), BleError> {
        self.ble.discover_smp_service(conn)
    }

    fn discover_smp_characteristic(&mut self, conn: ConnHandle) -> Result<(), BleError> {
        self.ble.discover_smp_characteristic(conn)
    }

    fn discover_ccc(&mut self, conn: ConnHandle) -> Result<(), BleError> {
        self.ble.discover_ccc(conn)
    }

    fn subscribe(&mut self, conn: ConnHandle) -> Result<(), BleError> {
        self.ble.subscribe(conn)
    }

    fn release(&mut self, conn: ConnHandle) {
        self.ble.release(conn);
    }
}

impl AdvertiserPort for Platform {
    fn start_advertising(&mut self, mode: AdvMode, payload: &[u8]) -> Result<(), BleError> {
        self.ble.start_advertising(mode, payload)
    }

    fn stop_advertising(&mut self) -> Result<(), BleError> {
        self.ble.stop_advertising()
    }

    fn update_advertising(&mut self, payload: &[u8]) -> Result<(), BleError> {
        self.ble.update_advertising(payload)
    }

    fn send_smp_response(&mut self, conn: ConnHandle, frame: &[u8]) -> Result<(), BleError> {
        self.ble.send_smp_response(conn, frame)
    }
}

// ── Everything else ───────────────────────────────────────────

impl ClockPort for Platform {
    fn uptime_ms(&self) -> u64 {
        self.clock.uptime_ms()
    }

    fn epoch(&self) -> u32 {
        self.clock.epoch()
    }
}

impl KeyStore for Platform {
    fn aes_key(&self) -> AesKey {
        self.nvs.aes_key()
    }

    fn set_aes_key(&mut self, key: &AesKey) -> Result<(), StorageError> {
        self.nvs.set_aes_key(key)
    }

    fn network_id(&self) -> Option<u16> {
        self.nvs.network_id()
    }

    fn set_network_id(&mut self, id: u16) -> Result<(), StorageError> {
        self.nvs.set_network_id(id)
    }

    fn topic_prefix(&self) -> Option<heapless::String<TOPIC_PREFIX_MAX>> {
        self.nvs.topic_prefix()
    }

    fn set_topic_prefix(&mut self, prefix: &str) -> Result<(), StorageError> {
        self.nvs.set_topic_prefix(prefix)
    }

    fn commissioned(&self) -> bool {
        self.nvs.commissioned()
    }
}

impl CloudStatus for Platform {
    fn ready_for_publish(&self) -> bool {
        self.cloud.ready_for_publish()
    }
}

impl LedPort for Platform {
    fn indicate(&mut self, indication: LedIndication) {
        self.led.indicate(indication);
    }
}

impl SystemPort for Platform {
    fn reboot(&mut self, delay_ms: u32) {
        self.system.reboot(delay_ms);
    }
}
