//! Port traits: the hexagonal boundary between the gateway core and the
//! platform.
//!
//! ```text
//!   BLE stack ──▶ GatewayEvent ──▶ GatewayService ──▶ BlePort / AdvertiserPort
//!                                      │    │
//!                      PublishPort ◀───┘    └──▶ EventSink, LedPort, SystemPort
//! ```
//!
//! Driven adapters (BLE stack, NVS, clock, LEDs) implement these traits.
//! [`GatewayService`](super::service::GatewayService) consumes them through
//! generics, so the core runs unchanged against the mocks in the
//! integration tests.
//!
//! ## Security notes
//!
//! - **KeyStore** holds the sensor AES key; implementations SHOULD keep it
//!   on the encrypted NVS partition.
//! - **ConfigPort** implementations MUST validate before persisting.

use crate::central::{BtAddr, ConnHandle, LedIndication};
use crate::config::{GatewayConfig, TOPIC_PREFIX_MAX};
use crate::crypto::AesKey;
use crate::error::BleError;
use crate::peripheral::AdvMode;
use crate::smp::SmpTransport;

// ───────────────────────────────────────────────────────────────
// BLE central port (driven adapter: domain → BLE stack)
// ───────────────────────────────────────────────────────────────

/// Central-role operations on the sensor link.
///
/// Discovery calls only start the procedure; completion arrives later as
/// a [`LinkEvent`](crate::central::LinkEvent).
pub trait BlePort: SmpTransport {
    fn start_scan(&mut self) -> Result<(), BleError>;

    fn stop_scan(&mut self) -> Result<(), BleError>;

    /// Start connecting; the handle is valid until [`release`](Self::release).
    fn connect(&mut self, addr: &BtAddr) -> Result<ConnHandle, BleError>;

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), BleError>;

    fn exchange_mtu(&mut self, conn: ConnHandle) -> Result<(), BleError>;

    /// Discover the SMP service by UUID.
    fn discover_smp_service(&mut self, conn: ConnHandle) -> Result<(), BleError>;

    fn discover_smp_characteristic(&mut self, conn: ConnHandle) -> Result<(), BleError>;

    fn discover_ccc(&mut self, conn: ConnHandle) -> Result<(), BleError>;

    /// Enable notifications on the SMP characteristic.
    fn subscribe(&mut self, conn: ConnHandle) -> Result<(), BleError>;

    /// Drop the stack reference held for `conn`.
    fn release(&mut self, conn: ConnHandle);
}

// ───────────────────────────────────────────────────────────────
// Advertiser port (driven adapter: domain → BLE stack)
// ───────────────────────────────────────────────────────────────

/// Peripheral-role advertising and the SMP server reply path.
pub trait AdvertiserPort {
    /// (Re)start advertising `payload` (raw AD structures).
    fn start_advertising(&mut self, mode: AdvMode, payload: &[u8]) -> Result<(), BleError>;

    fn stop_advertising(&mut self) -> Result<(), BleError>;

    /// Replace the payload without changing the mode.
    fn update_advertising(&mut self, payload: &[u8]) -> Result<(), BleError>;

    /// Notify an SMP response frame to a connected central.
    fn send_smp_response(&mut self, conn: ConnHandle, frame: &[u8]) -> Result<(), BleError>;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

pub trait ClockPort {
    /// Monotonic milliseconds since boot.
    fn uptime_ms(&self) -> u64;

    /// Wall clock seconds; 0 while the time has not been set.
    fn epoch(&self) -> u32;
}

// ───────────────────────────────────────────────────────────────
// Key store (driven adapter: domain ↔ NV storage)
// ───────────────────────────────────────────────────────────────

/// Persisted identity and secrets of the contact tracing gateway.
pub trait KeyStore {
    /// Sensor AES key; all `0xFF` when none is provisioned.
    fn aes_key(&self) -> AesKey;

    fn set_aes_key(&mut self, key: &AesKey) -> Result<(), StorageError>;

    fn network_id(&self) -> Option<u16>;

    fn set_network_id(&mut self, id: u16) -> Result<(), StorageError>;

    fn topic_prefix(&self) -> Option<heapless::String<TOPIC_PREFIX_MAX>>;

    fn set_topic_prefix(&mut self, prefix: &str) -> Result<(), StorageError>;

    fn commissioned(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Cloud status, LEDs, system
// ───────────────────────────────────────────────────────────────

/// Whether the cloud connection accepts publishes.
pub trait CloudStatus {
    fn ready_for_publish(&self) -> bool;
}

pub trait LedPort {
    fn indicate(&mut self, indication: LedIndication);
}

pub trait SystemPort {
    /// Reset the device after `delay_ms`.
    fn reboot(&mut self, delay_ms: u32);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging)
// ───────────────────────────────────────────────────────────────

/// The core emits structured [`CtEvent`](super::events::CtEvent)s through
/// this port. Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::CtEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration / storage ports
// ───────────────────────────────────────────────────────────────

/// Loads and persists [`GatewayConfig`].
///
/// Implementations MUST run [`GatewayConfig::validate`] before persisting
/// and reject invalid values rather than clamp them.
pub trait ConfigPort {
    /// Returns [`GatewayConfig::default()`] if nothing is stored.
    fn load(&self) -> Result<GatewayConfig, ConfigError>;

    fn save(&self, config: &GatewayConfig) -> Result<(), ConfigError>;
}

/// Raw namespaced key-value storage underneath [`KeyStore`] and
/// [`ConfigPort`].
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Aggregate
// ───────────────────────────────────────────────────────────────

/// Everything the service drives, as one borrow.
pub trait GatewayIo:
    BlePort + AdvertiserPort + ClockPort + KeyStore + CloudStatus + LedPort + SystemPort
{
}

impl<T> GatewayIo for T where
    T: BlePort + AdvertiserPort + ClockPort + KeyStore + CloudStatus + LedPort + SystemPort
{
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A field failed validation; the text names it.
    ValidationFailed(&'static str),
    StorageFull,
    IoError,
}

/// Errors from [`StoragePort`] and [`KeyStore`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    Full,
    IoError,
    /// Value has the wrong size or encoding for its key.
    Invalid,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Invalid => write!(f, "invalid value"),
        }
    }
}
