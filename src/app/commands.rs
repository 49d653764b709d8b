//! Inbound commands to the gateway service.
//!
//! Actions requested by the outside world (button ISR, shell, cloud) that
//! the [`GatewayService`](super::service::GatewayService) interprets.

/// Commands that adapters can queue into the gateway core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayCommand {
    /// User button: open the connectable advertising window.
    Button,

    /// Publish one synthetic entry straight to the cloud.
    PublishDummyData,

    /// Send an SMP echo to the connected sensor.
    SendEcho(u32),

    /// Change and persist the BLE network id.
    SetNetworkId(u16),

    /// Disconnect the sensor link, if any.
    DisconnectSensor,
}
