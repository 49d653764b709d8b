//! MQTT cloud adapter.
//!
//! Implements [`CloudPort`] for the publish worker and hands out a
//! [`CloudLink`] that implements [`CloudStatus`] for the gateway core.
//! Both sides read one shared connection flag, so the worker can run on
//! its own thread while the core polls readiness.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::mqtt::client::EspMqttClient`;
//!   the connection flag follows its `Connected`/`Disconnected` events.
//! - **all other targets**: an in-memory broker that records every publish.
//!
//! Network bring-up and broker credentials are owned by the platform; this
//! adapter only needs a reachable broker URL.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use crate::app::ports::CloudStatus;
use crate::error::CloudError;
use crate::publish::CloudPort;

/// Read-only view of the cloud connection for the gateway core.
#[derive(Debug, Clone, Default)]
pub struct CloudLink {
    connected: Arc<AtomicBool>,
}

impl CloudLink {
    /// Force the flag (host tooling and tests).
    pub fn set_connected(&self, on: bool) {
        self.connected.store(on, Ordering::Release);
    }
}

impl CloudStatus for CloudLink {
    fn ready_for_publish(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF MQTT client
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct MqttCloud {
    client: esp_idf_svc::mqtt::client::EspMqttClient<'static>,
    link: CloudLink,
}

#[cfg(target_os = "espidf")]
impl MqttCloud {
    pub fn connect(url: &str, client_id: &str) -> Result<Self, CloudError> {
        use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration};

        let link = CloudLink::default();
        let flag = link.connected.clone();
        let conf = MqttClientConfiguration {
            client_id: Some(client_id),
            ..Default::default()
        };
        let client = EspMqttClient::new_cb(url, &conf, move |event| match event.payload() {
            EventPayload::Connected(_) => {
                info!("MQTT: connected");
                flag.store(true, Ordering::Release);
            }
            EventPayload::Disconnected => {
                warn!("MQTT: disconnected");
                flag.store(false, Ordering::Release);
            }
            EventPayload::Error(e) => warn!("MQTT: {:?}", e),
            _ => {}
        })
        .map_err(|e| CloudError::Publish(e.code()))?;

        info!("MQTT: client '{}' -> {}", client_id, url);
        Ok(Self { client, link })
    }

    pub fn link(&self) -> CloudLink {
        self.link.clone()
    }
}

#[cfg(target_os = "espidf")]
impl CloudPort for MqttCloud {
    fn is_connected(&self) -> bool {
        self.link.ready_for_publish()
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), CloudError> {
        use esp_idf_svc::mqtt::client::QoS;

        self.client
            .enqueue(topic, QoS::AtLeastOnce, false, payload)
            .map(|_| ())
            .map_err(|e| CloudError::Publish(e.code()))
    }
}

// ───────────────────────────────────────────────────────────────
// Host simulation
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub type Published = Arc<std::sync::Mutex<Vec<(String, Vec<u8>)>>>;

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
pub struct MqttCloud {
    link: CloudLink,
    sent: Published,
    fail_next: bool,
}

#[cfg(not(target_os = "espidf"))]
impl MqttCloud {
    pub fn connect(url: &str, client_id: &str) -> Result<Self, CloudError> {
        info!("MQTT(sim): client '{}' -> {}", client_id, url);
        let cloud = Self::default();
        cloud.link.set_connected(true);
        Ok(cloud)
    }

    pub fn link(&self) -> CloudLink {
        self.link.clone()
    }

    /// Every payload accepted so far, shared with the caller.
    pub fn published(&self) -> Published {
        self.sent.clone()
    }

    /// Make the next publish fail with a broker error.
    pub fn fail_next(&mut self) {
        self.fail_next = true;
    }
}

#[cfg(not(target_os = "espidf"))]
impl CloudPort for MqttCloud {
    fn is_connected(&self) -> bool {
        self.link.ready_for_publish()
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), CloudError> {
        if !self.is_connected() {
            return Err(CloudError::NotConnected);
        }
        if core::mem::take(&mut self.fail_next) {
            warn!("MQTT(sim): injected failure on {}", topic);
            return Err(CloudError::Publish(-1));
        }
        self.sent
            .lock()
            .map_err(|_| CloudError::Publish(-1))?
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}
