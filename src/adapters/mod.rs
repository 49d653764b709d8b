//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter     | Implements                   | Connects to                |
//! |-------------|------------------------------|----------------------------|
//! | `ble`       | BlePort, SmpTransport        | Bluedroid GATT client      |
//! |             | AdvertiserPort               | Bluedroid GAP + GATT server|
//! | `cloud`     | CloudPort, CloudStatus       | ESP-IDF MQTT client        |
//! | `device_id` |                              | eFuse BT MAC               |
//! | `log_sink`  | EventSink                    | Serial log output          |
//! | `nvs`       | ConfigPort, StoragePort      | NVS / in-memory store      |
//! |             | KeyStore                     |                            |
//! | `platform`  | GatewayIo (by delegation)    | all of the above           |
//! | `system`    | SystemPort                   | `esp_restart`              |
//! | `time`      | ClockPort                    | ESP32 system timer, RTC    |

pub mod ble;
pub mod cloud;
pub mod device_id;
pub mod log_sink;
pub mod nvs;
pub mod platform;
pub mod system;
pub mod time;
