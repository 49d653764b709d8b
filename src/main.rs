//! CT Gateway Firmware: Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  BleAdapter        NvsAdapter       GatewayClock   MqttCloud   │
//! │  (Ble+Advertiser)  (Config+KeyStore) (ClockPort)   (CloudPort) │
//! │  LedPatternEngine  SystemControl    LogEventSink               │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │          GatewayService (pure logic)                   │    │
//! │  │  central machine · download · stash · advertising      │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Publish worker thread (dispatcher) · button · watchdog        │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use ct_gateway::adapters::ble::BleAdapter;
use ct_gateway::adapters::cloud::MqttCloud;
use ct_gateway::adapters::device_id;
use ct_gateway::adapters::log_sink::LogEventSink;
use ct_gateway::adapters::nvs::NvsAdapter;
use ct_gateway::adapters::platform::Platform;
use ct_gateway::adapters::system::SystemControl;
use ct_gateway::adapters::time::GatewayClock;
use ct_gateway::app::events::GatewayEvent;
use ct_gateway::app::ports::{ClockPort, ConfigPort};
use ct_gateway::app::service::GatewayService;
use ct_gateway::config::GatewayConfig;
use ct_gateway::drivers::button::ButtonDriver;
use ct_gateway::drivers::led_patterns::LedPatternEngine;
use ct_gateway::drivers::status_led::StatusLed;
use ct_gateway::drivers::watchdog::Watchdog;
use ct_gateway::{drivers, pins, publish};

/// Upper bound on one loop pass; keeps LED and button responsive.
const LOOP_PERIOD_MS: u64 = 25;

const MQTT_URL: &str = match option_env!("CT_MQTT_URL") {
    Some(url) => url,
    None => "mqtts://localhost:8883",
};

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  CT Gateway v{}                   ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Board peripherals ──────────────────────────────────
    if let Err(e) = drivers::hw_init::init_peripherals() {
        // Without the LED and button the gateway still works.
        warn!("GPIO init failed: {}", e);
    }
    if let Err(e) = drivers::hw_init::init_isr_service() {
        warn!("ISR service init failed: {}, button disabled", e);
    }
    let watchdog = Watchdog::default();

    // ── 3. Load config from NVS (or defaults) ─────────────────
    let nvs = match NvsAdapter::new() {
        Ok(n) => n,
        Err(e) => {
            warn!("NVS init failed ({}), running with defaults and no persistence", e);
            NvsAdapter::default()
        }
    };
    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            GatewayConfig::default()
        }
    };
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    // ── 4. Identity ───────────────────────────────────────────
    let mac = device_id::read_mac();
    let identity = device_id::identity(&mac);
    info!("Gateway ID: {}", identity.id);

    // ── 5. Cloud client + publish worker ──────────────────────
    let cloud = MqttCloud::connect(MQTT_URL, &identity.id)
        .map_err(|e| anyhow::anyhow!("MQTT client: {}", e))?;
    let cloud_link = cloud.link();
    let (publisher, worker) = publish::dispatcher(config.publish_buffer_size, cloud);
    worker.spawn()?;

    // ── 6. BLE stack ──────────────────────────────────────────
    let mut ble = BleAdapter::new();
    ble.start()
        .map_err(|e| anyhow::anyhow!("BLE start: {}", e))?;

    let mut platform = Platform {
        ble,
        clock: GatewayClock::new(),
        nvs,
        cloud: cloud_link,
        led: LedPatternEngine::new(),
        system: SystemControl::new(),
    };
    let mut sink = LogEventSink::new();
    let mut button = ButtonDriver::new(pins::BUTTON_GPIO);
    let mut status_led = StatusLed::new();

    // ── 7. Gateway core ───────────────────────────────────────
    let mut gateway = GatewayService::new(config, publisher, identity);
    gateway.init(&mut platform, &mut sink);

    info!("System ready. Entering event loop.");

    // ── 8. Event loop ─────────────────────────────────────────
    let mut last_ms = platform.clock.uptime_ms();
    loop {
        while let Some(event) = platform.ble.next_event() {
            gateway.handle_event(event, &mut platform, &mut sink);
        }

        let now_ms = platform.clock.uptime_ms();
        if let Some(cmd) = button.tick(now_ms as u32) {
            info!("Button: press {}", button.presses());
            gateway.handle_event(GatewayEvent::Command(cmd), &mut platform, &mut sink);
        }

        gateway.poll(&mut platform, &mut sink);

        let delta = now_ms.saturating_sub(last_ms);
        last_ms = now_ms;
        status_led.set(platform.led.tick(delta as u32));

        watchdog.feed();

        let sleep_ms = gateway
            .next_deadline()
            .map_or(LOOP_PERIOD_MS, |at| at.saturating_sub(now_ms))
            .clamp(1, LOOP_PERIOD_MS);
        std::thread::sleep(Duration::from_millis(sleep_ms));
    }
}
