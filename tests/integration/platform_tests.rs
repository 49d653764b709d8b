//! End to end on the host adapters: the loopback BLE stack, the in-memory
//! NVS, the simulated MQTT client and a real publish worker thread.

use ct_gateway::adapters::ble::{BleAdapter, SENSOR_LINK, SimCall};
use ct_gateway::adapters::cloud::{MqttCloud, Published};
use ct_gateway::adapters::nvs::NvsAdapter;
use ct_gateway::adapters::platform::Platform;
use ct_gateway::adapters::system::SystemControl;
use ct_gateway::adapters::time::GatewayClock;
use ct_gateway::app::events::{CtEvent, GatewayEvent};
use ct_gateway::app::service::GatewayService;
use ct_gateway::central::{AdvReport, AdvType, LinkEvent, SensorState};
use ct_gateway::central::scan::FLAG_HAS_LOG_DATA;
use ct_gateway::config::GatewayConfig;
use ct_gateway::datalog::{ENTRY_PROTOCOL_V2, PUBLISH_HEADER_SIZE};
use ct_gateway::drivers::led_patterns::LedPatternEngine;
use ct_gateway::publish::{self, Dispatcher};

use crate::mock_gateway::{
    Events, GATEWAY_ID, SENSOR_ADDR, chunk, identity, log_header, sensor_ad_data, v2_entry,
};

type Service = GatewayService<Dispatcher>;

fn rig(cloud: MqttCloud) -> (Service, Platform, Events, Published) {
    let config = GatewayConfig::default();
    let published = cloud.published();
    let link = cloud.link();
    let (publisher, worker) = publish::dispatcher(config.publish_buffer_size, cloud);
    worker.spawn().expect("spawn publish worker");

    let mut ble = BleAdapter::new();
    ble.start().unwrap();
    let mut platform = Platform {
        ble,
        clock: GatewayClock::new(),
        nvs: NvsAdapter::default(),
        cloud: link,
        led: LedPatternEngine::new(),
        system: SystemControl::new(),
    };
    let mut events = Events::default();
    let mut svc = GatewayService::new(config, publisher, identity());
    svc.init(&mut platform, &mut events);
    (svc, platform, events, published)
}

/// Feed every queued stack event to the service, including the ones its
/// own calls produce.
fn pump(svc: &mut Service, platform: &mut Platform, events: &mut Events) {
    while let Some(event) = platform.ble.next_event() {
        svc.handle_event(event, platform, events);
    }
}

fn advertise(platform: &mut Platform) {
    platform
        .ble
        .inject(GatewayEvent::Ble(LinkEvent::Advertisement(AdvReport {
            addr: SENSOR_ADDR,
            rssi: -48,
            adv_type: AdvType::Ind,
            data: sensor_ad_data(FLAG_HAS_LOG_DATA, 0x10),
        })));
}

/// Serve a two-entry V2 log to the download request in flight.
fn serve_log(svc: &mut Service, platform: &mut Platform, events: &mut Events) -> Vec<Vec<u8>> {
    let header = log_header(ENTRY_PROTOCOL_V2, 0, 2);
    let entries = vec![v2_entry(1_650_000_100, 2), v2_entry(1_650_000_200, 3)];
    let body = entries.concat();
    let file_size = (header.len() + body.len()) as u32;

    platform.ble.inject(chunk(0, &header, Some(file_size)));
    pump(svc, platform, events);
    platform.ble.inject(chunk(header.len() as u32, &body, None));
    pump(svc, platform, events);
    entries
}

fn smp_writes(ble: &BleAdapter) -> usize {
    ble.calls()
        .iter()
        .filter(|c| matches!(c, SimCall::SmpWrite(_)))
        .count()
}

#[test]
fn sensor_log_reaches_mqtt() {
    let cloud = MqttCloud::connect("mqtt://sim", GATEWAY_ID).unwrap();
    let (mut svc, mut platform, mut events, published) = rig(cloud);

    advertise(&mut platform);
    pump(&mut svc, &mut platform, &mut events);
    assert_eq!(svc.state(), SensorState::LogDownload);
    assert!(platform.ble.calls().contains(&SimCall::Connect(SENSOR_ADDR)));
    assert_eq!(smp_writes(&platform.ble), 1);

    let entries = serve_log(&mut svc, &mut platform, &mut events);

    // Download done, link dropped by us and reported back by the stack.
    assert!(platform.ble.calls().contains(&SimCall::Disconnect(SENSOR_LINK)));
    assert!(platform.ble.calls().contains(&SimCall::Release(SENSOR_LINK)));
    assert_eq!(svc.state(), SensorState::FindingDevice);
    assert_eq!(svc.num_download_completions(), 1);

    let sent = published.lock().unwrap();
    assert_eq!(sent.len(), 2);
    for ((topic, payload), entry) in sent.iter().zip(&entries) {
        assert_eq!(topic, &format!("mg100-ct/dev/gw/{GATEWAY_ID}/up"));
        assert_eq!(&payload[PUBLISH_HEADER_SIZE..], &entry[..entry.len() - 2]);
    }
}

#[test]
fn broker_failure_is_recovered_by_the_drain() {
    let mut cloud = MqttCloud::connect("mqtt://sim", GATEWAY_ID).unwrap();
    cloud.fail_next();
    let (mut svc, mut platform, mut events, published) = rig(cloud);

    advertise(&mut platform);
    pump(&mut svc, &mut platform, &mut events);
    serve_log(&mut svc, &mut platform, &mut events);

    assert!(published.lock().unwrap().is_empty());
    assert!(svc.stash().is_available());
    assert_eq!(svc.state(), SensorState::FindingDevice);

    for _ in 0..3 {
        svc.poll(&mut platform, &mut events);
    }
    assert!(events.contains(&CtEvent::StashDrained));
    assert_eq!(published.lock().unwrap().len(), 2);
    assert!(!svc.stash().is_available());
}
