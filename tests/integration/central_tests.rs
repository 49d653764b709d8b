//! Integration tests for the sensor link: scan filter → connection →
//! discovery chain → first SMP request, plus every way the link ends.

use ct_gateway::app::commands::GatewayCommand;
use ct_gateway::app::events::{CtEvent, GatewayEvent};
use ct_gateway::central::scan::{FLAG_HAS_EPOCH_TIME, FLAG_HAS_LOG_DATA};
use ct_gateway::central::{AdvType, IgnoreReason, LedIndication, LinkEvent, SensorState};
use ct_gateway::config::GatewayConfig;
use ct_gateway::smp::{FS_MGMT_ID_FILE, MGMT_GROUP_ID_FS, MGMT_OP_READ, MGMT_OP_WRITE};

use crate::mock_gateway::{
    MockGateway, RadioCall, SENSOR, SENSOR_ADDR, ble, chunk, connect_sensor, gateway,
    sensor_advert, write_rsp,
};

const KEY: [u8; 16] = *b"0123456789abcdef";

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ── Scan filter ───────────────────────────────────────────────

#[test]
fn log_data_advert_connects_and_configures_link() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    assert_eq!(io.count(&RadioCall::StartScan), 1);

    svc.handle_event(sensor_advert(FLAG_HAS_LOG_DATA, AdvType::Ind), &mut io, &mut ev);
    assert_eq!(svc.state(), SensorState::FindingDevice);
    assert!(svc.is_connected_to_sensor(), "connection attempt owns the link");
    assert_eq!(io.count(&RadioCall::StopScan), 1);
    assert_eq!(io.count(&RadioCall::Connect(SENSOR_ADDR)), 1);
    assert!(ev.contains(&CtEvent::SensorFound { addr: SENSOR_ADDR }));

    svc.handle_event(
        ble(LinkEvent::Connected {
            conn: SENSOR,
            status: 0,
        }),
        &mut io,
        &mut ev,
    );
    assert_eq!(svc.state(), SensorState::FindingService);
    assert_eq!(io.calls.last(), Some(&RadioCall::ExchangeMtu));

    svc.handle_event(ble(LinkEvent::MtuExchanged { ok: true }), &mut io, &mut ev);
    assert_eq!(io.calls.last(), Some(&RadioCall::DiscoverService));
    svc.handle_event(ble(LinkEvent::ServiceDiscovered { ok: true }), &mut io, &mut ev);
    assert_eq!(svc.state(), SensorState::FindingSmpChar);
    svc.handle_event(
        ble(LinkEvent::CharacteristicDiscovered { ok: true }),
        &mut io,
        &mut ev,
    );
    assert_eq!(svc.state(), SensorState::EnablingNotifications);
    svc.handle_event(ble(LinkEvent::CccDiscovered { ok: true }), &mut io, &mut ev);
    assert_eq!(io.calls.last(), Some(&RadioCall::Subscribe));
    assert!(io.smp_writes.is_empty());

    svc.handle_event(ble(LinkEvent::Subscribed { ok: true }), &mut io, &mut ev);
    assert_eq!(svc.state(), SensorState::LogDownload);
    assert_eq!(io.last_led(), Some(LedIndication::Connected));
    assert!(svc.log_transfer_active());
    assert_eq!(svc.num_connections(), 1);
    assert_eq!(svc.num_ct_scan_results(), 1);

    let req = io.last_request().expect("download request written");
    assert_eq!((req.op, req.group, req.id), (MGMT_OP_READ, MGMT_GROUP_ID_FS, FS_MGMT_ID_FILE));
    assert!(contains(&io.smp_writes[0], b"/log/ct"));
}

#[test]
fn advert_without_log_data_is_only_counted() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    svc.handle_event(sensor_advert(FLAG_HAS_EPOCH_TIME, AdvType::Ind), &mut io, &mut ev);
    assert_eq!(svc.num_scan_results(), 1);
    assert_eq!(svc.num_ct_scan_results(), 1);
    assert_eq!(io.count(&RadioCall::Connect(SENSOR_ADDR)), 0);
    assert!(!svc.is_connected_to_sensor());
}

#[test]
fn non_connectable_advert_is_not_a_sensor() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    svc.handle_event(
        sensor_advert(FLAG_HAS_LOG_DATA, AdvType::NonConnInd),
        &mut io,
        &mut ev,
    );
    assert_eq!(svc.num_scan_results(), 1);
    assert_eq!(svc.num_ct_scan_results(), 0);
    assert_eq!(io.count(&RadioCall::Connect(SENSOR_ADDR)), 0);
}

#[test]
fn cloud_offline_blocks_connection_and_is_logged() {
    let config = GatewayConfig {
        adv_log_filter_cnt: 1,
        ..GatewayConfig::default()
    };
    let mut io = MockGateway::new();
    io.cloud_ready = false;
    let (mut svc, mut io, mut ev) = gateway(config, io);

    svc.handle_event(sensor_advert(FLAG_HAS_LOG_DATA, AdvType::Ind), &mut io, &mut ev);
    assert_eq!(io.count(&RadioCall::Connect(SENSOR_ADDR)), 0);
    assert!(ev.contains(&CtEvent::AdIgnored {
        reason: IgnoreReason::CloudNotReady,
        all_ads: 1,
    }));
}

#[test]
fn ignored_adverts_are_throttled_in_the_log() {
    let mut io = MockGateway::new();
    io.cloud_ready = false;
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), io);
    for _ in 0..250 {
        svc.handle_event(sensor_advert(FLAG_HAS_LOG_DATA, AdvType::Ind), &mut io, &mut ev);
    }
    assert_eq!(svc.num_scan_results(), 250);
    assert_eq!(ev.count(|e| matches!(e, CtEvent::AdIgnored { .. })), 2);
}

// ── Authentication ────────────────────────────────────────────

#[test]
fn keyed_sensor_is_challenged_before_download() {
    let mut io = MockGateway::new();
    io.aes_key = KEY;
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), io);
    connect_sensor(&mut svc, &mut io, &mut ev);
    assert_eq!(svc.state(), SensorState::ChallengeReq);
    assert!(contains(&io.smp_writes[0], b"/sys/challenge.bin"));

    // 64-byte challenge delivered in two reads.
    let challenge = [0x5Au8; 64];
    svc.handle_event(chunk(0, &challenge[..32], Some(64)), &mut io, &mut ev);
    assert_eq!(io.smp_writes.len(), 2, "second challenge read");
    assert_eq!(svc.state(), SensorState::ChallengeReq);
    svc.handle_event(chunk(32, &challenge[32..], None), &mut io, &mut ev);

    assert_eq!(svc.state(), SensorState::ChallengeRsp);
    let write = io.last_request().expect("challenge response written");
    assert_eq!(write.op, MGMT_OP_WRITE);
    assert!(contains(&io.smp_writes[2], b"/sys/challenge_rsp.bin"));

    svc.handle_event(GatewayEvent::SmpNotify(Some(write_rsp(0))), &mut io, &mut ev);
    assert_eq!(svc.state(), SensorState::LogDownload);
    assert_eq!(io.smp_writes.len(), 4);
    assert!(contains(&io.smp_writes[3], b"/log/ct"));
}

#[test]
fn sensor_without_auth_support_downloads_in_the_clear() {
    let mut io = MockGateway::new();
    io.aes_key = KEY;
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), io);
    connect_sensor(&mut svc, &mut io, &mut ev);

    let unknown = ct_gateway::smp::FileResponse {
        rc: 1,
        ..Default::default()
    };
    let frame = crate::mock_gateway::read_rsp(&unknown);
    svc.handle_event(GatewayEvent::SmpNotify(Some(frame)), &mut io, &mut ev);
    assert_eq!(svc.state(), SensorState::LogDownload);
    assert!(contains(io.smp_writes.last().unwrap(), b"/log/ct"));
}

#[test]
fn rejected_challenge_drops_the_link() {
    let mut io = MockGateway::new();
    io.aes_key = KEY;
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), io);
    connect_sensor(&mut svc, &mut io, &mut ev);
    svc.handle_event(chunk(0, &[1u8; 16], Some(16)), &mut io, &mut ev);
    assert_eq!(svc.state(), SensorState::ChallengeRsp);

    svc.handle_event(GatewayEvent::SmpNotify(Some(write_rsp(3))), &mut io, &mut ev);
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 1);
}

// ── Link end ──────────────────────────────────────────────────

#[test]
fn disconnect_tears_down_and_rescans() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_sensor(&mut svc, &mut io, &mut ev);

    svc.handle_command(GatewayCommand::DisconnectSensor, &mut io, &mut ev);
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 1);
    assert!(svc.is_connected_to_sensor(), "link held until the stack reports");

    svc.handle_event(
        ble(LinkEvent::Disconnected {
            conn: SENSOR,
            reason: 0x16,
        }),
        &mut io,
        &mut ev,
    );
    assert_eq!(svc.state(), SensorState::FindingDevice);
    assert!(!svc.is_connected_to_sensor());
    assert!(!svc.log_transfer_active());
    assert_eq!(io.count(&RadioCall::Release(SENSOR)), 1);
    assert_eq!(io.count(&RadioCall::StartScan), 2);
    assert_eq!(io.last_led(), Some(LedIndication::Searching));
    assert!(ev.contains(&CtEvent::StateChanged {
        from: SensorState::LogDownload,
        to: SensorState::FindingDevice,
    }));
}

#[test]
fn failed_disconnect_still_tears_down() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_sensor(&mut svc, &mut io, &mut ev);
    io.fail_disconnect = true;

    svc.handle_command(GatewayCommand::DisconnectSensor, &mut io, &mut ev);
    assert_eq!(svc.state(), SensorState::FindingDevice);
    assert!(!svc.is_connected_to_sensor());
    assert_eq!(io.count(&RadioCall::Release(SENSOR)), 1);
}

#[test]
fn refused_connection_returns_to_scanning() {
    let mut io = MockGateway::new();
    io.fail_connect = true;
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), io);
    svc.handle_event(sensor_advert(FLAG_HAS_LOG_DATA, AdvType::Ind), &mut io, &mut ev);
    assert!(!svc.is_connected_to_sensor());
    assert_eq!(svc.state(), SensorState::FindingDevice);
    assert_eq!(io.count(&RadioCall::StartScan), 2);
}

#[test]
fn failed_connection_status_tears_down() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    svc.handle_event(sensor_advert(FLAG_HAS_LOG_DATA, AdvType::Ind), &mut io, &mut ev);
    svc.handle_event(
        ble(LinkEvent::Connected {
            conn: SENSOR,
            status: 0x3E,
        }),
        &mut io,
        &mut ev,
    );
    assert!(!svc.is_connected_to_sensor());
    assert_eq!(svc.num_connections(), 0);
    assert_eq!(io.count(&RadioCall::StartScan), 2);
}

#[test]
fn discovery_failure_disconnects() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    svc.handle_event(sensor_advert(FLAG_HAS_LOG_DATA, AdvType::Ind), &mut io, &mut ev);
    svc.handle_event(
        ble(LinkEvent::Connected {
            conn: SENSOR,
            status: 0,
        }),
        &mut io,
        &mut ev,
    );
    svc.handle_event(ble(LinkEvent::MtuExchanged { ok: true }), &mut io, &mut ev);
    svc.handle_event(ble(LinkEvent::ServiceDiscovered { ok: false }), &mut io, &mut ev);
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 1);
    assert_eq!(io.count(&RadioCall::DiscoverCharacteristic), 0);
}

#[test]
fn connect_timeout_disconnects() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    svc.handle_event(sensor_advert(FLAG_HAS_LOG_DATA, AdvType::Ind), &mut io, &mut ev);

    io.now = 9_999;
    svc.poll(&mut io, &mut ev);
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 0);

    io.now = 10_000;
    svc.poll(&mut io, &mut ev);
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 1);
}

#[test]
fn unanswered_smp_request_times_out() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_sensor(&mut svc, &mut io, &mut ev);
    io.now = 10_000;
    svc.poll(&mut io, &mut ev);
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 1);
}

#[test]
fn silent_link_is_dropped_by_inactivity_watchdog() {
    let config = GatewayConfig {
        smp_timeout_secs: 1_000,
        ..GatewayConfig::default()
    };
    let (mut svc, mut io, mut ev) = gateway(config, MockGateway::new());
    connect_sensor(&mut svc, &mut io, &mut ev);

    for now in [60_000, 120_000] {
        io.now = now;
        svc.poll(&mut io, &mut ev);
    }
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 0);

    io.now = 180_000;
    svc.poll(&mut io, &mut ev);
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 1);
}

#[test]
fn adverts_hold_off_the_reboot_watchdog() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    io.cloud_ready = false;
    io.now = 3_000_000;
    svc.handle_event(sensor_advert(0, AdvType::Ind), &mut io, &mut ev);

    io.now = 3_600_000;
    svc.poll(&mut io, &mut ev);
    assert!(io.reboots.is_empty());

    io.now = 6_600_000;
    svc.poll(&mut io, &mut ev);
    assert_eq!(io.reboots, vec![1_000]);
    assert!(ev.contains(&CtEvent::Rebooting {
        delay_ms: 1_000,
        reason: "no advertisements",
    }));
}
