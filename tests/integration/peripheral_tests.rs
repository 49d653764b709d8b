//! Peripheral role: advertising modes, central connections and settings
//! written by a central over SMP.

use ct_gateway::app::commands::GatewayCommand;
use ct_gateway::app::events::{CtEvent, GatewayEvent};
use ct_gateway::central::{ConnHandle, LedIndication, LinkEvent, SensorState};
use ct_gateway::config::GatewayConfig;
use ct_gateway::peripheral::AdvMode;
use ct_gateway::peripheral::intercept::{NV_AES_KEY_FILE, NV_NETWORK_ID_FILE, NV_TOPIC_PREFIX_FILE};
use ct_gateway::smp::cbor::encode_file_write;
use ct_gateway::smp::header::encode_frame;
use ct_gateway::smp::{
    FS_MGMT_ID_FILE, FileResponse, MGMT_GROUP_ID_FS, MGMT_OP_WRITE, MGMT_OP_WRITE_RSP,
    SMP_HEADER_SIZE, SmpHeader,
};

use crate::mock_gateway::{
    Events, GATEWAY_ID, Gateway, MockGateway, RadioCall, ble, connect_sensor, gateway,
};

const PHONE: ConnHandle = ConnHandle(5);

fn connect_phone(svc: &mut Gateway, io: &mut MockGateway, ev: &mut Events) {
    svc.handle_event(
        ble(LinkEvent::Connected {
            conn: PHONE,
            status: 0,
        }),
        io,
        ev,
    );
}

fn upload(conn: ConnHandle, name: &str, data: &[u8]) -> GatewayEvent {
    let body = encode_file_write(name, 0, data, data.len() as u32).expect("encode upload");
    GatewayEvent::SmpRequest {
        conn,
        frame: encode_frame(MGMT_OP_WRITE, MGMT_GROUP_ID_FS, FS_MGMT_ID_FILE, 9, &body),
    }
}

/// `(rc, off)` of the last reply sent to the phone.
fn reply(io: &MockGateway) -> (i32, u32) {
    let frame = io.last_response().expect("reply sent");
    let hdr = SmpHeader::parse(frame).unwrap();
    assert_eq!(hdr.op, MGMT_OP_WRITE_RSP);
    assert_eq!(hdr.seq, 9, "reply echoes the request sequence");
    let rsp = FileResponse::decode(&frame[SMP_HEADER_SIZE..], 512).unwrap();
    (rsp.rc, rsp.off)
}

// ── Advertising ───────────────────────────────────────────────

#[test]
fn init_advertises_stored_identity() {
    let mut io = MockGateway::new();
    io.network_id = Some(0x0042);
    io.topic_prefix = Some(heapless::String::try_from("acme/gw/").unwrap());
    let (svc, io, ev) = gateway(GatewayConfig::default(), io);

    assert_eq!(svc.network_id(), 0x0042);
    assert_eq!(svc.topics().up(), format!("acme/gw/{GATEWAY_ID}/up"));
    assert_eq!(io.count(&RadioCall::StartAdvertising(AdvMode::NonConnectable)), 1);
    assert_eq!(io.last_led(), Some(LedIndication::Searching));
    assert!(ev.contains(&CtEvent::Started {
        network_id: 0x0042,
        commissioned: true,
    }));
}

#[test]
fn button_opens_connectable_window() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    svc.handle_command(GatewayCommand::Button, &mut io, &mut ev);
    assert_eq!(svc.adv_mode(), AdvMode::Connectable);
    assert_eq!(io.count(&RadioCall::StartAdvertising(AdvMode::Connectable)), 1);
    assert_eq!(io.last_led(), Some(LedIndication::SearchingConnectable));
    assert!(ev.contains(&CtEvent::AdvertisingChanged(AdvMode::Connectable)));

    io.now = 59_999;
    svc.poll(&mut io, &mut ev);
    assert_eq!(svc.adv_mode(), AdvMode::Connectable);

    io.now = 60_000;
    svc.poll(&mut io, &mut ev);
    assert_eq!(svc.adv_mode(), AdvMode::NonConnectable);
    assert_eq!(io.last_led(), Some(LedIndication::Searching));
}

#[test]
fn button_during_sensor_link_keeps_connected_led() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_sensor(&mut svc, &mut io, &mut ev);
    svc.handle_command(GatewayCommand::Button, &mut io, &mut ev);
    assert_eq!(svc.adv_mode(), AdvMode::Connectable);
    assert_eq!(io.last_led(), Some(LedIndication::Connected));
}

#[test]
fn advertisement_refresh_carries_epoch_and_network_id() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    svc.handle_command(GatewayCommand::SetNetworkId(0x1A2B), &mut io, &mut ev);
    assert_eq!(io.network_id, Some(0x1A2B));
    assert!(ev.contains(&CtEvent::NetworkIdChanged(0x1A2B)));

    io.now = 1_000;
    svc.poll(&mut io, &mut ev);
    let updates: Vec<&Vec<u8>> = io
        .calls
        .iter()
        .filter_map(|c| match c {
            RadioCall::UpdateAdvertising(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 2, "one on the change, one on the tick");
    let payload = updates[1];
    // flags AD (3) + len/type (2) → manufacturer data
    let mfg = &payload[5..];
    assert_eq!(&mfg[4..6], &0x1A2Bu16.to_le_bytes());
    assert_eq!(&mfg[16..20], &io.epoch.to_le_bytes());
}

#[test]
fn network_id_not_stored_is_not_applied() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    io.fail_storage = true;
    svc.handle_command(GatewayCommand::SetNetworkId(0x0007), &mut io, &mut ev);
    assert_eq!(svc.network_id(), 0xFFFF);
    assert!(!ev.contains(&CtEvent::NetworkIdChanged(0x0007)));
}

#[test]
fn uncommissioned_gateway_does_not_refresh() {
    let mut io = MockGateway::new();
    io.commissioned = false;
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), io);
    io.now = 5_000;
    svc.poll(&mut io, &mut ev);
    assert!(
        !io.calls
            .iter()
            .any(|c| matches!(c, RadioCall::UpdateAdvertising(_)))
    );
}

// ── Central connections ───────────────────────────────────────

#[test]
fn central_connection_is_not_a_sensor() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    svc.handle_command(GatewayCommand::Button, &mut io, &mut ev);
    connect_phone(&mut svc, &mut io, &mut ev);

    assert!(svc.is_connected_to_central());
    assert!(!svc.is_connected_to_sensor());
    assert_eq!(svc.state(), SensorState::FindingDevice);
    assert_eq!(svc.adv_mode(), AdvMode::NonConnectable);
    assert!(ev.contains(&CtEvent::CentralConnected(PHONE)));

    // Window already closed by the connection.
    io.now = 60_000;
    let starts = io.count(&RadioCall::StartAdvertising(AdvMode::NonConnectable));
    svc.poll(&mut io, &mut ev);
    assert_eq!(
        io.count(&RadioCall::StartAdvertising(AdvMode::NonConnectable)),
        starts
    );

    // Button is ignored while a central is connected.
    svc.handle_command(GatewayCommand::Button, &mut io, &mut ev);
    assert_eq!(svc.adv_mode(), AdvMode::NonConnectable);

    svc.handle_event(
        ble(LinkEvent::Disconnected {
            conn: PHONE,
            reason: 0x13,
        }),
        &mut io,
        &mut ev,
    );
    assert!(!svc.is_connected_to_central());
    assert!(ev.contains(&CtEvent::CentralDisconnected(PHONE)));
}

#[test]
fn failed_central_connection_is_ignored() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    svc.handle_event(
        ble(LinkEvent::Connected {
            conn: PHONE,
            status: 0x3E,
        }),
        &mut io,
        &mut ev,
    );
    assert!(!svc.is_connected_to_central());
}

// ── Settings over SMP ─────────────────────────────────────────

#[test]
fn central_sets_network_id() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_phone(&mut svc, &mut io, &mut ev);

    svc.handle_event(upload(PHONE, NV_NETWORK_ID_FILE, b" 1a2b\n"), &mut io, &mut ev);
    assert_eq!(reply(&io), (0, 6));
    assert_eq!(io.network_id, Some(0x1A2B));
    assert_eq!(svc.network_id(), 0x1A2B);
}

#[test]
fn bad_network_id_text_is_rejected() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_phone(&mut svc, &mut io, &mut ev);

    svc.handle_event(upload(PHONE, NV_NETWORK_ID_FILE, b"zz"), &mut io, &mut ev);
    assert_eq!(reply(&io), (3, 2));
    assert_eq!(io.network_id, None);
    assert_eq!(svc.network_id(), 0xFFFF);
}

#[test]
fn central_sets_aes_key_for_next_sensor() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_phone(&mut svc, &mut io, &mut ev);

    let key = *b"0011223344556677";
    svc.handle_event(upload(PHONE, NV_AES_KEY_FILE, &key), &mut io, &mut ev);
    assert_eq!(reply(&io), (0, 16));
    assert_eq!(io.aes_key, key);

    connect_sensor(&mut svc, &mut io, &mut ev);
    assert_eq!(svc.state(), SensorState::ChallengeReq);
}

#[test]
fn short_aes_key_is_rejected() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_phone(&mut svc, &mut io, &mut ev);
    svc.handle_event(upload(PHONE, NV_AES_KEY_FILE, &[1; 8]), &mut io, &mut ev);
    assert_eq!(reply(&io).0, 3);
}

#[test]
fn central_sets_topic_prefix() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_phone(&mut svc, &mut io, &mut ev);

    svc.handle_event(upload(PHONE, NV_TOPIC_PREFIX_FILE, b"acme/prod/gw/\n"), &mut io, &mut ev);
    assert_eq!(reply(&io).0, 0);
    assert_eq!(io.topic_prefix.as_deref(), Some("acme/prod/gw/"));
    assert_eq!(svc.topics().up(), format!("acme/prod/gw/{GATEWAY_ID}/up"));
}

#[test]
fn storage_failure_is_reported() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_phone(&mut svc, &mut io, &mut ev);
    io.fail_storage = true;

    svc.handle_event(upload(PHONE, NV_NETWORK_ID_FILE, b"12"), &mut io, &mut ev);
    assert_eq!(reply(&io).0, 3);
    assert_eq!(svc.network_id(), 0xFFFF);
}

#[test]
fn unknown_file_and_oversized_upload_are_rejected() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_phone(&mut svc, &mut io, &mut ev);

    svc.handle_event(upload(PHONE, "/nv/other.txt", b"1"), &mut io, &mut ev);
    assert_eq!(reply(&io).0, 3);

    svc.handle_event(upload(PHONE, NV_NETWORK_ID_FILE, &[b'1'; 511]), &mut io, &mut ev);
    assert_eq!(reply(&io), (3, 511));
    assert_eq!(io.network_id, None);
}

#[test]
fn request_from_unknown_connection_is_dropped() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_phone(&mut svc, &mut io, &mut ev);

    svc.handle_event(upload(ConnHandle(9), NV_NETWORK_ID_FILE, b"12"), &mut io, &mut ev);
    assert!(io.last_response().is_none());
    assert_eq!(io.network_id, None);
}
