//! Store-and-forward: entries the cloud did not take are stashed during
//! the download and republished by the drain once the sensor is gone.

use ct_gateway::app::commands::GatewayCommand;
use ct_gateway::app::events::CtEvent;
use ct_gateway::central::scan::FLAG_HAS_LOG_DATA;
use ct_gateway::central::{AdvType, DrainReset, IgnoreReason, LinkEvent};
use ct_gateway::config::GatewayConfig;
use ct_gateway::datalog::{ENTRY_PROTOCOL_V2, PUBLISH_HEADER_SIZE, PublishHeader};

use crate::mock_gateway::{
    EPOCH, Events, Gateway, MockGateway, MockPublisher, RadioCall, SENSOR, SENSOR_ADDR, ble,
    chunk, connect_sensor, gateway, gateway_with, log_header, sensor_advert, v2_entry,
};

/// Download `entries` from a sensor, then let the link go down.
fn download(svc: &mut Gateway, io: &mut MockGateway, ev: &mut Events, entries: &[Vec<u8>]) {
    connect_sensor(svc, io, ev);
    let header = log_header(ENTRY_PROTOCOL_V2, 0, entries.len() as u16);
    let body = entries.concat();
    let file_size = (header.len() + body.len()) as u32;
    svc.handle_event(chunk(0, &header, Some(file_size)), io, ev);
    svc.handle_event(chunk(header.len() as u32, &body, None), io, ev);
    svc.handle_event(
        ble(LinkEvent::Disconnected {
            conn: SENSOR,
            reason: 0x16,
        }),
        io,
        ev,
    );
}

fn two_entries() -> Vec<Vec<u8>> {
    vec![v2_entry(1_650_000_100, 2), v2_entry(1_650_000_200, 1)]
}

#[test]
fn failed_publish_stashes_rest_and_drain_republishes() {
    let (mut svc, mut io, mut ev) =
        gateway_with(GatewayConfig::default(), MockGateway::new(), MockPublisher::failing(1));
    let entries = two_entries();
    download(&mut svc, &mut io, &mut ev, &entries);

    assert_eq!(svc.publisher().sent.len(), 1, "second entry never submitted");
    assert_eq!(ev.count(|e| matches!(e, CtEvent::EntryStashed { .. })), 2);
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 1);
    assert!(svc.stash().is_available());
    assert_eq!(svc.stash().entry_count(), 2);

    // A pending stash keeps the gateway away from new sensors.
    svc.handle_event(sensor_advert(FLAG_HAS_LOG_DATA, AdvType::Ind), &mut io, &mut ev);
    assert_eq!(io.count(&RadioCall::Connect(SENSOR_ADDR)), 1);

    io.epoch = EPOCH + 600;
    for _ in 0..2 {
        svc.poll(&mut io, &mut ev);
    }
    assert!(!ev.contains(&CtEvent::StashDrained));
    svc.poll(&mut io, &mut ev);
    assert!(ev.contains(&CtEvent::StashDrained));

    let sent = &svc.publisher().sent;
    assert_eq!(sent.len(), 3);
    for ((_, payload), entry) in sent[1..].iter().zip(&entries) {
        let hdr = PublishHeader::parse(payload).unwrap();
        assert_eq!(hdr.device_time, EPOCH + 600, "restamped at drain time");
        assert_eq!(&payload[PUBLISH_HEADER_SIZE..], &entry[..entry.len() - 2]);
    }
    assert!(!svc.stash().is_available());
    assert!(svc.stash().is_empty());
    assert!(!svc.publisher().is_held());
}

#[test]
fn drain_waits_for_cloud_and_idle_link() {
    let (mut svc, mut io, mut ev) =
        gateway_with(GatewayConfig::default(), MockGateway::new(), MockPublisher::failing(1));
    download(&mut svc, &mut io, &mut ev, &two_entries());

    io.cloud_ready = false;
    svc.poll(&mut io, &mut ev);
    svc.poll(&mut io, &mut ev);
    assert_eq!(svc.publisher().sent.len(), 1);
    assert!(svc.stash().is_available());

    io.cloud_ready = true;
    for _ in 0..3 {
        svc.poll(&mut io, &mut ev);
    }
    assert_eq!(svc.publisher().sent.len(), 3);
}

#[test]
fn stashed_entries_block_scanning_for_sensors() {
    let config = GatewayConfig {
        adv_log_filter_cnt: 1,
        ..GatewayConfig::default()
    };
    let (mut svc, mut io, mut ev) =
        gateway_with(config, MockGateway::new(), MockPublisher::failing(1));
    download(&mut svc, &mut io, &mut ev, &two_entries());

    svc.handle_event(sensor_advert(FLAG_HAS_LOG_DATA, AdvType::Ind), &mut io, &mut ev);
    assert!(ev.contains(&CtEvent::AdIgnored {
        reason: IgnoreReason::StashPending,
        all_ads: 2,
    }));
}

#[test]
fn buffer_never_free_resets_stash() {
    let config = GatewayConfig {
        stash_failure_max: 2,
        ..GatewayConfig::default()
    };
    let mut publisher = MockPublisher::new();
    publisher.acquire_ok = false;
    let (mut svc, mut io, mut ev) = gateway_with(config, MockGateway::new(), publisher);
    download(&mut svc, &mut io, &mut ev, &two_entries());

    // Nothing could even be submitted; both entries went to the stash.
    assert!(svc.publisher().sent.is_empty());
    assert_eq!(svc.stash().entry_count(), 2);

    svc.poll(&mut io, &mut ev);
    svc.poll(&mut io, &mut ev);
    assert!(svc.stash().is_available());
    svc.poll(&mut io, &mut ev);
    assert!(ev.contains(&CtEvent::StashReset(DrainReset::AcquireTimeouts)));
    assert!(!svc.stash().is_available());
}

#[test]
fn poison_entry_triggers_reboot() {
    let config = GatewayConfig {
        stash_failure_max: 2,
        reboot_delay_ms: 500,
        ..GatewayConfig::default()
    };
    let (mut svc, mut io, mut ev) =
        gateway_with(config, MockGateway::new(), MockPublisher::failing(4));
    download(&mut svc, &mut io, &mut ev, &[v2_entry(1_650_000_100, 2)]);

    for _ in 0..3 {
        svc.poll(&mut io, &mut ev);
    }
    assert!(io.reboots.is_empty());
    svc.poll(&mut io, &mut ev);
    assert_eq!(io.reboots, vec![500]);
    assert!(ev.contains(&CtEvent::Rebooting {
        delay_ms: 500,
        reason: "stash publish failures",
    }));
}

#[test]
fn dummy_publish_goes_to_up_topic() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    svc.handle_command(GatewayCommand::PublishDummyData, &mut io, &mut ev);

    let sent = &svc.publisher().sent;
    assert_eq!(sent.len(), 1);
    let (topic, payload) = &sent[0];
    assert!(topic.ends_with("/up"));
    assert_eq!(payload.len(), PUBLISH_HEADER_SIZE + 22);
    let hdr = PublishHeader::parse(payload).unwrap();
    assert_eq!(hdr.device_id, [0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    assert_eq!(hdr.device_time, EPOCH);
    assert_eq!(hdr.fw_version, [1, 2, 3, 0]);
    assert!(ev.contains(&CtEvent::EntryPublished { size: 22 }));

    io.cloud_ready = false;
    svc.handle_command(GatewayCommand::PublishDummyData, &mut io, &mut ev);
    assert_eq!(svc.publisher().sent.len(), 1);
}
