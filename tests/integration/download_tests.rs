//! Log download through the gateway: header chunk, entry chunks for both
//! log versions, the encrypted variant and what gets published.

use ct_gateway::app::commands::GatewayCommand;
use ct_gateway::app::events::{CtEvent, GatewayEvent};
use ct_gateway::central::SensorState;
use ct_gateway::config::GatewayConfig;
use ct_gateway::crypto;
use ct_gateway::datalog::{
    ENTRY_PROTOCOL_V1, ENTRY_PROTOCOL_V2, PUBLISH_HEADER_SIZE, PublishHeader,
};
use ct_gateway::smp::header::encode_frame;
use ct_gateway::smp::{MGMT_GROUP_ID_OS, MGMT_OP_WRITE, MGMT_OP_WRITE_RSP, OS_MGMT_ID_ECHO};

use crate::mock_gateway::{
    EPOCH, GATEWAY_ID, MockGateway, RadioCall, SENSOR, chunk, connect_sensor, gateway,
    log_header, v1_entry, v2_entry, write_rsp,
};

const KEY: [u8; 16] = *b"fedcba9876543210";
const IV: [u8; 16] = [0x3C; 16];

fn up_topic() -> String {
    format!("mg100-ct/dev/gw/{GATEWAY_ID}/up")
}

/// Zero-pad to the AES block size and encrypt as the sensor does.
fn seal(plain: &[u8]) -> Vec<u8> {
    let mut padded = plain.to_vec();
    padded.resize(plain.len().div_ceil(16) * 16, 0);
    let mut out = vec![0u8; padded.len() + 16];
    let n = crypto::encrypt_cbc_with_iv(&KEY, &IV, &padded, &mut out).expect("encrypt");
    out.truncate(n);
    out
}

#[test]
fn v2_log_is_published_entry_by_entry() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_sensor(&mut svc, &mut io, &mut ev);

    let header = log_header(ENTRY_PROTOCOL_V2, 0, 2);
    let e1 = v2_entry(1_650_000_100, 2);
    let e2 = v2_entry(1_650_000_200, 3);
    let file_size = (header.len() + e1.len() + e2.len()) as u32;

    svc.handle_event(chunk(0, &header, Some(file_size)), &mut io, &mut ev);
    assert!(svc.is_publishing_log());
    assert_eq!(svc.num_download_starts(), 1);
    assert_eq!(io.smp_writes.len(), 2, "second read requested");
    assert!(ev.contains(&CtEvent::DownloadStarted {
        version: ENTRY_PROTOCOL_V2,
        file_size,
    }));

    let body = [e1.clone(), e2.clone()].concat();
    svc.handle_event(chunk(header.len() as u32, &body, None), &mut io, &mut ev);

    let sent = &svc.publisher().sent;
    assert_eq!(sent.len(), 2);
    for ((topic, payload), entry) in sent.iter().zip([&e1, &e2]) {
        assert_eq!(topic, &up_topic());
        // CRC trailer stays behind.
        assert_eq!(&payload[PUBLISH_HEADER_SIZE..], &entry[..entry.len() - 2]);
        let hdr = PublishHeader::parse(payload).unwrap();
        assert_eq!(hdr.version, ENTRY_PROTOCOL_V2);
        assert_eq!(hdr.device_id, [0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6]);
        assert_eq!(hdr.device_time, EPOCH);
        assert_eq!(hdr.last_upload_time, 1_599_000_000);
        assert_eq!(hdr.fw_version, [2, 0, 7, 0]);
        assert_eq!(hdr.battery_level, 87);
        assert_eq!(hdr.network_id, 1);
    }

    assert!(ev.contains(&CtEvent::DownloadCompleted {
        entries: 2,
        records: 5,
    }));
    assert_eq!(svc.num_download_completions(), 1);
    assert!(!svc.is_publishing_log());
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 1);
    assert!(svc.stash().is_empty());
    assert!(!svc.stash().is_available());
}

#[test]
fn v1_entries_straddling_chunks_are_reassembled_and_trimmed() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_sensor(&mut svc, &mut io, &mut ev);

    let header = log_header(ENTRY_PROTOCOL_V1, 64, 2);
    let entries = [v1_entry(64, 1_650_000_000, 2), v1_entry(64, 1_650_000_060, 2)].concat();
    let file_size = (header.len() + entries.len()) as u32;
    let split = 40;

    svc.handle_event(chunk(0, &header, Some(file_size)), &mut io, &mut ev);
    let off = header.len() as u32;
    svc.handle_event(chunk(off, &entries[..split], None), &mut io, &mut ev);
    assert!(svc.publisher().sent.is_empty(), "no whole entry yet");
    assert_eq!(svc.state(), SensorState::LogDownload);

    svc.handle_event(
        chunk(off + split as u32, &entries[split..], None),
        &mut io,
        &mut ev,
    );
    let sent = &svc.publisher().sent;
    assert_eq!(sent.len(), 2);
    for (_, payload) in sent {
        // Header plus two rssi records; 0xFF filler is cut.
        assert_eq!(payload.len(), PUBLISH_HEADER_SIZE + 16 + 8);
        let hdr = PublishHeader::parse(payload).unwrap();
        assert_eq!(hdr.version, ENTRY_PROTOCOL_V1);
        assert_eq!(hdr.fw_version, [0; 4]);
        assert_eq!(hdr.battery_level, 0);
        assert_eq!(hdr.device_time, EPOCH);
    }
    assert!(ev.contains(&CtEvent::DownloadCompleted {
        entries: 2,
        records: 4,
    }));
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 1);
}

#[test]
fn header_only_log_means_nothing_to_do() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_sensor(&mut svc, &mut io, &mut ev);

    let header = log_header(ENTRY_PROTOCOL_V2, 0, 0);
    svc.handle_event(chunk(0, &header, Some(header.len() as u32)), &mut io, &mut ev);
    assert_eq!(svc.num_download_starts(), 0);
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 1);
    assert!(svc.publisher().sent.is_empty());
}

#[test]
fn corrupt_v2_entry_aborts_download() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_sensor(&mut svc, &mut io, &mut ev);

    let header = log_header(ENTRY_PROTOCOL_V2, 0, 1);
    let mut e1 = v2_entry(1_650_000_100, 2);
    e1[20] ^= 0x01;
    let file_size = (header.len() + e1.len()) as u32;

    svc.handle_event(chunk(0, &header, Some(file_size)), &mut io, &mut ev);
    svc.handle_event(chunk(header.len() as u32, &e1, None), &mut io, &mut ev);
    assert!(svc.publisher().sent.is_empty());
    assert_eq!(svc.num_download_completions(), 0);
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 1);
}

#[test]
fn cloud_loss_mid_download_stashes_and_drops_link() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_sensor(&mut svc, &mut io, &mut ev);

    let header = log_header(ENTRY_PROTOCOL_V2, 0, 2);
    let e1 = v2_entry(1_650_000_100, 1);
    let e2 = v2_entry(1_650_000_200, 2);
    let file_size = (header.len() + e1.len() + e2.len()) as u32;
    svc.handle_event(chunk(0, &header, Some(file_size)), &mut io, &mut ev);
    io.cloud_ready = false;
    svc.handle_event(chunk(header.len() as u32, &e1, None), &mut io, &mut ev);

    assert!(svc.publisher().sent.is_empty());
    assert!(svc.stash().is_available());
    assert_eq!(svc.stash().entry_count(), 1);
    assert_eq!(
        svc.stash().len(),
        PUBLISH_HEADER_SIZE + e1.len() - 2,
        "stashed without its CRC"
    );
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), 1);
}

#[test]
fn v1_final_chunk_keeps_entry_after_corrupt_one() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_sensor(&mut svc, &mut io, &mut ev);

    let header = log_header(ENTRY_PROTOCOL_V1, 64, 2);
    let mut bad = v1_entry(64, 1_650_000_000, 2);
    bad[0x20] ^= 0x01;
    let good = v1_entry(64, 1_650_000_060, 2);
    let body = [bad, good].concat();
    let file_size = (header.len() + body.len()) as u32;

    svc.handle_event(chunk(0, &header, Some(file_size)), &mut io, &mut ev);
    svc.handle_event(chunk(header.len() as u32, &body, None), &mut io, &mut ev);

    assert_eq!(svc.publisher().sent.len(), 1);
    assert!(ev.contains(&CtEvent::DownloadCompleted {
        entries: 1,
        records: 2,
    }));
    assert_eq!(svc.num_download_completions(), 1);
}

#[test]
fn echo_round_trip_after_download() {
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), MockGateway::new());
    connect_sensor(&mut svc, &mut io, &mut ev);

    // Busy with the first download read.
    svc.handle_command(GatewayCommand::SendEcho(1), &mut io, &mut ev);
    assert_eq!(io.smp_writes.len(), 1);

    let header = log_header(ENTRY_PROTOCOL_V2, 0, 1);
    let e1 = v2_entry(1_650_000_100, 1);
    svc.handle_event(
        chunk(0, &header, Some((header.len() + e1.len()) as u32)),
        &mut io,
        &mut ev,
    );
    svc.handle_event(chunk(header.len() as u32, &e1, None), &mut io, &mut ev);

    svc.handle_command(GatewayCommand::SendEcho(7), &mut io, &mut ev);
    let req = io.last_request().expect("echo written");
    assert_eq!((req.op, req.group, req.id), (MGMT_OP_WRITE, MGMT_GROUP_ID_OS, OS_MGMT_ID_ECHO));
    let text = b"Echo message: 7";
    assert!(io.smp_writes.last().unwrap().windows(text.len()).any(|w| w == text));

    let mut enc = minicbor::Encoder::new(Vec::new());
    enc.map(1).unwrap().str("r").unwrap().str("Echo message: 7").unwrap();
    let body = enc.into_writer();
    let frame = encode_frame(MGMT_OP_WRITE_RSP, MGMT_GROUP_ID_OS, OS_MGMT_ID_ECHO, 0, &body);
    let disconnects = io.count(&RadioCall::Disconnect(SENSOR));
    svc.handle_event(GatewayEvent::SmpNotify(Some(frame)), &mut io, &mut ev);
    assert_eq!(io.count(&RadioCall::Disconnect(SENSOR)), disconnects);
}

#[test]
fn encrypted_download_is_decrypted_before_parsing() {
    let mut io = MockGateway::new();
    io.aes_key = KEY;
    let (mut svc, mut io, mut ev) = gateway(GatewayConfig::default(), io);
    connect_sensor(&mut svc, &mut io, &mut ev);

    svc.handle_event(chunk(0, &[0x42; 32], Some(32)), &mut io, &mut ev);
    svc.handle_event(GatewayEvent::SmpNotify(Some(write_rsp(0))), &mut io, &mut ev);
    assert_eq!(svc.state(), SensorState::LogDownload);

    // Plaintext sizes: header padded to 64, entries padded to 64.
    let header = log_header(ENTRY_PROTOCOL_V2, 0, 2);
    let entries = [v2_entry(1_650_000_100, 2), v2_entry(1_650_000_200, 2)].concat();
    let file_size = (header.len().div_ceil(16) * 16 + entries.len().div_ceil(16) * 16) as u32;
    assert_eq!(file_size, 128);

    svc.handle_event(chunk(0, &seal(&header), Some(file_size)), &mut io, &mut ev);
    assert_eq!(svc.num_download_starts(), 1);
    svc.handle_event(chunk(64, &seal(&entries), None), &mut io, &mut ev);

    let sent = &svc.publisher().sent;
    assert_eq!(sent.len(), 2);
    assert_eq!(&sent[0].1[PUBLISH_HEADER_SIZE..], &entries[..24]);
    assert!(ev.contains(&CtEvent::DownloadCompleted {
        entries: 2,
        records: 4,
    }));
    assert_eq!(svc.num_download_completions(), 1);
}
