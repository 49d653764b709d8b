//! Mock gateway I/O for integration tests.
//!
//! Records every radio call so tests can assert on the full command
//! history without a Bluetooth controller. Stack completions are never
//! generated here; each test feeds them in explicitly, which keeps the
//! order of events under the test's control.

use std::collections::VecDeque;

use core::time::Duration;

use ct_gateway::app::events::{CtEvent, GatewayEvent};
use ct_gateway::app::ports::{
    AdvertiserPort, BlePort, ClockPort, CloudStatus, EventSink, KeyStore, LedPort, StorageError,
    SystemPort,
};
use ct_gateway::app::service::{GatewayIdentity, GatewayService};
use ct_gateway::central::scan::{
    AD_FLAGS_GENERAL_NO_BREDR, AD_TYPE_FLAGS, AD_TYPE_MANUFACTURER_DATA, COMPANY_ID, CT_AD_SIZE,
    CtAdvertisement, PROTOCOL_ID_TRACKER,
};
use ct_gateway::central::{AdvReport, AdvType, BtAddr, ConnHandle, LedIndication, LinkEvent};
use ct_gateway::config::{GatewayConfig, TOPIC_PREFIX_MAX};
use ct_gateway::crypto::{AesKey, DISABLED_KEY};
use ct_gateway::datalog::entry::encode_entry;
use ct_gateway::datalog::{
    ENTRY_FLAGS_UNSENT, ENTRY_PROTOCOL_V2, ENTRY_START_BYTE, EntryHeader,
    LogHeader,
};
use ct_gateway::error::{BleError, CloudError};
use ct_gateway::peripheral::AdvMode;
use ct_gateway::publish::{PublishOutcome, PublishPort, PublishTicket};
use ct_gateway::smp::header::encode_frame;
use ct_gateway::smp::{
    FS_MGMT_ID_FILE, FileResponse, MGMT_GROUP_ID_FS, MGMT_OP_READ_RSP, MGMT_OP_WRITE_RSP,
    SmpHeader, SmpTransport,
};

pub const SENSOR: ConnHandle = ConnHandle(1);
pub const SENSOR_ADDR: BtAddr = BtAddr::public([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
pub const EPOCH: u32 = 1_700_000_000;
pub const GATEWAY_ID: &str = "354616090287629";

// ── Radio call record ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    StartScan,
    StopScan,
    Connect(BtAddr),
    Disconnect(ConnHandle),
    ExchangeMtu,
    DiscoverService,
    DiscoverCharacteristic,
    DiscoverCcc,
    Subscribe,
    Release(ConnHandle),
    StartAdvertising(AdvMode),
    StopAdvertising,
    UpdateAdvertising(Vec<u8>),
    SmpResponse(ConnHandle, Vec<u8>),
}

// ── MockGateway ───────────────────────────────────────────────

pub struct MockGateway {
    pub now: u64,
    pub epoch: u32,
    pub cloud_ready: bool,
    pub commissioned: bool,
    pub aes_key: AesKey,
    pub network_id: Option<u16>,
    pub topic_prefix: Option<heapless::String<TOPIC_PREFIX_MAX>>,
    /// Negotiated MTU while a sensor link exists.
    pub mtu: Option<usize>,
    pub fail_connect: bool,
    pub fail_disconnect: bool,
    pub fail_storage: bool,
    pub calls: Vec<RadioCall>,
    pub smp_writes: Vec<Vec<u8>>,
    pub leds: Vec<LedIndication>,
    pub reboots: Vec<u32>,
}

#[allow(dead_code)]
impl MockGateway {
    pub fn new() -> Self {
        Self {
            now: 0,
            epoch: EPOCH,
            cloud_ready: true,
            commissioned: true,
            aes_key: DISABLED_KEY,
            network_id: None,
            topic_prefix: None,
            mtu: None,
            fail_connect: false,
            fail_disconnect: false,
            fail_storage: false,
            calls: Vec::new(),
            smp_writes: Vec::new(),
            leds: Vec::new(),
            reboots: Vec::new(),
        }
    }

    pub fn count(&self, call: &RadioCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    pub fn last_led(&self) -> Option<LedIndication> {
        self.leds.last().copied()
    }

    /// Header of the most recent SMP request written to the sensor.
    pub fn last_request(&self) -> Option<SmpHeader> {
        self.smp_writes
            .last()
            .and_then(|f| SmpHeader::parse(f).ok())
    }

    pub fn last_response(&self) -> Option<&[u8]> {
        self.calls.iter().rev().find_map(|c| match c {
            RadioCall::SmpResponse(_, frame) => Some(frame.as_slice()),
            _ => None,
        })
    }

    fn storage(&self) -> Result<(), StorageError> {
        if self.fail_storage {
            Err(StorageError::IoError)
        } else {
            Ok(())
        }
    }
}

impl SmpTransport for MockGateway {
    fn smp_mtu(&self) -> Option<usize> {
        self.mtu
    }

    fn smp_write(&mut self, frame: &[u8]) -> Result<(), BleError> {
        if self.mtu.is_none() {
            return Err(BleError::NotConnected);
        }
        self.smp_writes.push(frame.to_vec());
        Ok(())
    }
}

impl BlePort for MockGateway {
    fn start_scan(&mut self) -> Result<(), BleError> {
        self.calls.push(RadioCall::StartScan);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), BleError> {
        self.calls.push(RadioCall::StopScan);
        Ok(())
    }

    fn connect(&mut self, addr: &BtAddr) -> Result<ConnHandle, BleError> {
        self.calls.push(RadioCall::Connect(*addr));
        if self.fail_connect {
            return Err(BleError::Stack(-1));
        }
        self.mtu = Some(247);
        Ok(SENSOR)
    }

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), BleError> {
        self.calls.push(RadioCall::Disconnect(conn));
        if self.fail_disconnect {
            return Err(BleError::Stack(-2));
        }
        Ok(())
    }

    fn exchange_mtu(&mut self, _conn: ConnHandle) -> Result<(), BleError> {
        self.calls.push(RadioCall::ExchangeMtu);
        Ok(())
    }

    fn discover_smp_service(&mut self, _conn: ConnHandle) -> Result<(), BleError> {
        self.calls.push(RadioCall::DiscoverService);
        Ok(())
    }

    fn discover_smp_characteristic(&mut self, _conn: ConnHandle) -> Result<(), BleError> {
        self.calls.push(RadioCall::DiscoverCharacteristic);
        Ok(())
    }

    fn discover_ccc(&mut self, _conn: ConnHandle) -> Result<(), BleError> {
        self.calls.push(RadioCall::DiscoverCcc);
        Ok(())
    }

    fn subscribe(&mut self, _conn: ConnHandle) -> Result<(), BleError> {
        self.calls.push(RadioCall::Subscribe);
        Ok(())
    }

    fn release(&mut self, conn: ConnHandle) {
        self.mtu = None;
        self.calls.push(RadioCall::Release(conn));
    }
}

impl AdvertiserPort for MockGateway {
    fn start_advertising(&mut self, mode: AdvMode, _payload: &[u8]) -> Result<(), BleError> {
        self.calls.push(RadioCall::StartAdvertising(mode));
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), BleError> {
        self.calls.push(RadioCall::StopAdvertising);
        Ok(())
    }

    fn update_advertising(&mut self, payload: &[u8]) -> Result<(), BleError> {
        self.calls.push(RadioCall::UpdateAdvertising(payload.to_vec()));
        Ok(())
    }

    fn send_smp_response(&mut self, conn: ConnHandle, frame: &[u8]) -> Result<(), BleError> {
        self.calls.push(RadioCall::SmpResponse(conn, frame.to_vec()));
        Ok(())
    }
}

impl ClockPort for MockGateway {
    fn uptime_ms(&self) -> u64 {
        self.now
    }

    fn epoch(&self) -> u32 {
        self.epoch
    }
}

impl KeyStore for MockGateway {
    fn aes_key(&self) -> AesKey {
        self.aes_key
    }

    fn set_aes_key(&mut self, key: &AesKey) -> Result<(), StorageError> {
        self.storage()?;
        self.aes_key = *key;
        Ok(())
    }

    fn network_id(&self) -> Option<u16> {
        self.network_id
    }

    fn set_network_id(&mut self, id: u16) -> Result<(), StorageError> {
        self.storage()?;
        self.network_id = Some(id);
        Ok(())
    }

    fn topic_prefix(&self) -> Option<heapless::String<TOPIC_PREFIX_MAX>> {
        self.topic_prefix.clone()
    }

    fn set_topic_prefix(&mut self, prefix: &str) -> Result<(), StorageError> {
        self.storage()?;
        let prefix = heapless::String::try_from(prefix).map_err(|_| StorageError::Invalid)?;
        self.topic_prefix = Some(prefix);
        Ok(())
    }

    fn commissioned(&self) -> bool {
        self.commissioned
    }
}

impl CloudStatus for MockGateway {
    fn ready_for_publish(&self) -> bool {
        self.cloud_ready
    }
}

impl LedPort for MockGateway {
    fn indicate(&mut self, indication: LedIndication) {
        self.leds.push(indication);
    }
}

impl SystemPort for MockGateway {
    fn reboot(&mut self, delay_ms: u32) {
        self.reboots.push(delay_ms);
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct Events(pub Vec<CtEvent>);

#[allow(dead_code)]
impl Events {
    pub fn contains(&self, event: &CtEvent) -> bool {
        self.0.contains(event)
    }

    pub fn count(&self, pred: impl Fn(&CtEvent) -> bool) -> usize {
        self.0.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for Events {
    fn emit(&mut self, event: &CtEvent) {
        self.0.push(event.clone());
    }
}

// ── Publisher ─────────────────────────────────────────────────

/// Resolves every publish at submit time from a script; an empty script
/// means success.
pub struct MockPublisher {
    pub acquire_ok: bool,
    pub script: VecDeque<PublishOutcome>,
    pub sent: Vec<(String, Vec<u8>)>,
    held: bool,
}

#[allow(dead_code)]
impl MockPublisher {
    pub fn new() -> Self {
        Self {
            acquire_ok: true,
            script: VecDeque::new(),
            sent: Vec::new(),
            held: false,
        }
    }

    pub fn failing(n: usize) -> Self {
        let mut p = Self::new();
        p.script.extend(std::iter::repeat_n(PublishOutcome::Fail, n));
        p
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl PublishPort for MockPublisher {
    fn acquire(&mut self, _timeout: Duration) -> bool {
        if self.acquire_ok {
            self.held = true;
        }
        self.acquire_ok
    }

    fn release(&mut self) {
        self.held = false;
    }

    fn submit(
        &mut self,
        topic: &str,
        header: &[u8],
        entry: &[u8],
    ) -> Result<PublishTicket, CloudError> {
        if !std::mem::take(&mut self.held) {
            return Err(CloudError::Timeout);
        }
        self.sent.push((topic.to_string(), [header, entry].concat()));
        let ticket = PublishTicket::new();
        ticket.complete(self.script.pop_front().unwrap_or(PublishOutcome::Success));
        Ok(ticket)
    }

    fn wait(&mut self, ticket: &PublishTicket, _timeout: Duration) -> Option<PublishOutcome> {
        ticket.try_take()
    }
}

// ── Builders ──────────────────────────────────────────────────

pub fn identity() -> GatewayIdentity {
    GatewayIdentity {
        id: GATEWAY_ID.into(),
        addr: [0x11, 0x22, 0x33, 0x44, 0x55, 0x66],
        fw_version: GatewayIdentity::fw_version_bytes(1, 2, 3),
    }
}

pub type Gateway = GatewayService<MockPublisher>;

/// An initialised gateway over a fresh mock.
#[allow(dead_code)]
pub fn gateway(config: GatewayConfig, io: MockGateway) -> (Gateway, MockGateway, Events) {
    gateway_with(config, io, MockPublisher::new())
}

pub fn gateway_with(
    config: GatewayConfig,
    mut io: MockGateway,
    publisher: MockPublisher,
) -> (Gateway, MockGateway, Events) {
    let mut svc = GatewayService::new(config, publisher, identity());
    let mut ev = Events::default();
    svc.init(&mut io, &mut ev);
    (svc, io, ev)
}

/// Raw AD structures of a contact tracing sensor advertisement.
pub fn sensor_ad_data(flags: u16, record_type: u8) -> Vec<u8> {
    let mfg = CtAdvertisement {
        company_id: COMPANY_ID,
        protocol_id: PROTOCOL_ID_TRACKER,
        network_id: 0x0001,
        flags,
        addr: SENSOR_ADDR.bytes,
        record_type,
        ..CtAdvertisement::default()
    }
    .to_bytes();
    let mut data = vec![2, AD_TYPE_FLAGS, AD_FLAGS_GENERAL_NO_BREDR];
    data.push(CT_AD_SIZE as u8 + 1);
    data.push(AD_TYPE_MANUFACTURER_DATA);
    data.extend_from_slice(&mfg);
    data
}

pub fn sensor_advert(flags: u16, adv_type: AdvType) -> GatewayEvent {
    GatewayEvent::Ble(LinkEvent::Advertisement(AdvReport {
        addr: SENSOR_ADDR,
        rssi: -55,
        adv_type,
        data: sensor_ad_data(flags, 0x10),
    }))
}

pub fn ble(event: LinkEvent) -> GatewayEvent {
    GatewayEvent::Ble(event)
}

/// Drive a sensor from advertisement to a subscribed SMP link, answering
/// every stack procedure successfully.
pub fn connect_sensor(svc: &mut Gateway, io: &mut MockGateway, ev: &mut Events) {
    use ct_gateway::central::scan::FLAG_HAS_LOG_DATA;

    svc.handle_event(sensor_advert(FLAG_HAS_LOG_DATA, AdvType::Ind), io, ev);
    for event in [
        LinkEvent::Connected {
            conn: SENSOR,
            status: 0,
        },
        LinkEvent::MtuExchanged { ok: true },
        LinkEvent::ServiceDiscovered { ok: true },
        LinkEvent::CharacteristicDiscovered { ok: true },
        LinkEvent::CccDiscovered { ok: true },
        LinkEvent::Subscribed { ok: true },
    ] {
        svc.handle_event(ble(event), io, ev);
    }
}

// ── Sensor side of SMP and the log format ─────────────────────

/// File read response frame, as the sensor notifies it.
pub fn read_rsp(rsp: &FileResponse) -> Vec<u8> {
    let body = rsp.encode().expect("encode file response");
    encode_frame(MGMT_OP_READ_RSP, MGMT_GROUP_ID_FS, FS_MGMT_ID_FILE, 0, &body)
}

/// File write response frame (challenge verdict).
#[allow(dead_code)]
pub fn write_rsp(rc: i32) -> Vec<u8> {
    let rsp = FileResponse {
        rc,
        ..FileResponse::default()
    };
    let body = rsp.encode().expect("encode file response");
    encode_frame(MGMT_OP_WRITE_RSP, MGMT_GROUP_ID_FS, FS_MGMT_ID_FILE, 0, &body)
}

pub fn chunk(off: u32, data: &[u8], len: Option<u32>) -> GatewayEvent {
    GatewayEvent::SmpNotify(Some(read_rsp(&FileResponse {
        off,
        data: data.to_vec(),
        rc: 0,
        len,
    })))
}

pub fn log_header(version: u16, entry_size: u16, entry_count: u16) -> Vec<u8> {
    let mut log = LogHeader {
        version,
        entry_size,
        entry_count,
        device_id: [0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6],
        device_time: 1_600_000_000,
        last_upload_time: 1_599_000_000,
        ..LogHeader::default()
    };
    log.local.fw_version = [2, 0, 7, 0];
    log.local.battery_level = 87;
    log.local.network_id = 0x0001;
    if version == ENTRY_PROTOCOL_V2 {
        log.local.up_time_sec = Some(3_600);
    }
    let mut buf = [0u8; 64];
    let n = log.encode(&mut buf).expect("encode log header");
    buf[..n].to_vec()
}

pub fn entry_header(timestamp: u32) -> EntryHeader {
    EntryHeader {
        start: ENTRY_START_BYTE,
        flags: ENTRY_FLAGS_UNSENT,
        scan_interval: 60,
        serial: [0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6],
        timestamp,
        ..EntryHeader::default()
    }
}

/// V2 entry with `records` rssi-tracking records, CRC trailer included.
pub fn v2_entry(timestamp: u32, records: usize) -> Vec<u8> {
    let mut body = Vec::new();
    for i in 0..records {
        body.extend_from_slice(&[0x10, (0xC0 + i as u8), 1, 0]);
    }
    encode_entry(&entry_header(timestamp), &body, true)
}

/// V1 entry of fixed `size`: `records` rssi records then 0xFF padding.
#[allow(dead_code)]
pub fn v1_entry(size: usize, timestamp: u32, records: usize) -> Vec<u8> {
    let mut body = vec![0xFF; size - 16];
    for i in 0..records {
        body[i * 4..i * 4 + 4].copy_from_slice(&[0x10, 0xC8, 2, 0]);
    }
    encode_entry(&entry_header(timestamp), &body, false)
}
