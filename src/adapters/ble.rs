//! Bluetooth LE adapter.
//!
//! Implements [`BlePort`] (central role towards the sensor),
//! [`SmpTransport`] (SMP writes on the sensor link) and [`AdvertiserPort`]
//! (peripheral role towards phones) on one controller.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GAP + GATT client + GATT server
//!   through raw `esp_idf_svc::sys` calls. Stack callbacks run in the
//!   Bluedroid task and post [`GatewayEvent`]s to a static channel that
//!   the main loop drains with [`BleAdapter::next_event`].
//! - **all other targets**: a loopback simulation that records every call
//!   and completes each procedure immediately through its own queue.
//!
//! ## Connection handles
//!
//! Bluedroid only assigns a `conn_id` once a GATT client open completes,
//! so the sensor link is always reported as [`SENSOR_LINK`]. Phones
//! connected to the SMP server keep their raw `conn_id`.
//!
//! | Attribute            | UUID                                   | Role   |
//! |----------------------|----------------------------------------|--------|
//! | SMP service          | `8d53dc1d-1db7-4cd3-868b-8a527460aa84` | both   |
//! | SMP characteristic   | `da2e7828-fbce-4e01-ae9e-261174997c48` | both   |
//! | CCC descriptor       | `0x2902`                               | client |

use log::info;

use crate::app::events::GatewayEvent;
use crate::app::ports::{AdvertiserPort, BlePort};
use crate::central::scan::AdvType;
use crate::central::{BtAddr, ConnHandle, LinkEvent};
use crate::error::BleError;
use crate::peripheral::AdvMode;
use crate::smp::SmpTransport;

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SMP_SERVICE_UUID: u128 = 0x8d53dc1d_1db7_4cd3_868b_8a527460aa84;
pub const SMP_CHAR_UUID: u128 = 0xda2e7828_fbce_4e01_ae9e_261174997c48;
pub const CCC_UUID: u16 = 0x2902;

/// Handle the sensor link is reported under.
pub const SENSOR_LINK: ConnHandle = ConnHandle(0xFF00);

/// ATT MTU requested on the sensor link.
pub const PREFERRED_MTU: u16 = 247;

/// Unread stack events held; newer ones are dropped while full.
const EVENT_QUEUE_CAP: usize = 32;

/// Map a controller advertising PDU type (`ble_evt_type`) to [`AdvType`].
pub fn adv_type_from_raw(raw: u32) -> AdvType {
    match raw {
        0 => AdvType::Ind,
        1 => AdvType::DirectInd,
        2 => AdvType::ScanInd,
        4 => AdvType::ScanRsp,
        _ => AdvType::NonConnInd,
    }
}

// ───────────────────────────────────────────────────────────────
// Callback → adapter bridge (ESP-IDF)
// ───────────────────────────────────────────────────────────────
//
// The Bluedroid C callbacks are free functions, not closures. These
// statics carry interface ids and attribute handles between them and the
// adapter.

#[cfg(target_os = "espidf")]
mod stack {
    use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};
    use std::sync::Mutex;

    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::channel::Channel;
    use esp_idf_svc::sys::*;
    use log::{debug, info, warn};

    use super::{CCC_UUID, EVENT_QUEUE_CAP, SENSOR_LINK, SMP_CHAR_UUID, SMP_SERVICE_UUID};
    use crate::app::events::GatewayEvent;
    use crate::central::scan::AdvReport;
    use crate::central::{BtAddr, ConnHandle, LinkEvent};

    pub const NONE: u16 = 0xFFFF;

    pub static EVENTS: Channel<CriticalSectionRawMutex, GatewayEvent, EVENT_QUEUE_CAP> =
        Channel::new();

    pub static GATTC_IF: AtomicU16 = AtomicU16::new(NONE);
    pub static GATTS_IF: AtomicU16 = AtomicU16::new(NONE);

    // Sensor link (GATT client).
    pub static SENSOR_CONN_ID: AtomicU16 = AtomicU16::new(NONE);
    pub static SENSOR_MTU: AtomicU16 = AtomicU16::new(0);
    pub static SVC_START: AtomicU16 = AtomicU16::new(0);
    pub static SVC_END: AtomicU16 = AtomicU16::new(0);
    pub static SMP_CHAR: AtomicU16 = AtomicU16::new(0);
    pub static SMP_CCC: AtomicU16 = AtomicU16::new(0);
    pub static SENSOR_BDA: Mutex<[u8; 6]> = Mutex::new([0; 6]);

    // SMP server (GATT server).
    pub static SERVER_SVC: AtomicU16 = AtomicU16::new(0);
    pub static SERVER_CHAR: AtomicU16 = AtomicU16::new(0);

    // Advertising restart after a raw data update.
    pub static ADV_CONNECTABLE: AtomicBool = AtomicBool::new(false);
    pub static ADV_START_PENDING: AtomicBool = AtomicBool::new(false);

    pub fn push(event: GatewayEvent) {
        if EVENTS.try_send(event).is_err() {
            warn!("BLE: event queue full, dropping event");
        }
    }

    fn push_link(event: LinkEvent) {
        push(GatewayEvent::Ble(event));
    }

    pub fn uuid128(uuid: u128) -> esp_bt_uuid_t {
        // SAFETY: esp_bt_uuid_t is a plain C struct; all-zero is valid.
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = ESP_UUID_LEN_128 as u16;
        t.uuid.uuid128 = uuid.to_le_bytes();
        t
    }

    pub fn uuid16(uuid: u16) -> esp_bt_uuid_t {
        // SAFETY: see uuid128.
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = ESP_UUID_LEN_16 as u16;
        t.uuid.uuid16 = uuid;
        t
    }

    pub fn adv_params(connectable: bool) -> esp_ble_adv_params_t {
        esp_ble_adv_params_t {
            adv_int_min: 0x20,
            adv_int_max: 0x40,
            adv_type: if connectable {
                esp_ble_adv_type_t_ADV_TYPE_IND
            } else {
                esp_ble_adv_type_t_ADV_TYPE_NONCONN_IND
            },
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            // SAFETY: remaining fields are plain integers and a byte array.
            ..unsafe { core::mem::zeroed() }
        }
    }

    /// Reset every per-link handle of the sensor connection.
    pub fn clear_sensor() {
        SENSOR_CONN_ID.store(NONE, Ordering::Release);
        SENSOR_MTU.store(0, Ordering::Release);
        SVC_START.store(0, Ordering::Relaxed);
        SVC_END.store(0, Ordering::Relaxed);
        SMP_CHAR.store(0, Ordering::Relaxed);
        SMP_CCC.store(0, Ordering::Relaxed);
    }

    // ── GAP ──────────────────────────────────────────────────

    pub unsafe extern "C" fn gap_event_handler(
        event: esp_gap_ble_cb_event_t,
        param: *mut esp_ble_gap_cb_param_t,
    ) {
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_SCAN_RESULT_EVT => {
                // SAFETY: Bluedroid passes a valid param for this event.
                let p = unsafe { &(*param).scan_rst };
                if p.search_evt != esp_gap_search_evt_t_ESP_GAP_SEARCH_INQ_RES_EVT {
                    return;
                }
                let len = (p.adv_data_len as usize + p.scan_rsp_len as usize).min(p.ble_adv.len());
                push_link(LinkEvent::Advertisement(AdvReport {
                    addr: BtAddr {
                        bytes: p.bda,
                        random: p.ble_addr_type != esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
                    },
                    rssi: p.rssi as i8,
                    adv_type: super::adv_type_from_raw(p.ble_evt_type as u32),
                    data: p.ble_adv[..len].to_vec(),
                }));
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_RAW_SET_COMPLETE_EVT => {
                if ADV_START_PENDING.swap(false, Ordering::AcqRel) {
                    let mut params = adv_params(ADV_CONNECTABLE.load(Ordering::Acquire));
                    // SAFETY: params outlives the call.
                    unsafe { esp_ble_gap_start_advertising(&mut params) };
                }
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
                debug!("BLE GAP: advertising started");
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
                debug!("BLE GAP: advertising stopped");
            }
            _ => {}
        }
    }

    // ── GATT client (sensor link) ────────────────────────────

    pub unsafe extern "C" fn gattc_event_handler(
        event: esp_gattc_cb_event_t,
        gattc_if: esp_gatt_if_t,
        param: *mut esp_ble_gattc_cb_param_t,
    ) {
        // SAFETY: Bluedroid passes a valid param for every event below.
        let p = unsafe { &*param };
        match event {
            esp_gattc_cb_event_t_ESP_GATTC_REG_EVT => {
                GATTC_IF.store(u16::from(gattc_if), Ordering::Release);
                info!("BLE GATTC: app registered (if={})", gattc_if);
            }
            esp_gattc_cb_event_t_ESP_GATTC_OPEN_EVT => {
                let open = unsafe { &p.open };
                let ok = open.status == esp_gatt_status_t_ESP_GATT_OK;
                if ok {
                    SENSOR_CONN_ID.store(open.conn_id, Ordering::Release);
                    SENSOR_MTU.store(open.mtu, Ordering::Release);
                }
                push_link(LinkEvent::Connected {
                    conn: SENSOR_LINK,
                    status: if ok { 0 } else { open.status as u8 },
                });
            }
            esp_gattc_cb_event_t_ESP_GATTC_CFG_MTU_EVT => {
                let mtu = unsafe { &p.cfg_mtu };
                let ok = mtu.status == esp_gatt_status_t_ESP_GATT_OK;
                if ok {
                    SENSOR_MTU.store(mtu.mtu, Ordering::Release);
                }
                push_link(LinkEvent::MtuExchanged { ok });
            }
            esp_gattc_cb_event_t_ESP_GATTC_SEARCH_RES_EVT => {
                let res = unsafe { &p.search_res };
                SVC_START.store(res.start_handle, Ordering::Relaxed);
                SVC_END.store(res.end_handle, Ordering::Relaxed);
            }
            esp_gattc_cb_event_t_ESP_GATTC_SEARCH_CMPL_EVT => {
                let cmpl = unsafe { &p.search_cmpl };
                let ok = cmpl.status == esp_gatt_status_t_ESP_GATT_OK
                    && SVC_START.load(Ordering::Relaxed) != 0;
                push_link(LinkEvent::ServiceDiscovered { ok });
            }
            esp_gattc_cb_event_t_ESP_GATTC_WRITE_DESCR_EVT => {
                let w = unsafe { &p.write };
                push_link(LinkEvent::Subscribed {
                    ok: w.status == esp_gatt_status_t_ESP_GATT_OK,
                });
            }
            esp_gattc_cb_event_t_ESP_GATTC_WRITE_CHAR_EVT => {
                let w = unsafe { &p.write };
                if w.status != esp_gatt_status_t_ESP_GATT_OK {
                    warn!("BLE GATTC: SMP write failed ({})", w.status);
                }
            }
            esp_gattc_cb_event_t_ESP_GATTC_NOTIFY_EVT => {
                let n = unsafe { &p.notify };
                if n.handle != SMP_CHAR.load(Ordering::Relaxed) {
                    return;
                }
                let data = unsafe { core::slice::from_raw_parts(n.value, n.value_len as usize) };
                push(GatewayEvent::SmpNotify(Some(data.to_vec())));
            }
            esp_gattc_cb_event_t_ESP_GATTC_DISCONNECT_EVT => {
                let d = unsafe { &p.disconnect };
                if d.conn_id == SENSOR_CONN_ID.load(Ordering::Acquire) {
                    clear_sensor();
                    push_link(LinkEvent::Disconnected {
                        conn: SENSOR_LINK,
                        reason: d.reason as u8,
                    });
                }
            }
            _ => {}
        }
    }

    // ── GATT server (SMP towards phones) ─────────────────────

    pub unsafe extern "C" fn gatts_event_handler(
        event: esp_gatts_cb_event_t,
        gatts_if: esp_gatt_if_t,
        param: *mut esp_ble_gatts_cb_param_t,
    ) {
        // SAFETY: Bluedroid passes a valid param for every event below.
        let p = unsafe { &*param };
        match event {
            esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
                GATTS_IF.store(u16::from(gatts_if), Ordering::Release);
                let mut svc_id = esp_gatt_srvc_id_t {
                    id: esp_gatt_id_t {
                        uuid: uuid128(SMP_SERVICE_UUID),
                        inst_id: 0,
                    },
                    is_primary: true,
                };
                unsafe { esp_ble_gatts_create_service(gatts_if, &mut svc_id, 4) };
            }
            esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
                let svc = unsafe { p.create.service_handle };
                SERVER_SVC.store(svc, Ordering::Relaxed);
                let mut char_uuid = uuid128(SMP_CHAR_UUID);
                unsafe {
                    esp_ble_gatts_start_service(svc);
                    esp_ble_gatts_add_char(
                        svc,
                        &mut char_uuid,
                        ESP_GATT_PERM_WRITE as esp_gatt_perm_t,
                        (ESP_GATT_CHAR_PROP_BIT_WRITE_NR | ESP_GATT_CHAR_PROP_BIT_NOTIFY)
                            as esp_gatt_char_prop_t,
                        core::ptr::null_mut(),
                        core::ptr::null_mut(),
                    );
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
                let handle = unsafe { p.add_char.attr_handle };
                SERVER_CHAR.store(handle, Ordering::Relaxed);
                let mut ccc = uuid16(CCC_UUID);
                unsafe {
                    esp_ble_gatts_add_char_descr(
                        SERVER_SVC.load(Ordering::Relaxed),
                        &mut ccc,
                        (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
                        core::ptr::null_mut(),
                        core::ptr::null_mut(),
                    );
                }
                info!("BLE GATTS: SMP server ready (char={})", handle);
            }
            esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
                let c = unsafe { &p.connect };
                // link_role 1: the remote is the central.
                if c.link_role == 1 {
                    push_link(LinkEvent::Connected {
                        conn: ConnHandle(c.conn_id),
                        status: 0,
                    });
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
                let d = unsafe { &p.disconnect };
                let sensor = SENSOR_CONN_ID.load(Ordering::Acquire);
                if d.conn_id != sensor {
                    push_link(LinkEvent::Disconnected {
                        conn: ConnHandle(d.conn_id),
                        reason: d.reason as u8,
                    });
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
                let w = unsafe { &p.write };
                if w.handle != SERVER_CHAR.load(Ordering::Relaxed) || w.is_prep {
                    return;
                }
                let frame = unsafe { core::slice::from_raw_parts(w.value, w.len as usize) };
                push(GatewayEvent::SmpRequest {
                    conn: ConnHandle(w.conn_id),
                    frame: frame.to_vec(),
                });
            }
            _ => {}
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Adapter
// ───────────────────────────────────────────────────────────────

/// One call the simulated stack received.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
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
    SmpWrite(Vec<u8>),
    StartAdvertising(AdvMode, Vec<u8>),
    StopAdvertising,
    UpdateAdvertising(Vec<u8>),
    SmpResponse(ConnHandle, Vec<u8>),
}

pub struct BleAdapter {
    started: bool,
    #[cfg(not(target_os = "espidf"))]
    queue: std::collections::VecDeque<GatewayEvent>,
    #[cfg(not(target_os = "espidf"))]
    calls: Vec<SimCall>,
    #[cfg(not(target_os = "espidf"))]
    mtu: Option<usize>,
}

impl Default for BleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl BleAdapter {
    pub fn new() -> Self {
        Self {
            started: false,
            #[cfg(not(target_os = "espidf"))]
            queue: std::collections::VecDeque::new(),
            #[cfg(not(target_os = "espidf"))]
            calls: Vec::new(),
            #[cfg(not(target_os = "espidf"))]
            mtu: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    fn ensure_started(&self) -> Result<(), BleError> {
        if self.started {
            Ok(())
        } else {
            Err(BleError::NotInitialized)
        }
    }

    /// Bring up the controller and register the GAP, GATT client and GATT
    /// server callbacks.
    #[cfg(target_os = "espidf")]
    pub fn start(&mut self) -> Result<(), BleError> {
        use esp_idf_svc::sys::*;

        if self.started {
            return Ok(());
        }
        // SAFETY: called once from main() before the event loop.
        unsafe {
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            check(esp_bt_controller_init(&mut bt_cfg))?;
            check(esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE))?;
            check(esp_bluedroid_init())?;
            check(esp_bluedroid_enable())?;

            check(esp_ble_gap_register_callback(Some(stack::gap_event_handler)))?;
            check(esp_ble_gattc_register_callback(Some(stack::gattc_event_handler)))?;
            check(esp_ble_gatts_register_callback(Some(stack::gatts_event_handler)))?;
            check(esp_ble_gattc_app_register(0))?;
            check(esp_ble_gatts_app_register(1))?;
            check(esp_ble_gatt_set_local_mtu(PREFERRED_MTU))?;

            let mut scan = esp_ble_scan_params_t {
                scan_type: esp_ble_scan_type_t_BLE_SCAN_TYPE_PASSIVE,
                own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
                scan_filter_policy: esp_ble_scan_filter_t_BLE_SCAN_FILTER_ALLOW_ALL,
                scan_interval: 0x60,
                scan_window: 0x30,
                scan_duplicate: esp_ble_scan_duplicate_t_BLE_SCAN_DUPLICATE_DISABLE,
            };
            check(esp_ble_gap_set_scan_params(&mut scan))?;
        }
        self.started = true;
        info!("BLE(espidf): Bluedroid up (central + SMP server)");
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn start(&mut self) -> Result<(), BleError> {
        self.started = true;
        info!("BLE(sim): started");
        Ok(())
    }

    /// Next event posted by the stack, if any.
    #[cfg(target_os = "espidf")]
    pub fn next_event(&mut self) -> Option<GatewayEvent> {
        stack::EVENTS.try_receive().ok()
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn next_event(&mut self) -> Option<GatewayEvent> {
        self.queue.pop_front()
    }

    /// Queue an event as if the stack had reported it.
    #[cfg(not(target_os = "espidf"))]
    pub fn inject(&mut self, event: GatewayEvent) {
        self.post(event);
    }

    /// Every call made so far.
    #[cfg(not(target_os = "espidf"))]
    pub fn calls(&self) -> &[SimCall] {
        &self.calls
    }

    #[cfg(not(target_os = "espidf"))]
    fn record(&mut self, call: SimCall) -> Result<(), BleError> {
        self.ensure_started()?;
        self.calls.push(call);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn complete(&mut self, event: LinkEvent) {
        self.post(GatewayEvent::Ble(event));
    }

    #[cfg(not(target_os = "espidf"))]
    fn post(&mut self, event: GatewayEvent) {
        if self.queue.len() >= EVENT_QUEUE_CAP {
            log::warn!("BLE: event queue full, dropping event");
            return;
        }
        self.queue.push_back(event);
    }
}

#[cfg(target_os = "espidf")]
fn check(rc: esp_idf_svc::sys::esp_err_t) -> Result<(), BleError> {
    if rc == esp_idf_svc::sys::ESP_OK {
        Ok(())
    } else {
        Err(BleError::Stack(rc))
    }
}

// ───────────────────────────────────────────────────────────────
// Port implementations (ESP-IDF)
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod ports_espidf {
    use core::sync::atomic::Ordering;

    use esp_idf_svc::sys::*;
    use log::{info, warn};

    use super::stack::{self, NONE};
    use super::{BleAdapter, SENSOR_LINK, SMP_CHAR_UUID, SMP_SERVICE_UUID, check};
    use crate::app::events::GatewayEvent;
    use crate::app::ports::{AdvertiserPort, BlePort};
    use crate::central::{BtAddr, ConnHandle, LinkEvent};
    use crate::error::BleError;
    use crate::peripheral::AdvMode;
    use crate::smp::SmpTransport;

    fn gattc_if() -> esp_gatt_if_t {
        stack::GATTC_IF.load(Ordering::Acquire) as esp_gatt_if_t
    }

    fn gatts_if() -> esp_gatt_if_t {
        stack::GATTS_IF.load(Ordering::Acquire) as esp_gatt_if_t
    }

    fn sensor_conn_id(conn: ConnHandle) -> Result<u16, BleError> {
        if conn != SENSOR_LINK {
            return Err(BleError::NotConnected);
        }
        match stack::SENSOR_CONN_ID.load(Ordering::Acquire) {
            NONE => Err(BleError::NotConnected),
            id => Ok(id),
        }
    }

    impl SmpTransport for BleAdapter {
        fn smp_mtu(&self) -> Option<usize> {
            if stack::SENSOR_CONN_ID.load(Ordering::Acquire) == NONE {
                return None;
            }
            match stack::SENSOR_MTU.load(Ordering::Acquire) {
                0 => None,
                mtu => Some(usize::from(mtu)),
            }
        }

        fn smp_write(&mut self, frame: &[u8]) -> Result<(), BleError> {
            let conn_id = sensor_conn_id(SENSOR_LINK)?;
            let handle = stack::SMP_CHAR.load(Ordering::Relaxed);
            // SAFETY: Bluedroid copies the value before returning.
            check(unsafe {
                esp_ble_gattc_write_char(
                    gattc_if(),
                    conn_id,
                    handle,
                    frame.len() as u16,
                    frame.as_ptr() as *mut u8,
                    esp_gatt_write_type_t_ESP_GATT_WRITE_TYPE_NO_RSP,
                    esp_gatt_auth_req_t_ESP_GATT_AUTH_REQ_NONE,
                )
            })
        }
    }

    impl BlePort for BleAdapter {
        fn start_scan(&mut self) -> Result<(), BleError> {
            self.ensure_started()?;
            // Duration 0: scan until stopped.
            check(unsafe { esp_ble_gap_start_scanning(0) })
        }

        fn stop_scan(&mut self) -> Result<(), BleError> {
            self.ensure_started()?;
            check(unsafe { esp_ble_gap_stop_scanning() })
        }

        fn connect(&mut self, addr: &BtAddr) -> Result<ConnHandle, BleError> {
            self.ensure_started()?;
            let mut bda = addr.bytes;
            if let Ok(mut stored) = stack::SENSOR_BDA.lock() {
                *stored = bda;
            }
            let addr_type = if addr.random {
                esp_ble_addr_type_t_BLE_ADDR_TYPE_RANDOM
            } else {
                esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC
            };
            check(unsafe { esp_ble_gattc_open(gattc_if(), bda.as_mut_ptr(), addr_type, true) })?;
            Ok(SENSOR_LINK)
        }

        fn disconnect(&mut self, conn: ConnHandle) -> Result<(), BleError> {
            self.ensure_started()?;
            if conn == SENSOR_LINK {
                if stack::SENSOR_CONN_ID.load(Ordering::Acquire) == NONE {
                    // Still opening: cancel the pending open.
                    let mut bda = stack::SENSOR_BDA.lock().map(|b| *b).unwrap_or([0; 6]);
                    return check(unsafe { esp_ble_gap_disconnect(bda.as_mut_ptr()) });
                }
                let conn_id = sensor_conn_id(conn)?;
                return check(unsafe { esp_ble_gattc_close(gattc_if(), conn_id) });
            }
            check(unsafe { esp_ble_gatts_close(gatts_if(), conn.0) })
        }

        fn exchange_mtu(&mut self, conn: ConnHandle) -> Result<(), BleError> {
            let conn_id = sensor_conn_id(conn)?;
            check(unsafe { esp_ble_gattc_send_mtu_req(gattc_if(), conn_id) })
        }

        fn discover_smp_service(&mut self, conn: ConnHandle) -> Result<(), BleError> {
            let conn_id = sensor_conn_id(conn)?;
            let mut uuid = stack::uuid128(SMP_SERVICE_UUID);
            stack::SVC_START.store(0, Ordering::Relaxed);
            check(unsafe { esp_ble_gattc_search_service(gattc_if(), conn_id, &mut uuid) })
        }

        fn discover_smp_characteristic(&mut self, conn: ConnHandle) -> Result<(), BleError> {
            let conn_id = sensor_conn_id(conn)?;
            // SAFETY: plain C struct, zero is a valid empty element.
            let mut elem: esp_gattc_char_elem_t = unsafe { core::mem::zeroed() };
            let mut count: u16 = 1;
            let status = unsafe {
                esp_ble_gattc_get_char_by_uuid(
                    gattc_if(),
                    conn_id,
                    stack::SVC_START.load(Ordering::Relaxed),
                    stack::SVC_END.load(Ordering::Relaxed),
                    stack::uuid128(SMP_CHAR_UUID),
                    &mut elem,
                    &mut count,
                )
            };
            let ok = status == esp_gatt_status_t_ESP_GATT_OK && count > 0;
            if ok {
                stack::SMP_CHAR.store(elem.char_handle, Ordering::Relaxed);
            }
            // Served from the local attribute cache; completes immediately.
            stack::push(GatewayEvent::Ble(LinkEvent::CharacteristicDiscovered { ok }));
            Ok(())
        }

        fn discover_ccc(&mut self, conn: ConnHandle) -> Result<(), BleError> {
            let conn_id = sensor_conn_id(conn)?;
            let mut elem: esp_gattc_descr_elem_t = unsafe { core::mem::zeroed() };
            let mut count: u16 = 1;
            let status = unsafe {
                esp_ble_gattc_get_descr_by_char_handle(
                    gattc_if(),
                    conn_id,
                    stack::SMP_CHAR.load(Ordering::Relaxed),
                    stack::uuid16(super::CCC_UUID),
                    &mut elem,
                    &mut count,
                )
            };
            let ok = status == esp_gatt_status_t_ESP_GATT_OK && count > 0;
            if ok {
                stack::SMP_CCC.store(elem.handle, Ordering::Relaxed);
            }
            stack::push(GatewayEvent::Ble(LinkEvent::CccDiscovered { ok }));
            Ok(())
        }

        fn subscribe(&mut self, conn: ConnHandle) -> Result<(), BleError> {
            let conn_id = sensor_conn_id(conn)?;
            let mut bda = stack::SENSOR_BDA.lock().map(|b| *b).unwrap_or([0; 6]);
            let mut enable: [u8; 2] = [0x01, 0x00];
            unsafe {
                check(esp_ble_gattc_register_for_notify(
                    gattc_if(),
                    bda.as_mut_ptr(),
                    stack::SMP_CHAR.load(Ordering::Relaxed),
                ))?;
                check(esp_ble_gattc_write_char_descr(
                    gattc_if(),
                    conn_id,
                    stack::SMP_CCC.load(Ordering::Relaxed),
                    enable.len() as u16,
                    enable.as_mut_ptr(),
                    esp_gatt_write_type_t_ESP_GATT_WRITE_TYPE_RSP,
                    esp_gatt_auth_req_t_ESP_GATT_AUTH_REQ_NONE,
                ))
            }
        }

        fn release(&mut self, conn: ConnHandle) {
            if conn == SENSOR_LINK {
                stack::clear_sensor();
            }
        }
    }

    impl AdvertiserPort for BleAdapter {
        fn start_advertising(&mut self, mode: AdvMode, payload: &[u8]) -> Result<(), BleError> {
            self.ensure_started()?;
            unsafe { esp_ble_gap_stop_advertising() };
            stack::ADV_CONNECTABLE.store(mode == AdvMode::Connectable, Ordering::Release);
            stack::ADV_START_PENDING.store(true, Ordering::Release);
            check(unsafe {
                esp_ble_gap_config_adv_data_raw(payload.as_ptr() as *mut u8, payload.len() as u32)
            })?;
            info!("BLE(espidf): advertising {:?} ({} bytes)", mode, payload.len());
            Ok(())
        }

        fn stop_advertising(&mut self) -> Result<(), BleError> {
            self.ensure_started()?;
            stack::ADV_START_PENDING.store(false, Ordering::Release);
            check(unsafe { esp_ble_gap_stop_advertising() })
        }

        fn update_advertising(&mut self, payload: &[u8]) -> Result<(), BleError> {
            self.ensure_started()?;
            check(unsafe {
                esp_ble_gap_config_adv_data_raw(payload.as_ptr() as *mut u8, payload.len() as u32)
            })
        }

        fn send_smp_response(&mut self, conn: ConnHandle, frame: &[u8]) -> Result<(), BleError> {
            self.ensure_started()?;
            let handle = stack::SERVER_CHAR.load(Ordering::Relaxed);
            if handle == 0 {
                warn!("BLE(espidf): SMP server not registered");
                return Err(BleError::NotInitialized);
            }
            check(unsafe {
                esp_ble_gatts_send_indicate(
                    gatts_if(),
                    conn.0,
                    handle,
                    frame.len() as u16,
                    frame.as_ptr() as *mut u8,
                    false,
                )
            })
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Port implementations (host loopback)
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl SmpTransport for BleAdapter {
    fn smp_mtu(&self) -> Option<usize> {
        self.mtu
    }

    fn smp_write(&mut self, frame: &[u8]) -> Result<(), BleError> {
        if self.mtu.is_none() {
            return Err(BleError::NotConnected);
        }
        self.record(SimCall::SmpWrite(frame.to_vec()))
    }
}

#[cfg(not(target_os = "espidf"))]
impl BlePort for BleAdapter {
    fn start_scan(&mut self) -> Result<(), BleError> {
        self.record(SimCall::StartScan)
    }

    fn stop_scan(&mut self) -> Result<(), BleError> {
        self.record(SimCall::StopScan)
    }

    fn connect(&mut self, addr: &BtAddr) -> Result<ConnHandle, BleError> {
        self.record(SimCall::Connect(*addr))?;
        self.mtu = Some(usize::from(PREFERRED_MTU));
        self.complete(LinkEvent::Connected {
            conn: SENSOR_LINK,
            status: 0,
        });
        Ok(SENSOR_LINK)
    }

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), BleError> {
        self.record(SimCall::Disconnect(conn))?;
        if conn == SENSOR_LINK {
            self.mtu = None;
        }
        // Local host terminated.
        self.complete(LinkEvent::Disconnected { conn, reason: 0x16 });
        Ok(())
    }

    fn exchange_mtu(&mut self, _conn: ConnHandle) -> Result<(), BleError> {
        self.record(SimCall::ExchangeMtu)?;
        self.complete(LinkEvent::MtuExchanged { ok: true });
        Ok(())
    }

    fn discover_smp_service(&mut self, _conn: ConnHandle) -> Result<(), BleError> {
        self.record(SimCall::DiscoverService)?;
        self.complete(LinkEvent::ServiceDiscovered { ok: true });
        Ok(())
    }

    fn discover_smp_characteristic(&mut self, _conn: ConnHandle) -> Result<(), BleError> {
        self.record(SimCall::DiscoverCharacteristic)?;
        self.complete(LinkEvent::CharacteristicDiscovered { ok: true });
        Ok(())
    }

    fn discover_ccc(&mut self, _conn: ConnHandle) -> Result<(), BleError> {
        self.record(SimCall::DiscoverCcc)?;
        self.complete(LinkEvent::CccDiscovered { ok: true });
        Ok(())
    }

    fn subscribe(&mut self, _conn: ConnHandle) -> Result<(), BleError> {
        self.record(SimCall::Subscribe)?;
        self.complete(LinkEvent::Subscribed { ok: true });
        Ok(())
    }

    fn release(&mut self, conn: ConnHandle) {
        if conn == SENSOR_LINK {
            self.mtu = None;
        }
        self.calls.push(SimCall::Release(conn));
    }
}

#[cfg(not(target_os = "espidf"))]
impl AdvertiserPort for BleAdapter {
    fn start_advertising(&mut self, mode: AdvMode, payload: &[u8]) -> Result<(), BleError> {
        self.record(SimCall::StartAdvertising(mode, payload.to_vec()))
    }

    fn stop_advertising(&mut self) -> Result<(), BleError> {
        self.record(SimCall::StopAdvertising)
    }

    fn update_advertising(&mut self, payload: &[u8]) -> Result<(), BleError> {
        self.record(SimCall::UpdateAdvertising(payload.to_vec()))
    }

    fn send_smp_response(&mut self, conn: ConnHandle, frame: &[u8]) -> Result<(), BleError> {
        self.record(SimCall::SmpResponse(conn, frame.to_vec()))
    }
}
