//! Gateway advertising.
//!
//! ```text
//!  commissioned     flags │ mfg data (company 0x0077, protocol 0xFF81,
//!                         │   network id, epoch once the clock is set)
//!  not commissioned flags │ 128-bit service UUID (mobile app pairing)
//! ```
//!
//! Advertising is non-connectable by default. The user button opens a
//! connectable window; a connected central closes it again.

use log::{debug, error, info, warn};

use crate::app::ports::AdvertiserPort;
use crate::central::scan::{
    AD_FLAGS_GENERAL_NO_BREDR, AD_TYPE_FLAGS, AD_TYPE_MANUFACTURER_DATA, AD_TYPE_UUID128_ALL,
    COMPANY_ID, CT_AD_SIZE, CtAdvertisement, FLAG_HAS_EPOCH_TIME, PROTOCOL_ID_GATEWAY,
};
use crate::central::{ConnHandle, LedIndication};
use crate::datalog::RecordType;
use crate::error::BleError;

/// Legacy AD payload UUID, little-endian as sent on air.
pub const LEGACY_SERVICE_UUID: [u8; 16] = [
    0x36, 0xa3, 0x4d, 0x40, 0xb6, 0x70, 0x69, 0xa6, 0xb1, 0x4e, 0x84, 0x9e, 0x60, 0x7c, 0x78, 0x43,
];

/// Model id advertised by the gateway.
pub const MODEL_ID_GATEWAY: u8 = 0x01;

/// Legacy advertising payload size limit.
pub const ADV_PAYLOAD_MAX: usize = 31;

pub type AdvPayload = heapless::Vec<u8, ADV_PAYLOAD_MAX>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvMode {
    Connectable,
    #[default]
    NonConnectable,
}

impl AdvMode {
    pub fn led(self) -> LedIndication {
        match self {
            Self::Connectable => LedIndication::SearchingConnectable,
            Self::NonConnectable => LedIndication::Searching,
        }
    }
}

/// Advertising state of the gateway's peripheral role.
#[derive(Debug)]
pub struct Advertiser {
    mode: AdvMode,
    started: bool,
    central: Option<ConnHandle>,
    mfg: CtAdvertisement,
}

impl Advertiser {
    pub fn new(network_id: u16, addr: [u8; 6]) -> Self {
        Self {
            mode: AdvMode::NonConnectable,
            started: false,
            central: None,
            mfg: CtAdvertisement {
                company_id: COMPANY_ID,
                protocol_id: PROTOCOL_ID_GATEWAY,
                network_id,
                addr,
                record_type: RecordType::V00 as u8,
                model_id: MODEL_ID_GATEWAY,
                ..CtAdvertisement::default()
            },
        }
    }

    pub fn mode(&self) -> AdvMode {
        self.mode
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Central currently connected to the gateway.
    pub fn central(&self) -> Option<ConnHandle> {
        self.central
    }

    pub fn network_id(&self) -> u16 {
        self.mfg.network_id
    }

    /// Takes effect with the next start or refresh.
    pub fn set_network_id(&mut self, id: u16) {
        self.mfg.network_id = id;
        debug!("ADV: network id {:04X}", id);
    }

    pub fn manufacturer_data(&self) -> &CtAdvertisement {
        &self.mfg
    }

    /// AD structures for the current identity.
    pub fn payload(&self, commissioned: bool) -> AdvPayload {
        let mut p = AdvPayload::new();
        // Both layouts fit in 31 bytes: 3 + 18 and 3 + 28.
        let _ = p.extend_from_slice(&[2, AD_TYPE_FLAGS, AD_FLAGS_GENERAL_NO_BREDR]);
        if commissioned {
            let _ = p.push(CT_AD_SIZE as u8 + 1);
            let _ = p.push(AD_TYPE_MANUFACTURER_DATA);
            let _ = p.extend_from_slice(&self.mfg.to_bytes());
        } else {
            let _ = p.push(LEGACY_SERVICE_UUID.len() as u8 + 1);
            let _ = p.push(AD_TYPE_UUID128_ALL);
            let _ = p.extend_from_slice(&LEGACY_SERVICE_UUID);
        }
        p
    }

    /// Stop and restart advertising in the current mode. Returns the LED
    /// pattern that goes with it.
    pub fn start(
        &mut self,
        port: &mut impl AdvertiserPort,
        commissioned: bool,
    ) -> Result<LedIndication, BleError> {
        if let Err(e) = port.stop_advertising() {
            debug!("ADV: stop: {}", e);
        }
        let payload = self.payload(commissioned);
        port.start_advertising(self.mode, &payload)?;
        self.started = true;
        info!(
            "ADV: {:?} ({})",
            self.mode,
            if commissioned { "contact tracing" } else { "legacy" }
        );
        Ok(self.mode.led())
    }

    /// Switch mode and restart. Refused before the first start.
    pub fn set_mode(
        &mut self,
        port: &mut impl AdvertiserPort,
        mode: AdvMode,
        commissioned: bool,
    ) -> Result<LedIndication, BleError> {
        if !self.started {
            error!("ADV: not initialised");
            return Err(BleError::NotInitialized);
        }
        self.mode = mode;
        self.start(port, commissioned)
    }

    /// Button press: open the connectable window unless a central is
    /// already connected (`Ok(None)`).
    pub fn on_button(
        &mut self,
        port: &mut impl AdvertiserPort,
        commissioned: bool,
    ) -> Result<Option<LedIndication>, BleError> {
        if !self.started {
            error!("ADV: init first");
            return Err(BleError::NotInitialized);
        }
        if self.central.is_some() {
            warn!("ADV: ignoring button, central already connected");
            return Ok(None);
        }
        self.set_mode(port, AdvMode::Connectable, commissioned).map(Some)
    }

    /// Periodic refresh: stamp the epoch once the clock is set. Only the
    /// commissioned payload carries it.
    pub fn refresh(
        &mut self,
        port: &mut impl AdvertiserPort,
        commissioned: bool,
        epoch: u32,
    ) -> Result<(), BleError> {
        if !commissioned {
            return Ok(());
        }
        if epoch != 0 {
            self.mfg.flags |= FLAG_HAS_EPOCH_TIME;
            self.mfg.epoch = epoch;
        }
        port.update_advertising(&self.payload(true))
    }

    /// A central connected to the gateway.
    pub fn on_central_connected(
        &mut self,
        port: &mut impl AdvertiserPort,
        conn: ConnHandle,
        commissioned: bool,
    ) -> Result<LedIndication, BleError> {
        info!("ADV: central connected ({:?})", conn);
        self.central = Some(conn);
        self.set_mode(port, AdvMode::NonConnectable, commissioned)?;
        Ok(LedIndication::Searching)
    }

    /// `None` when `conn` is not the tracked central.
    pub fn on_central_disconnected(
        &mut self,
        port: &mut impl AdvertiserPort,
        conn: ConnHandle,
        commissioned: bool,
    ) -> Option<Result<LedIndication, BleError>> {
        if self.central != Some(conn) {
            return None;
        }
        info!("ADV: central disconnected ({:?})", conn);
        self.central = None;
        Some(self.start(port, commissioned))
    }
}
