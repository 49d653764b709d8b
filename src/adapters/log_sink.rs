//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing each [`CtEvent`] as one
//! `TAG | key=value` line to the logger (UART / USB-CDC in production).

use log::{info, warn};

use crate::app::events::CtEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`CtEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &CtEvent) {
        match event {
            CtEvent::Started {
                network_id,
                commissioned,
            } => {
                info!(
                    "START | network_id={:04X} commissioned={}",
                    network_id, commissioned
                );
            }
            CtEvent::StateChanged { from, to } => {
                info!("STATE | {:?} -> {:?}", from, to);
            }
            CtEvent::AdIgnored { reason, all_ads } => {
                info!("SCAN  | ignored={} ads={}", reason.as_str(), all_ads);
            }
            CtEvent::SensorFound { addr } => {
                info!("SCAN  | sensor={}", addr);
            }
            CtEvent::DownloadStarted { version, file_size } => {
                info!("LOG   | start version={} size={}", version, file_size);
            }
            CtEvent::DownloadCompleted { entries, records } => {
                info!("LOG   | done entries={} records={}", entries, records);
            }
            CtEvent::EntryPublished { size } => {
                info!("CLOUD | published size={}", size);
            }
            CtEvent::EntryStashed { size, stash_len } => {
                info!("STASH | kept size={} stash={}", size, stash_len);
            }
            CtEvent::EntryDiscarded { size } => {
                warn!("STASH | full, dropped size={}", size);
            }
            CtEvent::StashDrained => {
                info!("STASH | drained");
            }
            CtEvent::StashReset(reason) => {
                warn!("STASH | reset reason={}", reason.as_str());
            }
            CtEvent::CentralConnected(conn) => {
                info!("PERIPH| central connected handle={}", conn.0);
            }
            CtEvent::CentralDisconnected(conn) => {
                info!("PERIPH| central disconnected handle={}", conn.0);
            }
            CtEvent::AdvertisingChanged(mode) => {
                info!("ADV   | mode={:?}", mode);
            }
            CtEvent::NetworkIdChanged(id) => {
                info!("ADV   | network_id={:04X}", id);
            }
            CtEvent::Rebooting { delay_ms, reason } => {
                warn!("RESET | in {}ms reason={}", delay_ms, reason);
            }
        }
    }
}
