//! Publish-or-stash decision for every validated entry of a live download.
//!
//! ```text
//!  entry ─▶ acquire buffer ──timeout──▶ stash, request disconnect
//!               │ ok
//!               ▼
//!          stash (pre-emptive) ─▶ submit ─▶ wait outcome
//!                                   ├─ Success  ▶ roll the stash back
//!                                   ├─ Fail     ▶ keep, flag, request disconnect
//!                                   └─ timeout  ▶ keep, flag
//! ```
//!
//! Every entry is in the stash before its publish is submitted, so a lost
//! outcome never loses the entry; at worst it is published twice.

use core::time::Duration;

use log::{error, warn};

use super::download::EntrySink;
use crate::app::events::CtEvent;
use crate::app::ports::EventSink;
use crate::datalog::{LogHeader, PUBLISH_HEADER_SIZE, PublishHeader};
use crate::publish::{PublishOutcome, PublishPort};
use crate::stash::EntryStash;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub published: u32,
    pub stashed: u32,
    pub discarded: u32,
}

/// Borrowed view of everything one chunk's entries need.
pub struct PublishPipeline<'a, P, E> {
    stash: &'a mut EntryStash,
    publisher: &'a mut P,
    events: &'a mut E,
    topic: &'a str,
    epoch: u32,
    timeout: Duration,
    publish_buffer_size: usize,
    disconnect_requested: bool,
    stats: PipelineStats,
}

impl<'a, P: PublishPort, E: EventSink> PublishPipeline<'a, P, E> {
    pub fn new(
        stash: &'a mut EntryStash,
        publisher: &'a mut P,
        events: &'a mut E,
        topic: &'a str,
        epoch: u32,
        timeout: Duration,
        publish_buffer_size: usize,
    ) -> Self {
        Self {
            stash,
            publisher,
            events,
            topic,
            epoch,
            timeout,
            publish_buffer_size,
            disconnect_requested: false,
            stats: PipelineStats::default(),
        }
    }

    /// The cloud path failed; the sensor link should be dropped so the
    /// stash can be drained first.
    pub fn disconnect_requested(&self) -> bool {
        self.disconnect_requested
    }

    /// Stash every further entry without trying to publish it and ask for
    /// the sensor link to be dropped.
    pub fn stash_remaining(&mut self) {
        self.disconnect_requested = true;
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    fn stash_only(&mut self, header: &[u8; PUBLISH_HEADER_SIZE], entry: &[u8]) {
        match self.stash.append(header, entry) {
            Ok(()) => {
                self.stash.mark_available();
                self.stats.stashed += 1;
                self.events.emit(&CtEvent::EntryStashed {
                    size: entry.len(),
                    stash_len: self.stash.len(),
                });
            }
            Err(e) => self.discard(entry.len(), e),
        }
    }

    fn discard(&mut self, size: usize, e: crate::error::StashError) {
        error!("CT: {} ({} byte entry dropped)", e, size);
        self.stats.discarded += 1;
        self.events.emit(&CtEvent::EntryDiscarded { size });
    }

    fn keep(&mut self, size: usize) {
        self.stash.mark_available();
        self.stats.stashed += 1;
        self.events.emit(&CtEvent::EntryStashed {
            size,
            stash_len: self.stash.len(),
        });
    }
}

impl<P: PublishPort, E: EventSink> EntrySink for PublishPipeline<'_, P, E> {
    fn on_entry(&mut self, log: &LogHeader, entry: &[u8]) {
        if entry.is_empty() || entry.len() + PUBLISH_HEADER_SIZE >= self.publish_buffer_size {
            warn!(
                "CT: entry of {} bytes does not fit the publish buffer",
                entry.len()
            );
            return;
        }
        let header = PublishHeader::from_log_header(log, self.epoch).to_bytes();

        if self.disconnect_requested {
            self.stash_only(&header, entry);
            return;
        }
        if !self.publisher.acquire(self.timeout) {
            error!("CT: ble->cloud publish timeout");
            self.stash_only(&header, entry);
            self.disconnect_requested = true;
            return;
        }

        let stashed = match self.stash.append(&header, entry) {
            Ok(()) => true,
            Err(e) => {
                self.discard(entry.len(), e);
                false
            }
        };

        let ticket = match self.publisher.submit(self.topic, &header, entry) {
            Ok(t) => t,
            Err(e) => {
                error!("CT: publish submit failed: {}", e);
                if stashed {
                    self.keep(entry.len());
                }
                self.disconnect_requested = true;
                return;
            }
        };

        match self.publisher.wait(&ticket, self.timeout) {
            Some(PublishOutcome::Success) => {
                if stashed {
                    self.stash.rollback_last();
                }
                self.stats.published += 1;
                self.events.emit(&CtEvent::EntryPublished { size: entry.len() });
            }
            Some(PublishOutcome::Fail) => {
                warn!("CT: publish failed, entry kept in stash");
                if stashed {
                    self.keep(entry.len());
                }
                self.disconnect_requested = true;
            }
            None => {
                warn!("CT: publish outcome timed out, entry kept in stash");
                if stashed {
                    self.keep(entry.len());
                }
            }
        }
    }
}
