//! Stash drain: republishes stashed entries one per invocation while the
//! sensor link is idle.
//!
//! ```text
//!   step ──▶ gate ──▶ acquire ──▶ previous outcome ──▶ entry at idx ──▶ submit
//!             │          │            │  Success: advance     │
//!             ▼          ▼            │  Fail: retry / skip    ▼
//!           Idle     Requeue /        ▼  (+ reboot)        Finished /
//!                   Reset(timeouts)                        Reset(corrupt)
//! ```
//!
//! The outcome of the entry submitted in round `n` is read in round `n+1`,
//! after the publish buffer came back, so no round ever blocks on the
//! cloud beyond the bounded acquire.

use core::time::Duration;

use log::{debug, error, info, warn};

use crate::datalog::{PUBLISH_HEADER_SIZE, PublishHeader};
use crate::publish::{PublishOutcome, PublishPort, PublishTicket};
use crate::stash::EntryStash;

/// Why the drain threw the stash away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReset {
    /// Header only, nothing left to send.
    Empty,
    /// The publish buffer could not be acquired too many times in a row.
    AcquireTimeouts,
    /// The cursor did not sit on a well-formed entry.
    CorruptEntry,
}

impl DrainReset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::AcquireTimeouts => "acquire timeouts",
            Self::CorruptEntry => "corrupt entry",
        }
    }
}

/// Result of one drain invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStep {
    /// Nothing to do right now.
    Idle,
    /// Work remains; run again on the next tick.
    Requeue,
    /// Every entry went out; the stash was reset.
    Finished,
    Reset(DrainReset),
    /// An entry kept failing; the device should restart.
    Reboot { delay_ms: u32 },
}

pub struct StashDrain {
    last: Option<PublishTicket>,
    failure_max: u32,
    reboot_on_failure: bool,
    reboot_delay_ms: u32,
    timeout: Duration,
}

impl StashDrain {
    pub fn new(
        failure_max: u32,
        reboot_on_failure: bool,
        reboot_delay_ms: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            last: None,
            failure_max,
            reboot_on_failure,
            reboot_delay_ms,
            timeout,
        }
    }

    /// An entry submitted by the drain is still unresolved.
    pub fn in_flight(&self) -> bool {
        self.last.is_some()
    }

    /// Run one round.
    ///
    /// `link_idle` is true while no sensor is connected or being
    /// connected; `epoch` stamps the republished header.
    pub fn step(
        &mut self,
        stash: &mut EntryStash,
        publisher: &mut impl PublishPort,
        cloud_ready: bool,
        link_idle: bool,
        topic: &str,
        epoch: u32,
    ) -> DrainStep {
        if !stash.is_available() || !link_idle || !cloud_ready {
            return DrainStep::Idle;
        }
        if stash.is_empty() {
            stash.reset();
            self.last = None;
            return DrainStep::Reset(DrainReset::Empty);
        }

        if !publisher.acquire(self.timeout) {
            let n = stash.record_timeout();
            warn!("Drain: publish buffer timeout ({}/{})", n, self.failure_max);
            if n > self.failure_max {
                error!("Drain: giving up on stash after {} timeouts", n);
                stash.reset();
                self.last = None;
                return DrainStep::Reset(DrainReset::AcquireTimeouts);
            }
            return DrainStep::Requeue;
        }
        stash.clear_timeouts();

        if let Some(ticket) = self.last.take() {
            match ticket.try_take() {
                Some(PublishOutcome::Success) => stash.advance(),
                outcome => {
                    let n = stash.record_failure();
                    warn!(
                        "Drain: entry at {} not confirmed ({:?}, {}/{})",
                        stash.idx(),
                        outcome,
                        n,
                        self.failure_max
                    );
                    if n > self.failure_max {
                        error!("Drain: skipping entry at {}", stash.idx());
                        stash.advance();
                        if self.reboot_on_failure {
                            publisher.release();
                            return DrainStep::Reboot {
                                delay_ms: self.reboot_delay_ms,
                            };
                        }
                    }
                }
            }
        }

        if stash.caught_up() {
            info!("Drain: stash published ({} entries)", stash.entry_count());
            publisher.release();
            stash.reset();
            return DrainStep::Finished;
        }

        let mut header = [0u8; PUBLISH_HEADER_SIZE];
        header.copy_from_slice(stash.header());
        if let Err(e) = PublishHeader::stamp_device_time(&mut header, epoch) {
            debug!("Drain: header not stamped: {}", e);
        }

        let Some(entry) = stash.entry_at_idx() else {
            publisher.release();
            stash.reset();
            return DrainStep::Reset(DrainReset::CorruptEntry);
        };
        let size = entry.len();
        let ticket = match publisher.submit(topic, &header, entry) {
            Ok(t) => t,
            Err(e) => {
                warn!("Drain: submit failed: {}", e);
                let t = PublishTicket::new();
                t.complete(PublishOutcome::Fail);
                t
            }
        };
        stash.set_prev_ent_size(size);
        debug!("Drain: submitted {} bytes at {}", size, stash.idx());
        self.last = Some(ticket);
        DrainStep::Requeue
    }
}
