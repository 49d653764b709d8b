//! Software timer table.
//!
//! Every timer the gateway uses is a deadline in this table, checked by the
//! service on each poll against the monotonic clock. One-shots disarm when
//! they fire; periodic timers re-arm themselves from the fire time.

use core::time::Duration;

/// Timers owned by the gateway service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Connection attempt to a sensor must finish in time.
    SensorConnect,
    /// Each SMP request must be answered in time.
    SmpTransfer,
    /// Periodic link activity check.
    Inactivity,
    /// Reboot if no advertisement at all is seen.
    AdvWatchdog,
    /// Revert connectable advertising after the button window.
    ConnectableAdv,
    /// Periodic manufacturer-data refresh.
    AdvUpdate,
}

impl TimerId {
    pub const ALL: [TimerId; 6] = [
        TimerId::SensorConnect,
        TimerId::SmpTransfer,
        TimerId::Inactivity,
        TimerId::AdvWatchdog,
        TimerId::ConnectableAdv,
        TimerId::AdvUpdate,
    ];

    const fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Deadline {
    at_ms: u64,
    period_ms: Option<u64>,
}

/// Deadline per [`TimerId`].
#[derive(Debug, Default)]
pub struct TimerWheel {
    slots: [Option<Deadline>; 6],
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)arm a one-shot `after` from `now_ms`.
    pub fn start(&mut self, id: TimerId, now_ms: u64, after: Duration) {
        self.slots[id.slot()] = Some(Deadline {
            at_ms: now_ms + after.as_millis() as u64,
            period_ms: None,
        });
    }

    /// (Re)arm a periodic timer; first expiry one period from `now_ms`.
    pub fn start_periodic(&mut self, id: TimerId, now_ms: u64, period: Duration) {
        let period_ms = (period.as_millis() as u64).max(1);
        self.slots[id.slot()] = Some(Deadline {
            at_ms: now_ms + period_ms,
            period_ms: Some(period_ms),
        });
    }

    pub fn stop(&mut self, id: TimerId) {
        self.slots[id.slot()] = None;
    }

    pub fn is_running(&self, id: TimerId) -> bool {
        self.slots[id.slot()].is_some()
    }

    /// Earliest deadline, for sizing the poll sleep.
    pub fn next_deadline(&self) -> Option<u64> {
        self.slots.iter().flatten().map(|d| d.at_ms).min()
    }

    /// Collect timers due at `now_ms`, in [`TimerId::ALL`] order.
    pub fn expired(&mut self, now_ms: u64) -> heapless::Vec<TimerId, 6> {
        let mut fired = heapless::Vec::new();
        for id in TimerId::ALL {
            let slot = &mut self.slots[id.slot()];
            let Some(d) = *slot else { continue };
            if d.at_ms > now_ms {
                continue;
            }
            *slot = d.period_ms.map(|p| Deadline {
                at_ms: now_ms + p,
                period_ms: Some(p),
            });
            // ALL has as many ids as the vec has room.
            let _ = fired.push(id);
        }
        fired
    }
}
