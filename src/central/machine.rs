//! Sensor link state machine.
//!
//! A pure transition function: the current [`Snapshot`] plus one
//! [`LinkEvent`] give the next [`SensorState`] and a list of [`Effect`]s for
//! the service to execute against the BLE stack, the SMP client and the
//! timers. Effects whose execution completes asynchronously (connect,
//! discovery, command writes) report back as further `LinkEvent`s.
//!
//! ```text
//!  FindingDevice ──adv──▶ (connecting) ──connected──▶ FindingService
//!        ▲                                                │ mtu, service
//!        │                                          FindingSmpChar
//!        │                                                │ characteristic
//!        │                                       EnablingNotifications
//!        │                                                │ ccc, subscribe
//!        │                                     ConnectedAndConfigured
//!        │                                     key?  │            │ no key
//!        │                                  ChallengeReq          │
//!        │                                           │            │
//!        │                                  ChallengeRsp          │
//!        │                                           ▼            ▼
//!        └──────────── teardown (any disconnect) ─── LogDownload ◀┘
//! ```

use log::{debug, warn};

use super::scan::{self, AdvReport, IgnoreReason, ScanGate, ScanVerdict};
use super::state::{BtAddr, ConnHandle, LedIndication, SensorState};
use crate::smp::{Command, MgmtErr};
use crate::timers::TimerId;

/// Room for the longest effect list (teardown after a failed connect).
pub const MAX_EFFECTS: usize = 12;

// ── Inputs ───────────────────────────────────────────────────

/// What the machine may look at besides its own state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshot {
    pub state: SensorState,
    /// Connection being established or in use to a sensor.
    pub sensor_conn: Option<ConnHandle>,
    pub cloud_ready: bool,
    /// Stashed entries wait for the drain.
    pub stash_pending: bool,
    /// A non-erased AES key is configured.
    pub encryption_enabled: bool,
    pub adv_watchdog_enabled: bool,
}

/// Outcome of a completed SMP response, already interpreted by the
/// challenge or download handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmpProgress {
    /// Part of the challenge arrived; read on from `next_off`.
    ChallengeChunk { next_off: u32 },
    /// The challenge is encrypted and ready to write back.
    ChallengeReady,
    /// The sensor accepted the challenge response.
    Authenticated,
    /// The sensor has no authentication; download in the clear.
    AuthSkipped,
    /// A log chunk was processed.
    Chunk { next_off: u32, done: bool },
    /// Stop the transfer (publish path gave up on the link).
    Abort,
    Failed(MgmtErr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Advertisement(AdvReport),
    /// The stack refused to start a connection.
    ConnectFailed,
    Connected { conn: ConnHandle, status: u8 },
    Disconnected { conn: ConnHandle, reason: u8 },
    MtuExchanged { ok: bool },
    ServiceDiscovered { ok: bool },
    CharacteristicDiscovered { ok: bool },
    CccDiscovered { ok: bool },
    Subscribed { ok: bool },
    /// A command went out on the SMP characteristic.
    CommandSent(Command),
    /// A command could not be written.
    SendFailed,
    Smp(SmpProgress),
    Timeout(TimerId),
    /// The inactivity watchdog tripped.
    Inactive,
}

// ── Outputs ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    CountAd,
    CountCtAd,
    CountConnection,
    RestartTimer(TimerId),
    StopTimer(TimerId),
    /// Log (throttled) why an advertisement was skipped.
    LogIgnored(IgnoreReason),
    StartScan,
    StopScan,
    Connect(BtAddr),
    /// Note link activity for the inactivity watchdog.
    MarkActive,
    ExchangeMtu,
    DiscoverService,
    DiscoverCharacteristic,
    DiscoverCcc,
    Subscribe,
    Led(LedIndication),
    SendChallengeRead(u32),
    SendChallengeWrite,
    SendDownload(u32),
    /// Fresh download context for a new file transfer.
    ResetDownload,
    SetEncrypt(bool),
    /// Ask the stack to drop the sensor link and flag stashed entries.
    Disconnect,
    // Teardown pieces, in execution order.
    ResetSmp,
    ClearPublishing,
    FlagStash,
    ReleaseConnection,
    Reboot,
}

pub type Effects = heapless::Vec<Effect, MAX_EFFECTS>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub next: SensorState,
    pub effects: Effects,
}

impl Step {
    fn stay(state: SensorState) -> Self {
        Self {
            next: state,
            effects: Effects::new(),
        }
    }

    fn to(next: SensorState) -> Self {
        Self::stay(next)
    }

    fn push(&mut self, effect: Effect) -> &mut Self {
        if self.effects.push(effect).is_err() {
            warn!("CT: effect list full, dropped {:?}", effect);
        }
        self
    }

    fn disconnect(state: SensorState) -> Self {
        let mut s = Self::stay(state);
        s.push(Effect::Disconnect);
        s
    }

    /// Single cleanup path for every way a sensor link ends.
    fn teardown() -> Self {
        let mut s = Self::to(SensorState::FindingDevice);
        s.push(Effect::StopTimer(TimerId::SensorConnect))
            .push(Effect::StopTimer(TimerId::SmpTransfer))
            .push(Effect::ResetSmp)
            .push(Effect::ClearPublishing)
            .push(Effect::FlagStash)
            .push(Effect::ReleaseConnection)
            .push(Effect::SetEncrypt(false))
            .push(Effect::Led(LedIndication::Searching))
            .push(Effect::StartScan);
        s
    }
}

// ── Transition function ──────────────────────────────────────

pub fn step(snap: &Snapshot, event: &LinkEvent) -> Step {
    let state = snap.state;
    match event {
        LinkEvent::Advertisement(report) => on_advertisement(snap, report),

        LinkEvent::ConnectFailed => Step::teardown(),

        LinkEvent::Connected { conn, status } => {
            if snap.sensor_conn != Some(*conn) {
                return Step::stay(state);
            }
            if *status != 0 {
                warn!("CT: failed to connect to sensor ({})", status);
                return Step::teardown();
            }
            let mut s = Step::to(SensorState::FindingService);
            s.push(Effect::MarkActive)
                .push(Effect::SetEncrypt(false))
                .push(Effect::CountConnection)
                .push(Effect::StopTimer(TimerId::SensorConnect))
                .push(Effect::ExchangeMtu);
            s
        }

        LinkEvent::Disconnected { conn, reason } => {
            if snap.sensor_conn != Some(*conn) {
                return Step::stay(state);
            }
            debug!("CT: sensor disconnected (reason {})", reason);
            Step::teardown()
        }

        _ if snap.sensor_conn.is_none() => {
            // Late completion for a link that is already gone.
            if let LinkEvent::Timeout(TimerId::AdvWatchdog) = event {
                return on_timeout(snap, TimerId::AdvWatchdog);
            }
            Step::stay(state)
        }

        LinkEvent::MtuExchanged { ok } => {
            discovery(state, *ok, SensorState::FindingService, Effect::DiscoverService)
        }
        LinkEvent::ServiceDiscovered { ok } => discovery(
            state,
            *ok,
            SensorState::FindingSmpChar,
            Effect::DiscoverCharacteristic,
        ),
        LinkEvent::CharacteristicDiscovered { ok } => discovery(
            state,
            *ok,
            SensorState::EnablingNotifications,
            Effect::DiscoverCcc,
        ),
        LinkEvent::CccDiscovered { ok } => discovery(
            state,
            *ok,
            SensorState::EnablingNotifications,
            Effect::Subscribe,
        ),
        LinkEvent::Subscribed { ok } => {
            if !ok {
                return Step::disconnect(state);
            }
            let mut s = Step::to(SensorState::ConnectedAndConfigured);
            s.push(Effect::Led(LedIndication::Connected));
            if snap.encryption_enabled {
                s.push(Effect::SendChallengeRead(0));
            } else {
                s.push(Effect::ResetDownload).push(Effect::SendDownload(0));
            }
            s
        }

        LinkEvent::CommandSent(command) => {
            let next = match command {
                Command::ChallengeRead => SensorState::ChallengeReq,
                Command::ChallengeWrite => SensorState::ChallengeRsp,
                Command::FileDownload => SensorState::LogDownload,
                Command::Echo => state,
            };
            let mut s = Step::to(next);
            s.push(Effect::MarkActive)
                .push(Effect::RestartTimer(TimerId::SmpTransfer));
            s
        }

        LinkEvent::SendFailed => Step::disconnect(state),

        LinkEvent::Smp(progress) => on_smp(state, *progress),

        LinkEvent::Timeout(id) => on_timeout(snap, *id),

        LinkEvent::Inactive => {
            warn!("CT: sensor link inactive");
            Step::disconnect(state)
        }
    }
}

fn on_advertisement(snap: &Snapshot, report: &AdvReport) -> Step {
    let mut s = Step::stay(snap.state);
    s.push(Effect::CountAd);
    if snap.adv_watchdog_enabled {
        s.push(Effect::RestartTimer(TimerId::AdvWatchdog));
    }
    let gate = ScanGate {
        connected: snap.sensor_conn.is_some(),
        cloud_ready: snap.cloud_ready,
        stash_pending: snap.stash_pending,
    };
    match scan::filter(gate, report) {
        ScanVerdict::Ignore(IgnoreReason::NotConnectable) => {}
        ScanVerdict::Ignore(reason) => {
            s.push(Effect::LogIgnored(reason));
        }
        ScanVerdict::Counted(reason) => {
            s.push(Effect::CountCtAd).push(Effect::LogIgnored(reason));
        }
        ScanVerdict::Connect => {
            s.push(Effect::CountCtAd)
                .push(Effect::StopScan)
                .push(Effect::Connect(report.addr))
                .push(Effect::RestartTimer(TimerId::SensorConnect));
        }
    }
    s
}

fn discovery(state: SensorState, ok: bool, next: SensorState, effect: Effect) -> Step {
    if !ok {
        warn!("CT: discovery failed in {:?}", state);
        return Step::disconnect(state);
    }
    let mut s = Step::to(next);
    s.push(effect);
    s
}

fn on_smp(state: SensorState, progress: SmpProgress) -> Step {
    match progress {
        SmpProgress::ChallengeChunk { next_off } => {
            let mut s = Step::stay(state);
            s.push(Effect::SendChallengeRead(next_off));
            s
        }
        SmpProgress::ChallengeReady => {
            let mut s = Step::stay(state);
            s.push(Effect::SendChallengeWrite);
            s
        }
        SmpProgress::Authenticated | SmpProgress::AuthSkipped => {
            let encrypted = progress == SmpProgress::Authenticated;
            let mut s = Step::to(SensorState::ChallengeRsp);
            s.push(Effect::SetEncrypt(encrypted))
                .push(Effect::ResetDownload)
                .push(Effect::SendDownload(0));
            s
        }
        SmpProgress::Chunk { done: true, .. } => {
            debug!("CT: log download finished");
            Step::disconnect(state)
        }
        SmpProgress::Chunk { next_off, .. } => {
            let mut s = Step::stay(state);
            s.push(Effect::SendDownload(next_off));
            s
        }
        SmpProgress::Abort => Step::disconnect(state),
        SmpProgress::Failed(rc) => {
            warn!("CT: SMP transfer failed in {:?}: {}", state, rc);
            Step::disconnect(state)
        }
    }
}

fn on_timeout(snap: &Snapshot, id: TimerId) -> Step {
    match id {
        TimerId::SensorConnect if snap.sensor_conn.is_some() => {
            warn!("CT: sensor connection timed out");
            Step::disconnect(snap.state)
        }
        TimerId::SmpTransfer if snap.sensor_conn.is_some() => {
            warn!("CT: SMP response timed out in {:?}", snap.state);
            Step::disconnect(snap.state)
        }
        TimerId::AdvWatchdog if snap.adv_watchdog_enabled => {
            warn!("CT: no advertisements received, rebooting");
            let mut s = Step::stay(snap.state);
            s.push(Effect::Reboot);
            s
        }
        _ => Step::stay(snap.state),
    }
}
