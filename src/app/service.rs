//! Gateway service, the hexagonal core.
//!
//! [`GatewayService`] owns the sensor link machine, the SMP client, the
//! download context, the entry stash and the advertiser. Every stack
//! callback, SMP notification, central request and command arrives as a
//! [`GatewayEvent`]; timers and the stash drain run from [`poll`].
//!
//! ```text
//!  GatewayEvent ──▶ ┌─────────────────────────────┐ ──▶ BlePort / AdvertiserPort
//!                   │        GatewayService        │
//!  poll() ─────────▶│ machine · SMP · download ·   │ ──▶ PublishPort
//!                   │ stash · drain · advertiser   │ ──▶ EventSink, LedPort
//!                   └─────────────────────────────┘
//! ```
//!
//! [`poll`]: GatewayService::poll

use std::collections::VecDeque;

use core::time::Duration;

use log::{debug, info, warn};

use crate::central::auth::Challenge;
use crate::central::pipeline::PublishPipeline;
use crate::central::{
    CentralStats, ConnHandle, Downloader, DrainStep, Effect, InactivityWatchdog, LedIndication,
    LinkEvent, SensorState, SmpProgress, Snapshot, StashDrain, Step, step,
};
use crate::config::GatewayConfig;
use crate::crypto::{self, AesKey, DISABLED_KEY};
use crate::datalog::{ENTRY_PROTOCOL_V2, FW_VERSION_SIZE, PublishHeader};
use crate::error::{BleError, CloudError};
use crate::peripheral::intercept::{self, NvWrite};
use crate::peripheral::{AdvMode, Advertiser};
use crate::publish::{PublishOutcome, PublishPort, Topics};
use crate::smp::{Command, FileResponse, MgmtErr, NotifyOutcome, Response, SmpClient};
use crate::stash::EntryStash;
use crate::timers::{TimerId, TimerWheel};

use super::commands::GatewayCommand;
use super::events::{CtEvent, GatewayEvent};
use super::ports::{EventSink, GatewayIo, StorageError};

/// Fixed part of the synthetic test entry; the rest is zero padding.
const DUMMY_ENTRY_PREFIX: usize = 16;

/// Who the gateway is on the air and in the cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayIdentity {
    /// Cloud client id; part of every topic.
    pub id: String,
    /// Identity address of the BLE controller.
    pub addr: [u8; 6],
    pub fw_version: [u8; FW_VERSION_SIZE],
}

impl GatewayIdentity {
    /// `major.minor.patch` packed the way the publish header carries it.
    pub fn fw_version_bytes(major: u8, minor: u8, patch: u16) -> [u8; FW_VERSION_SIZE] {
        let [lo, hi] = patch.to_le_bytes();
        [major, minor, lo, hi]
    }
}

// ───────────────────────────────────────────────────────────────
// GatewayService
// ───────────────────────────────────────────────────────────────

pub struct GatewayService<P> {
    config: GatewayConfig,
    identity: GatewayIdentity,

    // Sensor link
    state: SensorState,
    sensor_conn: Option<ConnHandle>,
    stats: CentralStats,
    smp: SmpClient,
    challenge: Challenge,
    downloader: Downloader,
    key: AesKey,
    encrypt: bool,
    log_publishing: bool,
    log_transfer_active: bool,

    // Publish path
    stash: EntryStash,
    drain: StashDrain,
    publisher: P,
    topics: Topics,

    // Timers and the peripheral role
    timers: TimerWheel,
    inactivity: InactivityWatchdog,
    advertiser: Advertiser,
    initialized: bool,
}

impl<P: PublishPort> GatewayService<P> {
    /// Construct the service. Nothing touches the radio until [`init`].
    ///
    /// [`init`]: Self::init
    pub fn new(config: GatewayConfig, publisher: P, identity: GatewayIdentity) -> Self {
        let timeout = Duration::from_millis(u64::from(config.publish_timeout_ms));
        Self {
            state: SensorState::FindingDevice,
            sensor_conn: None,
            stats: CentralStats::default(),
            smp: SmpClient::new(config.smp_rsp_buffer_size, config.download_chunk_size),
            challenge: Challenge::new(),
            downloader: Downloader::new(config.log_download_buffer_size, config.publish_entries),
            key: DISABLED_KEY,
            encrypt: false,
            log_publishing: false,
            log_transfer_active: false,
            stash: EntryStash::new(config.stash_capacity()),
            drain: StashDrain::new(
                config.stash_failure_max,
                config.reboot_on_stash_failure,
                config.reboot_delay_ms,
                timeout,
            ),
            publisher,
            topics: Topics::new(&config.topic_prefix, &identity.id),
            timers: TimerWheel::new(),
            inactivity: InactivityWatchdog::new(
                config.inactivity_tick_secs,
                config.inactivity_timeout_secs,
            ),
            advertiser: Advertiser::new(config.default_network_id, identity.addr),
            initialized: false,
            config,
            identity,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Load persisted settings, start advertising and scanning.
    pub fn init(&mut self, io: &mut impl GatewayIo, sink: &mut impl EventSink) {
        let network_id = io.network_id().unwrap_or(self.config.default_network_id);
        self.advertiser.set_network_id(network_id);
        if let Some(prefix) = io.topic_prefix() {
            self.topics.set_prefix(&prefix, &self.identity.id);
        }
        self.key = io.aes_key();
        let commissioned = io.commissioned();

        let led = self.advertiser.start(io, commissioned);
        self.after_adv_start(io, led, sink);

        let now = io.uptime_ms();
        if self.config.inactivity_tick_secs > 0 {
            self.timers.start_periodic(
                TimerId::Inactivity,
                now,
                secs(self.config.inactivity_tick_secs),
            );
        }
        if self.config.adv_watchdog_secs > 0 {
            self.timers
                .start(TimerId::AdvWatchdog, now, secs(self.config.adv_watchdog_secs));
        }
        if let Err(e) = io.start_scan() {
            warn!("CT: scan start failed: {}", e);
        }

        self.initialized = true;
        info!(
            "CT: gateway {} up (network id {:04X}, {})",
            self.identity.id,
            network_id,
            if commissioned { "commissioned" } else { "not commissioned" }
        );
        sink.emit(&CtEvent::Started {
            network_id,
            commissioned,
        });
    }

    /// Route one inbound event.
    pub fn handle_event(
        &mut self,
        event: GatewayEvent,
        io: &mut impl GatewayIo,
        sink: &mut impl EventSink,
    ) {
        match event {
            GatewayEvent::Ble(LinkEvent::Connected { conn, status })
                if self.sensor_conn != Some(conn) =>
            {
                self.on_central_connected(conn, status, io, sink);
            }
            GatewayEvent::Ble(LinkEvent::Disconnected { conn, .. })
                if self.sensor_conn != Some(conn) =>
            {
                self.on_central_disconnected(conn, io, sink);
            }
            GatewayEvent::Ble(link) => self.dispatch(link, io, sink),
            GatewayEvent::SmpNotify(data) => self.on_notify(data.as_deref(), io, sink),
            GatewayEvent::SmpRequest { conn, frame } => self.on_smp_request(conn, &frame, io),
            GatewayEvent::Command(cmd) => self.handle_command(cmd, io, sink),
        }
    }

    /// Fire expired timers, then run one stash drain round.
    pub fn poll(&mut self, io: &mut impl GatewayIo, sink: &mut impl EventSink) {
        for id in self.timers.expired(io.uptime_ms()) {
            self.on_timer(id, io, sink);
        }

        let link_idle = self.state == SensorState::FindingDevice && self.sensor_conn.is_none();
        let cloud_ready = io.ready_for_publish();
        let epoch = io.epoch();
        match self.drain.step(
            &mut self.stash,
            &mut self.publisher,
            cloud_ready,
            link_idle,
            self.topics.up(),
            epoch,
        ) {
            DrainStep::Idle | DrainStep::Requeue => {}
            DrainStep::Finished => sink.emit(&CtEvent::StashDrained),
            DrainStep::Reset(reason) => {
                warn!("CT: stash reset ({})", reason.as_str());
                sink.emit(&CtEvent::StashReset(reason));
            }
            DrainStep::Reboot { delay_ms } => {
                sink.emit(&CtEvent::Rebooting {
                    delay_ms,
                    reason: "stash publish failures",
                });
                io.reboot(delay_ms);
            }
        }
    }

    /// Monotonic time of the next timer expiry, if any timer runs.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    // ── Commands ──────────────────────────────────────────────

    pub fn handle_command(
        &mut self,
        cmd: GatewayCommand,
        io: &mut impl GatewayIo,
        sink: &mut impl EventSink,
    ) {
        debug!("CT: command {:?}", cmd);
        match cmd {
            GatewayCommand::Button => self.on_button(io, sink),
            GatewayCommand::PublishDummyData => {
                if let Err(e) = self.publish_dummy_data(io, sink) {
                    warn!("CT: dummy publish failed: {}", e);
                }
            }
            GatewayCommand::SendEcho(n) => self.send_echo(n, io),
            GatewayCommand::SetNetworkId(id) => {
                if let Err(e) = self.set_network_id(id, io, sink) {
                    warn!("CT: network id not stored: {}", e);
                }
            }
            GatewayCommand::DisconnectSensor => {
                if self.sensor_conn.is_some() {
                    self.execute_all(&[Effect::Disconnect], io, sink);
                }
            }
        }
    }

    /// Publish one synthetic V2 entry stamped with the gateway identity.
    pub fn publish_dummy_data(
        &mut self,
        io: &mut impl GatewayIo,
        sink: &mut impl EventSink,
    ) -> Result<(), CloudError> {
        if !io.ready_for_publish() {
            return Err(CloudError::NotConnected);
        }
        let epoch = io.epoch();
        let header = PublishHeader {
            version: ENTRY_PROTOCOL_V2,
            device_id: self.identity.addr,
            device_time: epoch,
            last_upload_time: 0,
            fw_version: self.identity.fw_version,
            battery_level: 0,
            network_id: self.advertiser.network_id(),
        }
        .to_bytes();
        let entry = dummy_entry(&self.identity.addr, epoch, self.config.dummy_entry_size);

        let timeout = self.publish_timeout();
        if !self.publisher.acquire(timeout) {
            return Err(CloudError::Timeout);
        }
        let ticket = self.publisher.submit(self.topics.up(), &header, &entry)?;
        match self.publisher.wait(&ticket, timeout) {
            Some(PublishOutcome::Success) => {
                sink.emit(&CtEvent::EntryPublished { size: entry.len() });
                Ok(())
            }
            Some(PublishOutcome::Fail) => Err(CloudError::Publish(-1)),
            None => Err(CloudError::Timeout),
        }
    }

    /// Change the advertised network id and persist it.
    pub fn set_network_id(
        &mut self,
        id: u16,
        io: &mut impl GatewayIo,
        sink: &mut impl EventSink,
    ) -> Result<(), StorageError> {
        io.set_network_id(id)?;
        self.apply_network_id(id, io, sink);
        Ok(())
    }

    // ── Status surface ────────────────────────────────────────

    pub fn state(&self) -> SensorState {
        self.state
    }

    pub fn stats(&self) -> CentralStats {
        self.stats
    }

    pub fn is_publishing_log(&self) -> bool {
        self.log_publishing
    }

    pub fn log_transfer_active(&self) -> bool {
        self.log_transfer_active
    }

    pub fn is_connected_to_sensor(&self) -> bool {
        self.sensor_conn.is_some()
    }

    pub fn is_connected_to_central(&self) -> bool {
        self.advertiser.central().is_some()
    }

    pub fn num_connections(&self) -> u32 {
        self.stats.connections
    }

    pub fn num_download_starts(&self) -> u32 {
        self.stats.download_starts
    }

    pub fn num_download_completions(&self) -> u32 {
        self.stats.download_completions
    }

    pub fn num_scan_results(&self) -> u32 {
        self.stats.all_ads
    }

    pub fn num_ct_scan_results(&self) -> u32 {
        self.stats.ct_ads
    }

    pub fn network_id(&self) -> u16 {
        self.advertiser.network_id()
    }

    pub fn adv_mode(&self) -> AdvMode {
        self.advertiser.mode()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn stash(&self) -> &EntryStash {
        &self.stash
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    // ── Sensor link ───────────────────────────────────────────

    fn snapshot(&self, io: &impl GatewayIo) -> Snapshot {
        Snapshot {
            state: self.state,
            sensor_conn: self.sensor_conn,
            cloud_ready: io.ready_for_publish(),
            stash_pending: self.stash.is_available(),
            encryption_enabled: crypto::encryption_enabled(&self.key),
            adv_watchdog_enabled: self.config.adv_watchdog_secs > 0,
        }
    }

    /// Feed `event` to the machine, then every event its effects produce.
    fn dispatch(&mut self, event: LinkEvent, io: &mut impl GatewayIo, sink: &mut impl EventSink) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let Step { next, effects } = step(&self.snapshot(&*io), &event);
            if next != self.state {
                debug!("CT: {:?} -> {:?}", self.state, next);
                sink.emit(&CtEvent::StateChanged {
                    from: self.state,
                    to: next,
                });
                self.state = next;
            }
            for effect in effects {
                self.execute(effect, io, sink, &mut queue);
            }
        }
    }

    fn execute_all(&mut self, effects: &[Effect], io: &mut impl GatewayIo, sink: &mut impl EventSink) {
        let mut queue = VecDeque::new();
        for &effect in effects {
            self.execute(effect, io, sink, &mut queue);
        }
        while let Some(event) = queue.pop_front() {
            self.dispatch(event, io, sink);
        }
    }

    fn execute(
        &mut self,
        effect: Effect,
        io: &mut impl GatewayIo,
        sink: &mut impl EventSink,
        queue: &mut VecDeque<LinkEvent>,
    ) {
        match effect {
            Effect::CountAd => self.stats.all_ads = self.stats.all_ads.wrapping_add(1),
            Effect::CountCtAd => self.stats.ct_ads = self.stats.ct_ads.wrapping_add(1),
            Effect::CountConnection => {
                self.stats.connections = self.stats.connections.wrapping_add(1)
            }
            Effect::RestartTimer(id) => self.restart_timer(id, io.uptime_ms()),
            Effect::StopTimer(id) => self.timers.stop(id),
            Effect::LogIgnored(reason) => {
                if self.stats.all_ads % self.config.adv_log_filter_cnt.max(1) == 0 {
                    sink.emit(&CtEvent::AdIgnored {
                        reason,
                        all_ads: self.stats.all_ads,
                    });
                }
            }
            Effect::StartScan => {
                if let Err(e) = io.start_scan() {
                    warn!("CT: scan start failed: {}", e);
                }
            }
            Effect::StopScan => {
                if let Err(e) = io.stop_scan() {
                    warn!("CT: scan stop failed: {}", e);
                }
            }
            Effect::Connect(addr) => match io.connect(&addr) {
                Ok(conn) => {
                    info!("CT: connecting to {}", addr);
                    self.sensor_conn = Some(conn);
                    sink.emit(&CtEvent::SensorFound { addr });
                }
                Err(e) => {
                    warn!("CT: create connection failed: {}", e);
                    queue.push_back(LinkEvent::ConnectFailed);
                }
            },
            Effect::MarkActive => self.inactivity.mark_active(),
            Effect::ExchangeMtu => {
                if let Some(conn) = self.sensor_conn {
                    if let Err(e) = io.exchange_mtu(conn) {
                        warn!("CT: MTU exchange failed: {}", e);
                        queue.push_back(LinkEvent::MtuExchanged { ok: false });
                    }
                }
            }
            Effect::DiscoverService => {
                if let Some(conn) = self.sensor_conn {
                    if let Err(e) = io.discover_smp_service(conn) {
                        warn!("CT: service discovery failed: {}", e);
                        queue.push_back(LinkEvent::ServiceDiscovered { ok: false });
                    }
                }
            }
            Effect::DiscoverCharacteristic => {
                if let Some(conn) = self.sensor_conn {
                    if let Err(e) = io.discover_smp_characteristic(conn) {
                        warn!("CT: characteristic discovery failed: {}", e);
                        queue.push_back(LinkEvent::CharacteristicDiscovered { ok: false });
                    }
                }
            }
            Effect::DiscoverCcc => {
                if let Some(conn) = self.sensor_conn {
                    if let Err(e) = io.discover_ccc(conn) {
                        warn!("CT: CCC discovery failed: {}", e);
                        queue.push_back(LinkEvent::CccDiscovered { ok: false });
                    }
                }
            }
            Effect::Subscribe => {
                if let Some(conn) = self.sensor_conn {
                    if let Err(e) = io.subscribe(conn) {
                        warn!("CT: subscribe failed: {}", e);
                        queue.push_back(LinkEvent::Subscribed { ok: false });
                    }
                }
            }
            Effect::Led(led) => {
                let led = match (led, self.advertiser.mode()) {
                    (LedIndication::Searching, AdvMode::Connectable) => {
                        LedIndication::SearchingConnectable
                    }
                    (led, _) => led,
                };
                io.indicate(led);
            }
            Effect::SendChallengeRead(off) => {
                if off == 0 {
                    self.challenge.reset();
                }
                let sent = self.smp.send_challenge_read(io, off);
                queue.push_back(sent_event(Command::ChallengeRead, sent.is_ok()));
            }
            Effect::SendChallengeWrite => {
                let sent = self.smp.send_challenge_write(io, self.challenge.response());
                queue.push_back(sent_event(Command::ChallengeWrite, sent.is_ok()));
            }
            Effect::SendDownload(off) => {
                let sent = self.smp.send_download(io, off);
                if sent.is_ok() {
                    self.log_transfer_active = true;
                }
                queue.push_back(sent_event(Command::FileDownload, sent.is_ok()));
            }
            Effect::ResetDownload => self.downloader.reset(),
            Effect::SetEncrypt(on) => self.encrypt = on,
            Effect::Disconnect => {
                self.stash.mark_available();
                if let Some(conn) = self.sensor_conn {
                    if let Err(e) = io.disconnect(conn) {
                        // The stack will not report this link again.
                        warn!("CT: disconnect failed: {}", e);
                        queue.push_back(LinkEvent::Disconnected { conn, reason: 0 });
                    }
                }
            }
            Effect::ResetSmp => {
                self.smp.reset();
                self.challenge.reset();
            }
            Effect::ClearPublishing => {
                self.log_publishing = false;
                self.log_transfer_active = false;
            }
            Effect::FlagStash => {
                if self.stash.mark_available() {
                    debug!("CT: {} stashed bytes wait for the drain", self.stash.len());
                }
            }
            Effect::ReleaseConnection => {
                if let Some(conn) = self.sensor_conn.take() {
                    io.release(conn);
                }
            }
            Effect::Reboot => {
                let delay_ms = self.config.reboot_delay_ms;
                sink.emit(&CtEvent::Rebooting {
                    delay_ms,
                    reason: "no advertisements",
                });
                io.reboot(delay_ms);
            }
        }
    }

    fn restart_timer(&mut self, id: TimerId, now: u64) {
        let after = match id {
            TimerId::SensorConnect => secs(self.config.sensor_connect_timeout_secs),
            TimerId::SmpTransfer => secs(self.config.smp_timeout_secs),
            TimerId::AdvWatchdog => secs(self.config.adv_watchdog_secs),
            TimerId::ConnectableAdv => secs(self.config.connectable_adv_window_secs),
            TimerId::Inactivity | TimerId::AdvUpdate => {
                debug!("CT: {:?} is periodic", id);
                return;
            }
        };
        self.timers.start(id, now, after);
    }

    fn on_timer(&mut self, id: TimerId, io: &mut impl GatewayIo, sink: &mut impl EventSink) {
        match id {
            TimerId::Inactivity => {
                if self.inactivity.tick(self.sensor_conn.is_some()) {
                    self.dispatch(LinkEvent::Inactive, io, sink);
                }
            }
            TimerId::ConnectableAdv => {
                info!("ADV: connectable window closed");
                let commissioned = io.commissioned();
                let led = self
                    .advertiser
                    .set_mode(io, AdvMode::NonConnectable, commissioned);
                self.after_adv_start(io, led, sink);
            }
            TimerId::AdvUpdate => {
                let commissioned = io.commissioned();
                let epoch = io.epoch();
                if let Err(e) = self.advertiser.refresh(io, commissioned, epoch) {
                    debug!("ADV: refresh failed: {}", e);
                }
            }
            TimerId::SensorConnect | TimerId::SmpTransfer | TimerId::AdvWatchdog => {
                self.dispatch(LinkEvent::Timeout(id), io, sink);
            }
        }
    }

    // ── SMP responses ─────────────────────────────────────────

    fn on_notify(&mut self, data: Option<&[u8]>, io: &mut impl GatewayIo, sink: &mut impl EventSink) {
        let (command, result) = match self.smp.on_notify(data) {
            NotifyOutcome::InProgress => {
                self.inactivity.mark_active();
                return;
            }
            NotifyOutcome::Unsolicited | NotifyOutcome::NotificationsDisabled => return,
            NotifyOutcome::Complete(command, result) => (command, result),
        };
        self.inactivity.mark_active();

        if command == Command::Echo {
            match result {
                Ok(Response::Echo(echo)) => info!("SMP: echo '{}'", echo.r),
                Ok(other) => warn!("SMP: unexpected echo response {:?}", other),
                Err(e) => warn!("SMP: echo failed: {}", e),
            }
            return;
        }
        self.timers.stop(TimerId::SmpTransfer);

        let cloud_ready = io.ready_for_publish();
        let progress = match result {
            Err(e) => {
                warn!("SMP: {:?} failed: {}", command, e);
                SmpProgress::Failed(e.mgmt_err())
            }
            Ok(Response::Echo(_)) => SmpProgress::Failed(MgmtErr::ENotSup),
            Ok(Response::File(rsp)) => match command {
                Command::ChallengeRead => self.challenge.on_read(&rsp, cloud_ready, &self.key),
                Command::ChallengeWrite => self.challenge.on_write(&rsp, cloud_ready),
                _ => self.on_download_chunk(&rsp, io, sink),
            },
        };
        self.dispatch(LinkEvent::Smp(progress), io, sink);
    }

    fn on_download_chunk(
        &mut self,
        rsp: &FileResponse,
        io: &mut impl GatewayIo,
        sink: &mut impl EventSink,
    ) -> SmpProgress {
        let cloud_ready = io.ready_for_publish();
        let key = self.encrypt.then_some(&self.key);
        let mut pipeline = PublishPipeline::new(
            &mut self.stash,
            &mut self.publisher,
            sink,
            self.topics.up(),
            io.epoch(),
            Duration::from_millis(u64::from(self.config.publish_timeout_ms)),
            self.config.publish_buffer_size,
        );
        if !cloud_ready {
            warn!("CT: cloud not ready, stashing chunk and dropping sensor");
            pipeline.stash_remaining();
        }
        let result = self.downloader.process(rsp, key, &mut pipeline);
        let abort = pipeline.disconnect_requested();
        let pushed = pipeline.stats();

        let outcome = match result {
            Ok(o) => o,
            Err(rc) => return SmpProgress::Failed(rc),
        };
        debug!(
            "CT: chunk {}/{} ({} published, {} stashed)",
            self.downloader.downloaded(),
            self.downloader.file_size(),
            pushed.published,
            pushed.stashed
        );

        if outcome.started {
            self.stats.download_starts = self.stats.download_starts.wrapping_add(1);
            self.log_publishing = self.config.publish_entries;
            let version = self.downloader.log_header().map_or(0, |h| h.version);
            sink.emit(&CtEvent::DownloadStarted {
                version,
                file_size: self.downloader.file_size(),
            });
        }
        if outcome.complete {
            self.stats.download_completions = self.stats.download_completions.wrapping_add(1);
            self.log_publishing = false;
            if !self.stash.is_available() {
                self.stash.reset();
            }
            sink.emit(&CtEvent::DownloadCompleted {
                entries: self.downloader.entry_count(),
                records: self.downloader.record_count(),
            });
        }

        if abort {
            return SmpProgress::Abort;
        }
        SmpProgress::Chunk {
            next_off: outcome.next_off,
            done: outcome.complete,
        }
    }

    fn send_echo(&mut self, n: u32, io: &mut impl GatewayIo) {
        if self.sensor_conn.is_none() {
            warn!("SMP: echo needs a sensor link");
            return;
        }
        match self.smp.send_echo(io, n) {
            Ok(()) => self.inactivity.mark_active(),
            Err(e) => warn!("SMP: echo not sent: {}", e),
        }
    }

    // ── Peripheral role ───────────────────────────────────────

    /// Common tail of every advertising (re)start.
    fn after_adv_start(
        &mut self,
        io: &mut impl GatewayIo,
        led: Result<LedIndication, BleError>,
        sink: &mut impl EventSink,
    ) {
        let now = io.uptime_ms();
        if io.commissioned() {
            self.timers.start_periodic(
                TimerId::AdvUpdate,
                now,
                Duration::from_millis(u64::from(self.config.ad_update_rate_ms)),
            );
        } else {
            self.timers.stop(TimerId::AdvUpdate);
        }
        match led {
            Ok(led) => {
                if self.sensor_conn.is_none() {
                    io.indicate(led);
                }
                sink.emit(&CtEvent::AdvertisingChanged(self.advertiser.mode()));
            }
            Err(e) => warn!("ADV: start failed: {}", e),
        }
    }

    fn on_button(&mut self, io: &mut impl GatewayIo, sink: &mut impl EventSink) {
        let commissioned = io.commissioned();
        match self.advertiser.on_button(io, commissioned) {
            Ok(Some(led)) => {
                if self.config.connectable_adv_window_secs > 0 {
                    self.restart_timer(TimerId::ConnectableAdv, io.uptime_ms());
                }
                self.after_adv_start(io, Ok(led), sink);
            }
            Ok(None) => {}
            Err(e) => warn!("ADV: button ignored: {}", e),
        }
    }

    fn on_central_connected(
        &mut self,
        conn: ConnHandle,
        status: u8,
        io: &mut impl GatewayIo,
        sink: &mut impl EventSink,
    ) {
        if status != 0 {
            warn!("ADV: central connection failed ({})", status);
            return;
        }
        self.timers.stop(TimerId::ConnectableAdv);
        let commissioned = io.commissioned();
        let led = self.advertiser.on_central_connected(io, conn, commissioned);
        self.after_adv_start(io, led, sink);
        sink.emit(&CtEvent::CentralConnected(conn));
    }

    fn on_central_disconnected(
        &mut self,
        conn: ConnHandle,
        io: &mut impl GatewayIo,
        sink: &mut impl EventSink,
    ) {
        let commissioned = io.commissioned();
        if let Some(led) = self.advertiser.on_central_disconnected(io, conn, commissioned) {
            self.after_adv_start(io, led, sink);
            sink.emit(&CtEvent::CentralDisconnected(conn));
        }
    }

    /// A central wrote a file; map it onto a setting and answer.
    fn on_smp_request(&mut self, conn: ConnHandle, frame: &[u8], io: &mut impl GatewayIo) {
        if self.advertiser.central() != Some(conn) {
            warn!("NV: request from unknown connection {:?}", conn);
            return;
        }
        let (hdr, upload) = match intercept::decode_request(frame) {
            Ok(req) => req,
            Err(e) => {
                warn!("NV: bad request: {}", e);
                return;
            }
        };

        let rc = match intercept::map_upload(&upload, self.config.download_chunk_size) {
            Ok(write) => match intercept::apply(&write, io) {
                Ok(()) => {
                    self.apply_nv_write(write);
                    MgmtErr::EOk
                }
                Err(rc) => rc,
            },
            Err(rc) => rc,
        };

        match intercept::response_frame(&hdr, rc, upload.data.len() as u32) {
            Ok(rsp) => {
                if let Err(e) = io.send_smp_response(conn, &rsp) {
                    warn!("NV: response not sent: {}", e);
                }
            }
            Err(e) => warn!("NV: response encoding failed: {}", e),
        }
    }

    /// Bring in-memory state in line with a persisted write.
    fn apply_nv_write(&mut self, write: NvWrite) {
        match write {
            NvWrite::NetworkId(id) => {
                // Picked up by the next advertisement refresh.
                self.advertiser.set_network_id(id);
            }
            NvWrite::AesKey(key) => self.key = key,
            NvWrite::TopicPrefix(prefix) => self.topics.set_prefix(&prefix, &self.identity.id),
        }
    }

    fn apply_network_id(&mut self, id: u16, io: &mut impl GatewayIo, sink: &mut impl EventSink) {
        self.advertiser.set_network_id(id);
        let commissioned = io.commissioned();
        let epoch = io.epoch();
        if self.advertiser.is_started() {
            if let Err(e) = self.advertiser.refresh(io, commissioned, epoch) {
                debug!("ADV: refresh failed: {}", e);
            }
        }
        info!("CT: network id {:04X}", id);
        sink.emit(&CtEvent::NetworkIdChanged(id));
    }

    fn publish_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.config.publish_timeout_ms))
    }
}

fn secs(s: u32) -> Duration {
    Duration::from_secs(u64::from(s))
}

fn sent_event(command: Command, ok: bool) -> LinkEvent {
    if ok {
        LinkEvent::CommandSent(command)
    } else {
        LinkEvent::SendFailed
    }
}

/// Synthetic V2 entry used to test the cloud path end to end.
pub fn dummy_entry(addr: &[u8; 6], epoch: u32, size: usize) -> Vec<u8> {
    let mut e = vec![0u8; size.max(DUMMY_ENTRY_PREFIX)];
    e[2..8].copy_from_slice(addr);
    e[8..12].copy_from_slice(&epoch.to_le_bytes());
    e[12..16].copy_from_slice(&[0x18, 0x00, 0x11, 0x00]);
    e
}
