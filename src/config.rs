//! Gateway configuration parameters
//!
//! Every tunable of the contact-tracing central, the publish path and the
//! advertiser. Persisted as postcard bytes in NVS on target; JSON is
//! accepted by host tooling.

use serde::{Deserialize, Serialize};

use crate::datalog::{MAX_ENTRY_SIZE, PUBLISH_HEADER_SIZE};
use crate::error::Error;

/// Topic prefix capacity (matches the NV intercept upload limit).
pub const TOPIC_PREFIX_MAX: usize = 64;

/// Core gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    // --- Timeouts ---
    /// Bounded wait for the publish buffer and for a publish outcome (ms)
    pub publish_timeout_ms: u32,
    /// SMP response timeout, restarted on every chunk (seconds)
    pub smp_timeout_secs: u32,
    /// Sensor connection attempt timeout (seconds)
    pub sensor_connect_timeout_secs: u32,

    // --- Watchdogs ---
    /// Inactivity check period; 0 disables the check (seconds)
    pub inactivity_tick_secs: u32,
    /// Silence tolerated on a sensor link before disconnecting (seconds)
    pub inactivity_timeout_secs: u32,
    /// Reboot when no advertisement is seen for this long; 0 disables (seconds)
    pub adv_watchdog_secs: u32,

    // --- Advertising ---
    /// Connectable advertising window after a button press; 0 = no revert (seconds)
    pub connectable_adv_window_secs: u32,
    /// Advertisement refresh period while commissioned (ms)
    pub ad_update_rate_ms: u32,
    /// Log one "ignored advertisement" line per this many advertisements
    pub adv_log_filter_cnt: u32,

    // --- Stash drain ---
    /// Failed drain rounds (and acquire timeouts) before giving up
    pub stash_failure_max: u32,
    /// Reboot after giving up on a poison entry
    pub reboot_on_stash_failure: bool,
    /// Delay before the escalation reboot (ms)
    pub reboot_delay_ms: u32,

    // --- Buffers ---
    /// Download reassembly buffer; the stash is this plus one publish header
    pub log_download_buffer_size: usize,
    /// Shared cloud publish buffer
    pub publish_buffer_size: usize,
    /// SMP response reassembly buffer
    pub smp_rsp_buffer_size: usize,
    /// Largest `data` field accepted in one download response
    pub download_chunk_size: usize,
    /// Size of the synthetic entry sent by `publish_dummy_data`
    pub dummy_entry_size: usize,

    // --- Cloud ---
    pub topic_prefix: heapless::String<TOPIC_PREFIX_MAX>,
    /// Forward validated entries to the cloud/stash
    pub publish_entries: bool,

    // --- Identity ---
    /// Network id used until one is stored in NVS
    pub default_network_id: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut topic_prefix = heapless::String::new();
        let _ = topic_prefix.push_str("mg100-ct/dev/gw/");

        Self {
            // Timeouts
            publish_timeout_ms: 5_000,
            smp_timeout_secs: 10,
            sensor_connect_timeout_secs: 10,

            // Watchdogs
            inactivity_tick_secs: 60,
            inactivity_timeout_secs: 120,
            adv_watchdog_secs: 3_600, // 1 h

            // Advertising
            connectable_adv_window_secs: 60,
            ad_update_rate_ms: 1_000,
            adv_log_filter_cnt: 100,

            // Stash drain
            stash_failure_max: 24,
            reboot_on_stash_failure: true,
            reboot_delay_ms: 1_000,

            // Buffers
            log_download_buffer_size: 4_096,
            publish_buffer_size: 512,
            smp_rsp_buffer_size: 2_048,
            download_chunk_size: 512,
            dummy_entry_size: 22,

            topic_prefix,
            publish_entries: true,

            default_network_id: 0xFFFF,
        }
    }
}

impl GatewayConfig {
    /// Stash capacity derived from the download buffer.
    pub fn stash_capacity(&self) -> usize {
        self.log_download_buffer_size + PUBLISH_HEADER_SIZE
    }

    /// Reject configurations the central cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.log_download_buffer_size == 0
            || self.publish_buffer_size == 0
            || self.smp_rsp_buffer_size == 0
            || self.download_chunk_size == 0
        {
            return Err(Error::Config("buffer sizes must be non-zero"));
        }
        // One header plus one maximum entry (with its CRC) must fit.
        if self.log_download_buffer_size < PUBLISH_HEADER_SIZE + MAX_ENTRY_SIZE + 2 {
            return Err(Error::Config("stash smaller than one maximum entry"));
        }
        if self.publish_buffer_size <= PUBLISH_HEADER_SIZE {
            return Err(Error::Config("publish buffer smaller than header"));
        }
        if self.dummy_entry_size < 16
            || PUBLISH_HEADER_SIZE + self.dummy_entry_size > self.publish_buffer_size
        {
            return Err(Error::Config("dummy entry does not fit publish buffer"));
        }
        if self.adv_log_filter_cnt == 0 {
            return Err(Error::Config("adv_log_filter_cnt must be non-zero"));
        }
        if self.publish_timeout_ms == 0 || self.smp_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be non-zero"));
        }
        Ok(())
    }
}
