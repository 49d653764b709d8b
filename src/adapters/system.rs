//! System control adapter.
//!
//! Implements [`SystemPort`]: a delayed software reset.
//!
//! - **`target_os = "espidf"`**: waits `delay_ms` so log output drains,
//!   then calls `esp_restart()`.
//! - **all other targets**: records the request; tests inspect it.

use log::warn;

use crate::app::ports::SystemPort;

#[derive(Debug, Default)]
pub struct SystemControl {
    #[cfg(not(target_os = "espidf"))]
    requested: Option<u32>,
}

impl SystemControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay of the last reboot request (host builds only).
    #[cfg(not(target_os = "espidf"))]
    pub fn requested(&self) -> Option<u32> {
        self.requested
    }
}

impl SystemPort for SystemControl {
    #[cfg(target_os = "espidf")]
    fn reboot(&mut self, delay_ms: u32) {
        warn!("System: reset in {} ms", delay_ms);
        std::thread::sleep(std::time::Duration::from_millis(u64::from(delay_ms)));
        // SAFETY: esp_restart never returns.
        unsafe { esp_idf_svc::sys::esp_restart() };
    }

    #[cfg(not(target_os = "espidf"))]
    fn reboot(&mut self, delay_ms: u32) {
        warn!("System(sim): reset requested ({} ms)", delay_ms);
        self.requested = Some(delay_ms);
    }
}
