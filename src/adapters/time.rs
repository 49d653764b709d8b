//! Clock adapter.
//!
//! Implements [`ClockPort`]:
//!
//! - **`target_os = "espidf"`**: monotonic time from `esp_timer_get_time()`,
//!   wall clock from `gettimeofday()` (set by SNTP or the cellular modem).
//! - **`not(target_os = "espidf")`**: `std::time::Instant` and
//!   `SystemTime` for host-side testing and simulation.

use crate::app::ports::ClockPort;

/// Anything earlier is an unset RTC (2020-01-01).
const EPOCH_2020: u64 = 1_577_836_800;

pub struct GatewayClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for GatewayClock {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    #[cfg(target_os = "espidf")]
    fn wall_secs(&self) -> u64 {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return 0;
        }
        tv.tv_sec.max(0) as u64
    }

    #[cfg(not(target_os = "espidf"))]
    fn wall_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }
}

/// `secs` as a publishable epoch; 0 while the clock is not set.
pub fn epoch_from_secs(secs: u64) -> u32 {
    if secs < EPOCH_2020 {
        return 0;
    }
    u32::try_from(secs).unwrap_or(u32::MAX)
}

impl ClockPort for GatewayClock {
    #[cfg(target_os = "espidf")]
    fn uptime_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    #[cfg(not(target_os = "espidf"))]
    fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn epoch(&self) -> u32 {
        epoch_from_secs(self.wall_secs())
    }
}
