//! Board drivers: status LED, user button, task watchdog and the one-shot
//! GPIO setup they share.

pub mod button;
pub mod hw_init;
pub mod led_patterns;
pub mod status_led;
pub mod watchdog;
