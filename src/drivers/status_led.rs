//! Bluetooth status LED driver.
//!
//! On ESP-IDF: drives [`BT_LED_GPIO`](crate::pins::BT_LED_GPIO).
//! On host/test: tracks state in-memory only.

use crate::drivers::hw_init;
use crate::pins;

#[derive(Debug, Default)]
pub struct StatusLed {
    on: bool,
}

impl StatusLed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only touches the pin on a level change.
    pub fn set(&mut self, on: bool) {
        if on != self.on {
            hw_init::gpio_write(pins::BT_LED_GPIO, on);
            self.on = on;
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}
