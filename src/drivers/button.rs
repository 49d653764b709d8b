//! ISR-debounced user button.
//!
//! ## Hardware
//!
//! Active-low momentary switch with internal pull-up. The GPIO fires on the
//! falling edge; the ISR records the raw timestamp into an atomic and
//! `tick()` (called from the main loop) runs debounce and release
//! detection.
//!
//! A completed press (debounced, then released or held past
//! [`HOLD_REPORT_MS`]) yields [`GatewayCommand::Button`], which opens the
//! connectable advertising window.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::app::commands::GatewayCommand;

const DEBOUNCE_MS: u32 = 50;

/// A press held this long is reported without waiting for release.
pub const HOLD_REPORT_MS: u32 = 2_000;

/// Raw ISR timestamp (milliseconds since boot, truncated to u32).
static BUTTON_ISR_TIMESTAMP: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PressState {
    Idle,
    Debounce { since_ms: u32 },
    Held { since_ms: u32 },
}

pub struct ButtonDriver {
    gpio: i32,
    state: PressState,
    last_isr_ms: u32,
    presses: u32,
}

impl ButtonDriver {
    pub fn new(gpio: i32) -> Self {
        Self {
            gpio,
            state: PressState::Idle,
            last_isr_ms: 0,
            presses: 0,
        }
    }

    pub fn gpio(&self) -> i32 {
        self.gpio
    }

    /// Presses reported since boot.
    pub fn presses(&self) -> u32 {
        self.presses
    }

    /// Call from the main loop. Returns the command for a completed press.
    pub fn tick(&mut self, now_ms: u32) -> Option<GatewayCommand> {
        let level_pressed = self.is_pressed_hw();
        self.step(now_ms, level_pressed)
    }

    fn step(&mut self, now_ms: u32, level_pressed: bool) -> Option<GatewayCommand> {
        let isr_ms = BUTTON_ISR_TIMESTAMP.load(Ordering::Acquire);
        let new_edge = isr_ms != 0 && isr_ms != self.last_isr_ms;

        match self.state {
            PressState::Idle => {
                if new_edge {
                    self.last_isr_ms = isr_ms;
                    self.state = PressState::Debounce { since_ms: now_ms };
                }
                None
            }
            PressState::Debounce { since_ms } => {
                if now_ms.wrapping_sub(since_ms) >= DEBOUNCE_MS {
                    self.state = if level_pressed {
                        PressState::Held { since_ms }
                    } else {
                        // Bounce or a tap shorter than the debounce window.
                        PressState::Idle
                    };
                }
                None
            }
            PressState::Held { since_ms } => {
                if new_edge {
                    self.last_isr_ms = isr_ms;
                }
                let held = now_ms.wrapping_sub(since_ms);
                if !level_pressed || held >= HOLD_REPORT_MS {
                    self.state = PressState::Idle;
                    self.presses = self.presses.wrapping_add(1);
                    return Some(GatewayCommand::Button);
                }
                None
            }
        }
    }

    #[cfg(target_os = "espidf")]
    fn is_pressed_hw(&self) -> bool {
        !crate::drivers::hw_init::gpio_read(self.gpio)
    }

    #[cfg(not(target_os = "espidf"))]
    fn is_pressed_hw(&self) -> bool {
        false
    }
}

/// Register this on the button GPIO falling edge.
/// Safe to call from interrupt context (lock-free atomic store).
#[allow(unused)]
pub fn button_isr_handler(now_ms: u32) {
    BUTTON_ISR_TIMESTAMP.store(now_ms, Ordering::Release);
}
