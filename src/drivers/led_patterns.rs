//! Bluetooth LED blink engine.
//!
//! Turns the current [`LedIndication`] into an on/off level. The main loop
//! calls `tick()` each iteration and feeds the level to
//! [`StatusLed::set`](super::status_led::StatusLed::set).
//!
//! | Indication             | Pattern            | Period  |
//! |------------------------|--------------------|---------|
//! | `Searching`            | 75 ms on, 4925 off | 5 s     |
//! | `SearchingConnectable` | 75 ms on, 925 off  | 1 s     |
//! | `Connected`            | solid              |         |

use crate::app::ports::LedPort;
use crate::central::LedIndication;

/// One blink period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkPattern {
    pub on_ms: u32,
    pub off_ms: u32,
}

impl BlinkPattern {
    pub const fn for_indication(ind: LedIndication) -> Option<Self> {
        match ind {
            LedIndication::Searching => Some(Self {
                on_ms: 75,
                off_ms: 4_925,
            }),
            LedIndication::SearchingConnectable => Some(Self {
                on_ms: 75,
                off_ms: 925,
            }),
            LedIndication::Connected => None,
        }
    }

    fn level(&self, phase_ms: u32) -> bool {
        phase_ms % (self.on_ms + self.off_ms) < self.on_ms
    }
}

/// Stack-allocated blink engine.
#[derive(Debug, Default)]
pub struct LedPatternEngine {
    phase_ms: u32,
    active: Option<LedIndication>,
}

impl LedPatternEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<LedIndication> {
        self.active
    }

    pub fn off(&mut self) {
        self.active = None;
        self.phase_ms = 0;
    }

    /// Advance the phase by `delta_ms` and return the LED level.
    pub fn tick(&mut self, delta_ms: u32) -> bool {
        self.phase_ms = self.phase_ms.wrapping_add(delta_ms);
        match self.active {
            None => false,
            Some(ind) => match BlinkPattern::for_indication(ind) {
                Some(p) => p.level(self.phase_ms),
                None => true,
            },
        }
    }
}

impl LedPort for LedPatternEngine {
    fn indicate(&mut self, indication: LedIndication) {
        if self.active != Some(indication) {
            self.active = Some(indication);
            // Restart so a new pattern begins with its flash.
            self.phase_ms = 0;
        }
    }
}
