//! GPIO assignments for the gateway board.
//!
//! Every driver references this module rather than hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Bluetooth status LED (single colour, active HIGH)
// ---------------------------------------------------------------------------

pub const BT_LED_GPIO: i32 = 2;

// ---------------------------------------------------------------------------
// User button
// ---------------------------------------------------------------------------

/// Active-low momentary switch with internal pull-up; opens the
/// connectable advertising window.
pub const BUTTON_GPIO: i32 = 0;
