//! Concrete [`dcpu_core::Device`] implementations: a generic clock and a
//! generic keyboard, matching the hardware ids in common DCPU-16 toolchains
//! so images built against those toolchains run unmodified.

mod clock;
mod keyboard;

pub use clock::{GenericClock, generic_clock};
pub use keyboard::{GenericKeyboard, KeyboardHandle, generic_keyboard};
