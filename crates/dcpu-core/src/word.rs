//! The fundamental unit of storage and arithmetic: an unsigned 16-bit word.

/// An unsigned 16-bit value. The unit of storage, addressing, and arithmetic
/// throughout the processor.
pub type Word = u16;

/// Reinterpret a [`Word`] as its two's-complement signed value.
///
/// All "signed" opcodes (`MLI`, `DVI`, `MDI`, `ASR`, `IFA`, `IFU`) operate by
/// reinterpreting bits, never by separate signed storage, so that wraparound
/// stays identical to the unsigned case.
#[must_use]
pub const fn signed(w: Word) -> i16 {
    w as i16
}

/// The inverse of [`signed`]: pack a signed 16-bit value back into a [`Word`].
#[must_use]
pub const fn unsigned(w: i16) -> Word {
    w as u16
}
