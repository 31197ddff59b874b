//! Outward error/termination conditions.

use crate::word::Word;

/// The outward error/termination conditions a running program can produce.
///
/// `Exit` is not really an error - it is the normal-termination sentinel
/// from spec.md §7, represented as a variant so `step` can report it to a
/// host driver; [`crate::Cpu::run`] converts it to `Ok(())`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The program executed `EXIT`. `Cpu::run` treats this as success;
    /// `Cpu::step` returns it so single-stepping callers can tell a clean
    /// exit apart from "keep going".
    #[error("program exited normally")]
    Exit,

    /// The program executed `PANIC`. Fatal; carries the message read from
    /// memory and the address of the `PANIC` instruction itself.
    #[error("panic at {pc:#06x}: {message}")]
    Panic { message: String, pc: Word },

    /// The interrupt queue exceeded its bounded capacity. Fatal; the
    /// emulator never silently drops or coalesces a queue overflow.
    #[error("interrupt queue overload")]
    Overload,
}
