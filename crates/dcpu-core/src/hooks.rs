//! Observer hooks external tooling uses to watch execution.

use crate::decode::Opcode;
use crate::storage::Storage;
use crate::word::Word;

/// Fired once per real executed instruction, before dispatch, with the
/// address the instruction started at, the decoded opcode and operand
/// codes, and the current `Storage`. Never fires for skipped instructions.
pub type TraceFn = Box<dyn FnMut(Word, Opcode, Word, Word, &Storage)>;

/// Fired whenever a failed conditional triggers the branch-skip
/// sub-protocol, with the address of the failing conditional and the
/// number of instructions skipped (including the trailing non-conditional).
pub type BranchSkipFn = Box<dyn FnMut(Word, Word)>;

/// Fired once per real executed instruction, before dispatch, with the
/// address the instruction started at and the current `Storage`. Distinct
/// from `TraceFn` so hosts that only care about instruction boundaries
/// don't have to also decode.
pub type InstructionFn = Box<dyn FnMut(Word, &Storage)>;
