//! The CPU: ties storage, decoding, operand resolution, execution, and the
//! interrupt/device controller together.

use std::thread;
use std::time::Duration;

use crate::decode::{Opcode, decode, sizeof};
use crate::device::{Device, DeviceBuilder};
use crate::error::Error;
use crate::hooks::{BranchSkipFn, InstructionFn, TraceFn};
use crate::interrupt::InterruptController;
use crate::operand::{OperandRef, resolve};
use crate::storage::Storage;
use crate::word::{Word, signed, unsigned};

/// Devices are silently refused past this count (spec.md §6).
const MAX_DEVICES: usize = (1 << 16) - 1;

/// A DCPU-16 core: storage, registered devices, the interrupt queue, and the
/// observer hooks host tooling attaches to.
pub struct Cpu {
    store: Storage,
    devices: Vec<Box<dyn Device + Send>>,
    interrupts: InterruptController,
    queue_interrupts: bool,
    last_instruction_size: Word,

    /// Nominal period between clock ticks, consulted only by `run`. `step`
    /// ignores it entirely - pacing is best-effort, per spec.md §1.
    pub clock_period: Duration,

    trace: Option<TraceFn>,
    branch_skip: Option<BranchSkipFn>,
    instruction_handler: Option<InstructionFn>,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    /// Construct a CPU with default clock period and zeroed storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Storage::default(),
            devices: Vec::new(),
            interrupts: InterruptController::new(),
            queue_interrupts: false,
            last_instruction_size: 0,
            // 1000ns nominal period, matching the source's default 1000ns
            // `ClockSpeed` (a 1MHz nominal clock).
            clock_period: Duration::from_nanos(1000),
            trace: None,
            branch_skip: None,
            instruction_handler: None,
        }
    }

    /// Read-only access to the register/memory state.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.store
    }

    /// Copy `words` into main memory starting at `addr`, wrapping around at
    /// the top of the address space. Used to load a program or data image
    /// before calling [`Cpu::run`] or [`Cpu::step`].
    pub fn load(&mut self, addr: Word, words: &[Word]) {
        let mut addr = addr;
        for &w in words {
            self.store.mem[addr as usize] = w;
            addr = addr.wrapping_add(1);
        }
    }

    /// Zero storage, reallocate the interrupt queue, and clear
    /// `queue_interrupts`. Does not touch the device list.
    pub fn reset(&mut self) {
        log::debug!("resetting CPU state");
        self.store.clear();
        self.interrupts.reset();
        self.queue_interrupts = false;
    }

    /// Register a new device, silently ignored once `2^16 - 1` devices are
    /// already registered.
    pub fn register_device(&mut self, builder: DeviceBuilder) {
        if self.devices.len() >= MAX_DEVICES {
            log::warn!("device table full; ignoring registration");
            return;
        }
        let trigger = self.interrupts.trigger_fn();
        self.devices.push(builder(trigger));
        log::debug!("registered device #{}", self.devices.len() - 1);
    }

    /// Remove all registered devices.
    pub fn clear_devices(&mut self) {
        self.devices.clear();
    }

    /// The currently registered devices, in registration order.
    #[must_use]
    pub fn devices(&self) -> &[Box<dyn Device + Send>] {
        &self.devices
    }

    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Size in words of the most recently decoded instruction, including any
    /// extension words it consumed.
    #[must_use]
    pub fn last_instruction_size(&self) -> Word {
        self.last_instruction_size
    }

    /// Replace the trace hook. `None` disables tracing.
    pub fn set_trace(&mut self, hook: Option<TraceFn>) {
        self.trace = hook;
    }

    /// Replace the branch-skip hook. `None` disables it.
    pub fn set_branch_skip_hook(&mut self, hook: Option<BranchSkipFn>) {
        self.branch_skip = hook;
    }

    /// Replace the per-instruction hook. `None` disables it.
    pub fn set_instruction_handler(&mut self, hook: Option<InstructionFn>) {
        self.instruction_handler = hook;
    }

    /// Set `PC = entry` and run until `EXIT`, `PANIC`, or a fatal error.
    ///
    /// Repeatedly calls [`Cpu::step`], waiting for each clock tick. `EXIT`
    /// is reported as `Ok(())`; every other error propagates.
    pub fn run(&mut self, entry: Word) -> Result<(), Error> {
        self.store.pc = entry;
        loop {
            if !self.clock_period.is_zero() {
                thread::sleep(self.clock_period);
            }
            match self.step() {
                Ok(()) => {}
                Err(Error::Exit) => {
                    log::info!("program exited normally");
                    return Ok(());
                }
                Err(err) => {
                    log::error!("run aborted: {err}");
                    return Err(err);
                }
            }
        }
    }

    /// Execute a single instruction, first servicing at most one queued
    /// interrupt. Returns `Err(Error::Exit)` on `EXIT`, matching `run`'s
    /// contract of propagating it for callers that single-step.
    pub fn step(&mut self) -> Result<(), Error> {
        if self.interrupts.take_overload() {
            return Err(Error::Overload);
        }

        // Between-instruction dequeue (spec.md §4.5): service at most one
        // pending interrupt before decoding the next instruction.
        if !self.queue_interrupts {
            if let Some(msg) = self.interrupts.try_recv() {
                self.trigger(msg);
            }
        }

        let start_pc = self.store.pc;
        let word = self.store.mem[self.store.pc as usize];
        let (op, a, b) = decode(word);
        self.store.pc = self.store.pc.wrapping_add(1);
        self.last_instruction_size = sizeof(op, a, b);

        let is_extended = matches!(
            op,
            Opcode::Jsr
                | Opcode::Int
                | Opcode::Iag
                | Opcode::Ias
                | Opcode::Rfi
                | Opcode::Iaq
                | Opcode::Hwn
                | Opcode::Hwq
                | Opcode::Hwi
                | Opcode::Panic
                | Opcode::Exit
                | Opcode::ReservedExt(_)
        );

        // Operand `a` must resolve before `b`: both may consume an inline
        // extension word and the encoding places `a`'s first.
        let va = if is_extended {
            None
        } else {
            Some(resolve(a, true, &mut self.store))
        };
        let vb = resolve(b, false, &mut self.store);

        if let Some(hook) = &mut self.instruction_handler {
            hook(start_pc, &self.store);
        }
        if let Some(hook) = &mut self.trace {
            hook(start_pc, op, a, b, &self.store);
        }

        self.execute(op, va, vb, start_pc)
    }

    /// Dispatch a decoded, operand-resolved instruction.
    fn execute(
        &mut self,
        op: Opcode,
        va: Option<OperandRef>,
        vb: OperandRef,
        pc_of_instruction: Word,
    ) -> Result<(), Error> {
        macro_rules! va {
            () => {
                va.expect("non-extended opcode always resolves an `a` operand")
            };
        }

        match op {
            Opcode::Set => {
                let v = vb.read(&self.store);
                va!().write(&mut self.store, v);
            }

            Opcode::Add => {
                let s = &mut self.store;
                let sum = u32::from(va!().read(s)) + u32::from(vb.read(s));
                va!().write(s, unsigned_low(sum));
                s.ex = overflow_high(sum);
            }

            Opcode::Sub => {
                let s = &mut self.store;
                let diff = u32::from(va!().read(s)).wrapping_sub(u32::from(vb.read(s)));
                va!().write(s, unsigned_low(diff));
                s.ex = overflow_high(diff);
            }

            Opcode::Mul => {
                let s = &mut self.store;
                let prod = u32::from(va!().read(s)) * u32::from(vb.read(s));
                va!().write(s, unsigned_low(prod));
                s.ex = overflow_high(prod);
            }

            Opcode::Mli => {
                let s = &mut self.store;
                let prod = i32::from(signed(va!().read(s))) * i32::from(signed(vb.read(s)));
                va!().write(s, prod as Word);
                s.ex = (prod >> 16) as Word;
            }

            Opcode::Div => {
                let s = &mut self.store;
                let (a, b) = (va!().read(s), vb.read(s));
                if b == 0 {
                    va!().write(s, 0);
                    s.ex = 0;
                } else {
                    va!().write(s, a / b);
                    s.ex = (((u32::from(a)) << 16) / u32::from(b)) as Word;
                }
            }

            Opcode::Dvi => {
                let s = &mut self.store;
                let (a, b) = (signed(va!().read(s)), signed(vb.read(s)));
                if b == 0 {
                    va!().write(s, 0);
                    s.ex = 0;
                } else {
                    va!().write(s, unsigned(a / b));
                    s.ex = ((i32::from(a) << 16) / i32::from(b)) as Word;
                }
            }

            // MOD is unsigned remainder, matching the DCPU-16 spec; the
            // source implements this identically to MDI, which the
            // Open Questions in spec.md §9 flag as a likely source bug we
            // deliberately do not replicate.
            Opcode::Mod => {
                let s = &mut self.store;
                let (a, b) = (va!().read(s), vb.read(s));
                va!().write(s, if b == 0 { 0 } else { a % b });
            }

            // MDI is signed remainder.
            Opcode::Mdi => {
                let s = &mut self.store;
                let (a, b) = (signed(va!().read(s)), signed(vb.read(s)));
                va!().write(s, if b == 0 { 0 } else { unsigned(a % b) });
            }

            Opcode::And => {
                let s = &mut self.store;
                let v = va!().read(s) & vb.read(s);
                va!().write(s, v);
            }
            Opcode::Bor => {
                let s = &mut self.store;
                let v = va!().read(s) | vb.read(s);
                va!().write(s, v);
            }
            Opcode::Xor => {
                let s = &mut self.store;
                let v = va!().read(s) ^ vb.read(s);
                va!().write(s, v);
            }

            Opcode::Shr => {
                let s = &mut self.store;
                let (a, b) = (va!().read(s), vb.read(s));
                // Use the pre-shift value of `a`: the source computes this
                // from the already-shifted result, which spec.md §9 flags
                // as a likely bug we deliberately do not replicate.
                let (result, ex) = logical_shr(a, b);
                va!().write(s, result);
                s.ex = ex;
            }

            Opcode::Asr => {
                let s = &mut self.store;
                let (a, b) = (va!().read(s), vb.read(s));
                let (result, ex) = arithmetic_shr(a, b);
                va!().write(s, result);
                s.ex = ex;
            }

            Opcode::Shl => {
                let s = &mut self.store;
                let (a, b) = (va!().read(s), vb.read(s));
                let (result, ex) = shl(a, b);
                va!().write(s, result);
                s.ex = ex;
            }

            Opcode::Ifb | Opcode::Ifc | Opcode::Ife | Opcode::Ifn | Opcode::Ifg | Opcode::Ifa
            | Opcode::Ifl | Opcode::Ifu => {
                let (a, b) = (va!().read(&self.store), vb.read(&self.store));
                let holds = match op {
                    Opcode::Ifb => (a & b) != 0,
                    Opcode::Ifc => (a & b) == 0,
                    Opcode::Ife => a == b,
                    Opcode::Ifn => a != b,
                    Opcode::Ifg => a > b,
                    Opcode::Ifa => signed(a) > signed(b),
                    Opcode::Ifl => a < b,
                    Opcode::Ifu => signed(a) < signed(b),
                    _ => unreachable!(),
                };
                if !holds {
                    self.skip_branch(pc_of_instruction);
                }
            }

            Opcode::Adx => {
                let s = &mut self.store;
                let sum = u32::from(va!().read(s)) + u32::from(vb.read(s)) + u32::from(s.ex);
                va!().write(s, unsigned_low(sum));
                s.ex = overflow_high(sum);
            }

            Opcode::Sbx => {
                // 32-bit `a - b + EX`, per the source; spec.md §9 flags the
                // carry/borrow semantics of `EX` here as worth revisiting
                // against other DCPU-16 specs, but directs following the
                // source's formulation, which this does.
                let s = &mut self.store;
                let result = (u32::from(va!().read(s)).wrapping_sub(u32::from(vb.read(s))))
                    .wrapping_add(u32::from(s.ex));
                va!().write(s, unsigned_low(result));
                s.ex = overflow_high(result);
            }

            Opcode::Sti => {
                let s = &mut self.store;
                let v = vb.read(s);
                va!().write(s, v);
                s.i = s.i.wrapping_add(1);
                s.j = s.j.wrapping_add(1);
            }

            Opcode::Std => {
                let s = &mut self.store;
                let v = vb.read(s);
                va!().write(s, v);
                s.i = s.i.wrapping_sub(1);
                s.j = s.j.wrapping_sub(1);
            }

            Opcode::Reserved(_) => {}

            Opcode::Jsr => {
                let s = &mut self.store;
                s.mem[s.sp as usize] = s.pc;
                s.sp = s.sp.wrapping_sub(1);
                s.pc = vb.read(s);
            }

            Opcode::Int => {
                let msg = vb.read(&self.store);
                self.interrupt(msg)?;
            }

            Opcode::Iag => {
                let ia = self.store.ia;
                vb.write(&mut self.store, ia);
            }
            Opcode::Ias => {
                let v = vb.read(&self.store);
                self.store.ia = v;
            }

            Opcode::Rfi => {
                self.queue_interrupts = false;
                let s = &mut self.store;
                s.sp = s.sp.wrapping_add(1);
                s.a = s.mem[s.sp as usize];
                s.sp = s.sp.wrapping_add(1);
                s.pc = s.mem[s.sp as usize];
            }

            Opcode::Iaq => self.queue_interrupts = vb.read(&self.store) != 0,

            Opcode::Hwn => {
                let count = self.devices.len() as Word;
                vb.write(&mut self.store, count);
            }

            Opcode::Hwq => {
                let index = vb.read(&self.store);
                if index as usize >= self.devices.len() {
                    let s = &mut self.store;
                    s.a = 0;
                    s.b = 0;
                    s.c = 0;
                    s.x = 0;
                    s.y = 0;
                } else {
                    let dev = &self.devices[index as usize];
                    let id = dev.id();
                    let mfr = dev.manufacturer();
                    let rev = dev.revision();
                    let s = &mut self.store;
                    s.a = (id & 0xffff) as Word;
                    s.b = ((id >> 16) & 0xffff) as Word;
                    s.c = rev;
                    s.x = (mfr & 0xffff) as Word;
                    s.y = ((mfr >> 16) & 0xffff) as Word;
                }
            }

            Opcode::Hwi => {
                let index = vb.read(&self.store);
                if (index as usize) < self.devices.len() {
                    self.devices[index as usize].handle(&mut self.store);
                }
            }

            Opcode::Panic => {
                let addr = vb.read(&self.store);
                let mut message = self.store.read_string(addr);
                if message.is_empty() {
                    message = "Unknown error".to_string();
                }
                log::error!("PANIC at {pc_of_instruction:#06x}: {message}");
                return Err(Error::Panic {
                    message,
                    pc: pc_of_instruction,
                });
            }

            Opcode::Exit => return Err(Error::Exit),

            Opcode::ReservedExt(_) => {}
        }

        Ok(())
    }

    /// Raise an interrupt with the given message, synchronously, on the
    /// executor thread (the `INT` opcode's implementation).
    fn interrupt(&mut self, msg: Word) -> Result<(), Error> {
        if self.queue_interrupts {
            self.interrupts.send(msg).map_err(|()| Error::Overload)?;
        } else if self.store.ia != 0 {
            self.trigger(msg);
        }
        // else: queueing disabled and IA == 0 - silently dropped.
        Ok(())
    }

    /// The handler-entry prologue (spec.md §4.5): push `PC` then `A`, jump
    /// to `IA`, and load `A` with the interrupt message. Always re-enables
    /// interrupt queueing, so nested interrupts queue rather than nest.
    fn trigger(&mut self, msg: Word) {
        self.queue_interrupts = true;
        let s = &mut self.store;
        s.mem[s.sp as usize] = s.pc;
        s.sp = s.sp.wrapping_sub(1);
        s.mem[s.sp as usize] = s.a;
        s.sp = s.sp.wrapping_sub(1);
        s.pc = s.ia;
        s.a = msg;
    }

    /// The branch-skip sub-protocol (spec.md §4.4): advance past a chain of
    /// conditionals and their target instruction without executing any of
    /// them, then report the cost to the branch-skip hook.
    fn skip_branch(&mut self, pc_of_failing_conditional: Word) {
        let mut skipped: Word = 0;
        loop {
            skipped += 1;
            let word = self.store.mem[self.store.pc as usize];
            let (op, a, b) = decode(word);
            self.store.pc = self.store.pc.wrapping_add(sizeof(op, a, b));
            if !op.is_conditional() {
                break;
            }
        }

        if let Some(hook) = &mut self.branch_skip {
            hook(pc_of_failing_conditional, skipped);
        }
    }
}

/// Low 16 bits of a 32-bit arithmetic result.
const fn unsigned_low(v: u32) -> Word {
    (v & 0xffff) as Word
}

/// High 16 bits of a 32-bit arithmetic result, as written to `EX`.
const fn overflow_high(v: u32) -> Word {
    (v >> 16) as Word
}

/// `SHR`: logical right shift of `a` by `b`, with the bits shifted out of
/// `a` returned as `EX`.
///
/// `b` comes straight from an operand and can be any `Word` (0..=65535), not
/// just 0..=15, so a shift count of 16 or more - which shifts every bit out
/// - is handled explicitly rather than computed with `<<`/`>>`, which panic
/// on a shift count at or beyond the operand width.
fn logical_shr(a: Word, b: Word) -> (Word, Word) {
    if b >= 16 {
        (0, 0)
    } else {
        let shift = u32::from(b);
        (a >> shift, ((u32::from(a) << 16) >> shift) as Word)
    }
}

/// `ASR`: arithmetic right shift of `a` by `b`, sign-extending, with the
/// bits shifted out returned as `EX`.
///
/// As with [`logical_shr`], `b` is not bounded to the operand width; a
/// shift count of 16 or more exhausts every bit, saturating both results to
/// the sign of `a`.
fn arithmetic_shr(a: Word, b: Word) -> (Word, Word) {
    let signed_a = signed(a);
    if b >= 16 {
        let filled = if signed_a < 0 { 0xffff } else { 0 };
        (filled, filled)
    } else {
        let shift = u32::from(b);
        (
            unsigned(signed_a.wrapping_shr(shift)),
            ((i32::from(signed_a) << 16) >> shift) as Word,
        )
    }
}

/// `SHL`: left shift of `a` by `b`, with the overflow bits returned as
/// `EX`.
///
/// The widened 32-bit intermediate can only absorb shift counts below 32;
/// `b` comes straight from an operand and can be any `Word`, so a shift
/// count of 32 or more - which shifts every bit out of the 32-bit
/// intermediate - is handled explicitly rather than computed with `<<`,
/// which panics on a shift count at or beyond the intermediate's width.
fn shl(a: Word, b: Word) -> (Word, Word) {
    if b >= 32 {
        (0, 0)
    } else {
        let shifted = u32::from(a) << u32::from(b);
        (unsigned_low(shifted), overflow_high(shifted))
    }
}
