//! Registration/query/interrupt round trips for the bundled devices.

use std::time::Duration;

use dcpu_core::Cpu;
use dcpu_devices::{generic_clock, generic_keyboard};

const fn encode(op: u16, a: u16, b: u16) -> u16 {
    op | (a << 5) | (b << 11)
}

const NEXT_WORD_LITERAL: u16 = 0x1f;
const REG_A: u16 = 0x00;
const REG_B: u16 = 0x01;

fn reg_imm(op: u16, dest: u16, imm: u16) -> [u16; 2] {
    [encode(op, dest, NEXT_WORD_LITERAL), imm]
}

const OP_SET: u16 = 0x01;
const EXT_HWQ: u16 = 0x11;
const EXT_HWI: u16 = 0x12;

const fn ext_imm_words(secondary: u16, imm: u16) -> [u16; 2] {
    [encode(0, secondary, NEXT_WORD_LITERAL), imm]
}

#[test]
fn clock_reports_its_hardware_identity_via_hwq() {
    let mut cpu = Cpu::new();
    cpu.register_device(generic_clock());

    cpu.load(0, &ext_imm_words(EXT_HWQ, 0));
    cpu.step().unwrap();

    let s = cpu.storage();
    assert_eq!(s.a, 0xb402);
    assert_eq!(s.b, 0x12d0);
    assert_eq!(s.c, 1);
    assert_eq!(s.x, 0);
    assert_eq!(s.y, 0);
}

#[test]
fn clock_tracks_elapsed_ticks_after_interval_set() {
    let mut cpu = Cpu::new();
    cpu.register_device(generic_clock());

    // HWI 0 with A=0, B=5 sets the interval to 5 ticks.
    let mut prog = Vec::new();
    prog.extend(reg_imm(OP_SET, REG_A, 0));
    prog.extend(reg_imm(OP_SET, REG_B, 5));
    prog.extend(ext_imm_words(EXT_HWI, 0));
    cpu.load(0, &prog);
    cpu.step().unwrap();
    cpu.step().unwrap();
    cpu.step().unwrap();

    // Give the clock's background thread a few ticks at 60Hz.
    std::thread::sleep(Duration::from_millis(120));

    // HWI 0 with A=1 reads elapsed ticks into C.
    let query_at = cpu.storage().pc;
    let mut prog2 = Vec::new();
    prog2.extend(reg_imm(OP_SET, REG_A, 1));
    prog2.extend(ext_imm_words(EXT_HWI, 0));
    cpu.load(query_at, &prog2);
    cpu.step().unwrap();
    cpu.step().unwrap();

    assert!(
        cpu.storage().c > 0,
        "clock should have ticked at least once in 120ms"
    );
}

const OP_ADD: u16 = 0x02;
const EXT_IAS: u16 = 0x0a;
const EXT_RFI: u16 = 0x0b;

#[test]
fn clock_raises_its_configured_interrupt() {
    let mut cpu = Cpu::new();
    cpu.register_device(generic_clock());

    // SET SP, 0xffff
    // IAS handler
    // SET A, 0 ; SET B, 1 ; HWI 0   -- set interval to 1 tick
    // SET A, 2 ; SET B, 99 ; HWI 0  -- enable interrupts, message 99
    // loop: ADD A, 0               -- spin while the clock ticks in the background
    // SET PC, loop
    // handler: SET C, 1 ; RFI
    let mut prog = Vec::new();
    prog.extend(reg_imm(OP_SET, 0x1b /* SP */, 0xffff));
    let ias_idx = prog.len();
    prog.extend(ext_imm_words(EXT_IAS, 0)); // patched below
    prog.extend(reg_imm(OP_SET, REG_A, 0));
    prog.extend(reg_imm(OP_SET, REG_B, 1));
    prog.extend(ext_imm_words(EXT_HWI, 0));
    prog.extend(reg_imm(OP_SET, REG_A, 2));
    prog.extend(reg_imm(OP_SET, REG_B, 99));
    prog.extend(ext_imm_words(EXT_HWI, 0));
    let loop_addr = prog.len() as u16;
    prog.extend(reg_imm(OP_ADD, REG_A, 0));
    prog.extend([
        encode(OP_SET, 0x1c /* PC */, NEXT_WORD_LITERAL),
        loop_addr,
    ]);

    let handler_addr = prog.len() as u16;
    prog.extend([encode(OP_SET, 0x02 /* C */, NEXT_WORD_LITERAL), 1]);
    prog.push(encode(0, EXT_RFI, 0));
    prog[ias_idx + 1] = handler_addr;

    cpu.load(0, &prog);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        cpu.step().unwrap();
        if cpu.storage().c == 1 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "clock never raised its interrupt within the deadline"
        );
    }
}

#[test]
fn keyboard_reports_its_hardware_identity_via_hwq() {
    let mut cpu = Cpu::new();
    let (_handle, builder) = generic_keyboard();
    cpu.register_device(builder);

    cpu.load(0, &ext_imm_words(EXT_HWQ, 0));
    cpu.step().unwrap();

    let s = cpu.storage();
    assert_eq!(s.a, 0x7406);
    assert_eq!(s.b, 0x30cf);
    assert_eq!(s.c, 1);
}

#[test]
fn keyboard_buffers_and_pops_keystrokes_in_order() {
    let mut cpu = Cpu::new();
    let (handle, builder) = generic_keyboard();
    cpu.register_device(builder);

    handle.push_key(b'h' as u16);
    handle.push_key(b'i' as u16);

    // HWI 0 with A=1 pops the oldest buffered key into C.
    let mut prog = Vec::new();
    prog.extend(reg_imm(OP_SET, REG_A, 1));
    prog.extend(ext_imm_words(EXT_HWI, 0));
    cpu.load(0, &prog);
    cpu.step().unwrap();
    cpu.step().unwrap();
    assert_eq!(cpu.storage().c, b'h' as u16);

    cpu.load(cpu.storage().pc, &prog);
    cpu.step().unwrap();
    cpu.step().unwrap();
    assert_eq!(cpu.storage().c, b'i' as u16);
}

#[test]
fn keyboard_pop_on_empty_buffer_yields_zero() {
    let mut cpu = Cpu::new();
    let (_handle, builder) = generic_keyboard();
    cpu.register_device(builder);

    let mut prog = Vec::new();
    prog.extend(reg_imm(OP_SET, REG_A, 1));
    prog.extend(ext_imm_words(EXT_HWI, 0));
    cpu.load(0, &prog);
    cpu.step().unwrap();
    cpu.step().unwrap();
    assert_eq!(cpu.storage().c, 0);
}

#[test]
fn keyboard_clear_empties_the_buffer() {
    let mut cpu = Cpu::new();
    let (handle, builder) = generic_keyboard();
    cpu.register_device(builder);
    handle.push_key(42);

    // A=0 clears, then A=1 should pop nothing.
    let mut prog = Vec::new();
    prog.extend(reg_imm(OP_SET, REG_A, 0));
    prog.extend(ext_imm_words(EXT_HWI, 0));
    let pop_at = prog.len() as u16;
    prog.extend(reg_imm(OP_SET, REG_A, 1));
    prog.extend(ext_imm_words(EXT_HWI, 0));
    cpu.load(0, &prog);
    for _ in 0..2 {
        cpu.step().unwrap();
    }
    assert_eq!(cpu.storage().pc, pop_at);
    for _ in 0..2 {
        cpu.step().unwrap();
    }
    assert_eq!(cpu.storage().c, 0);
}
