//! Headless runner: loads a raw memory image, registers the bundled clock
//! and keyboard, and runs a [`dcpu_core::Cpu`] against it.

use std::fs;
use std::io::{self, Read as _};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use dcpu_core::{Cpu, Word};
use dcpu_devices::{generic_clock, generic_keyboard};

/// Run a DCPU-16 memory image.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a raw big-endian memory image (16-bit words, high byte first).
    image: PathBuf,

    /// Address to start execution at.
    #[arg(long, default_value_t = 0)]
    entry: u16,

    /// Log every executed instruction at `trace` level.
    #[arg(long)]
    trace: bool,

    /// Log every branch-skip event at `trace` level.
    #[arg(long)]
    trace_skips: bool,

    /// Feed stdin bytes to the bundled keyboard as they arrive.
    #[arg(long)]
    keyboard_stdin: bool,

    /// Run at full host speed instead of the nominal clock period.
    #[arg(long)]
    no_throttle: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let image = match read_image(&cli.image) {
        Ok(image) => image,
        Err(err) => {
            log::error!("failed to read {}: {err}", cli.image.display());
            process::exit(1);
        }
    };

    let mut cpu = Cpu::new();
    cpu.load(0, &image);

    if cli.no_throttle {
        cpu.clock_period = std::time::Duration::ZERO;
    }

    if cli.trace {
        cpu.set_trace(Some(Box::new(|pc, op, a, b, _storage| {
            log::trace!("{pc:#06x}: {op:?} a={a:#06x} b={b:#06x}");
        })));
    }

    if cli.trace_skips {
        cpu.set_branch_skip_hook(Some(Box::new(|pc, skipped| {
            log::trace!("{pc:#06x}: branch skip, {skipped} instruction(s) dropped");
        })));
    }

    cpu.register_device(generic_clock());

    let (keyboard, keyboard_builder) = generic_keyboard();
    cpu.register_device(keyboard_builder);
    if cli.keyboard_stdin {
        std::thread::spawn(move || feed_keyboard_from_stdin(&keyboard));
    }

    if let Err(err) = cpu.run(cli.entry) {
        log::error!("{err}");
        process::exit(1);
    }
}

/// Read a raw image file into words, interpreting each pair of bytes as a
/// big-endian `Word` (the convention the common DCPU-16 toolchains emit).
/// An odd trailing byte is zero-padded.
fn read_image(path: &PathBuf) -> io::Result<Vec<Word>> {
    let bytes = fs::read(path)?;
    let mut words = Vec::with_capacity(bytes.len().div_ceil(2));
    let mut chunks = bytes.chunks_exact(2);
    for chunk in &mut chunks {
        words.push(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        words.push(u16::from_be_bytes([*last, 0]));
    }
    Ok(words)
}

/// Block reading bytes from stdin and forward each one to the keyboard
/// device as a keystroke, until stdin closes.
fn feed_keyboard_from_stdin(keyboard: &dcpu_devices::KeyboardHandle) {
    let mut byte = [0u8; 1];
    loop {
        match io::stdin().lock().read(&mut byte) {
            Ok(0) | Err(_) => return,
            Ok(_) => keyboard.push_key(Word::from(byte[0])),
        }
    }
}
