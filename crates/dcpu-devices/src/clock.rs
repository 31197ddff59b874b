//! The "Generic Clock (compatible)" device: `HWQ` id `0x12d0b402`, revision
//! `1`, manufacturer `0x00000000`.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dcpu_core::{Device, DeviceBuilder, Storage, TriggerFn};

const DEVICE_ID: u32 = 0x12d0_b402;
const REVISION: u16 = 1;
const MANUFACTURER: u32 = 0;

/// 1/60th of a second, the clock's native tick rate.
const TICK_PERIOD: Duration = Duration::from_nanos(1_000_000_000 / 60);

#[derive(Default)]
struct State {
    /// Ticks between interrupts; 0 disables the clock.
    interval: u16,
    /// Ticks elapsed since the interval was last set.
    elapsed: u16,
    /// Interrupt message; 0 disables interrupts without stopping the count.
    message: u16,
}

/// A background-ticked clock. `A=0` sets the interval (in 1/60s units) and
/// resets the elapsed counter; `A=1` reads the elapsed counter into `C`;
/// `A=2` sets the interrupt message (0 to disable).
pub struct GenericClock {
    state: Arc<Mutex<State>>,
    shutdown: Arc<Mutex<bool>>,
    worker: Option<JoinHandle<()>>,
}

impl Device for GenericClock {
    fn id(&self) -> u32 {
        DEVICE_ID
    }

    fn revision(&self) -> u16 {
        REVISION
    }

    fn manufacturer(&self) -> u32 {
        MANUFACTURER
    }

    fn handle(&mut self, storage: &mut Storage) {
        let mut state = self.state.lock().expect("clock state mutex poisoned");
        match storage.a {
            0 => {
                state.interval = storage.b;
                state.elapsed = 0;
            }
            1 => storage.c = state.elapsed,
            2 => state.message = storage.b,
            _ => {}
        }
    }
}

impl Drop for GenericClock {
    fn drop(&mut self) {
        *self.shutdown.lock().expect("clock shutdown mutex poisoned") = true;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Build a [`GenericClock`], spawning its background tick thread. The
/// thread ticks at 60Hz and raises `message` via `trigger` once every
/// `interval` ticks, for as long as both are nonzero.
#[must_use]
pub fn generic_clock() -> DeviceBuilder {
    Box::new(|trigger: TriggerFn| {
        let state = Arc::new(Mutex::new(State::default()));
        let shutdown = Arc::new(Mutex::new(false));

        let worker_state = Arc::clone(&state);
        let worker_shutdown = Arc::clone(&shutdown);
        let worker = thread::spawn(move || run_ticker(&worker_state, &worker_shutdown, &trigger));

        Box::new(GenericClock {
            state,
            shutdown,
            worker: Some(worker),
        })
    })
}

fn run_ticker(state: &Mutex<State>, shutdown: &Mutex<bool>, trigger: &TriggerFn) {
    loop {
        thread::sleep(TICK_PERIOD);
        if *shutdown.lock().expect("clock shutdown mutex poisoned") {
            return;
        }

        let mut s = state.lock().expect("clock state mutex poisoned");
        if s.interval == 0 {
            continue;
        }
        s.elapsed = s.elapsed.wrapping_add(1);
        if s.elapsed % s.interval == 0 && s.message != 0 {
            let message = s.message;
            drop(s);
            trigger.call(message);
        }
    }
}
