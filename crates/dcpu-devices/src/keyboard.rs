//! The "Generic Keyboard (compatible)" device: `HWQ` id `0x30cf7406`,
//! revision `1`, manufacturer `0x00000000`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dcpu_core::{Device, DeviceBuilder, Storage, TriggerFn};

const DEVICE_ID: u32 = 0x30cf_7406;
const REVISION: u16 = 1;
const MANUFACTURER: u32 = 0;

/// Capacity of the pending-keystroke buffer [`KeyboardHandle::push_key`]
/// feeds into.
const BUFFER_CAPACITY: usize = 64;

#[derive(Default)]
struct State {
    buffer: VecDeque<u16>,
    interrupt_message: u16,
}

/// A buffered keyboard. `A=0` clears the buffer; `A=1` pops the oldest
/// buffered key into `C` (0 if empty); `A=2` is unimplemented (per-key state
/// query - this device only models a typed-key stream); `A=3` sets the
/// interrupt message (0 to disable).
pub struct GenericKeyboard {
    state: Arc<Mutex<State>>,
}

impl Device for GenericKeyboard {
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
        let mut state = self.state.lock().expect("keyboard state mutex poisoned");
        match storage.a {
            0 => state.buffer.clear(),
            1 => storage.c = state.buffer.pop_front().unwrap_or(0),
            3 => state.interrupt_message = storage.b,
            _ => {}
        }
    }
}

/// The host-side handle to a registered [`GenericKeyboard`], used to feed in
/// keystrokes from outside the emulated program (a terminal, a GUI event
/// loop, a test harness).
pub struct KeyboardHandle {
    state: Arc<Mutex<State>>,
    trigger: Arc<Mutex<Option<TriggerFn>>>,
}

impl KeyboardHandle {
    /// Buffer a keystroke, dropping the oldest if the buffer is full, and
    /// raise the configured interrupt, if any.
    pub fn push_key(&self, key: u16) {
        let mut state = self.state.lock().expect("keyboard state mutex poisoned");
        if state.buffer.len() >= BUFFER_CAPACITY {
            state.buffer.pop_front();
        }
        state.buffer.push_back(key);
        let message = state.interrupt_message;
        drop(state);

        if message == 0 {
            return;
        }
        if let Some(trigger) = &*self.trigger.lock().expect("keyboard trigger mutex poisoned") {
            trigger.call(message);
        }
    }
}

/// Build a [`GenericKeyboard`] plus the [`KeyboardHandle`] used to feed it
/// keystrokes once registered.
#[must_use]
pub fn generic_keyboard() -> (KeyboardHandle, DeviceBuilder) {
    let state = Arc::new(Mutex::new(State::default()));
    let trigger_slot = Arc::new(Mutex::new(None));

    let handle = KeyboardHandle {
        state: Arc::clone(&state),
        trigger: Arc::clone(&trigger_slot),
    };

    let builder: DeviceBuilder = Box::new(move |trigger: TriggerFn| {
        *trigger_slot
            .lock()
            .expect("keyboard trigger mutex poisoned") = Some(trigger);
        Box::new(GenericKeyboard { state })
    });

    (handle, builder)
}
