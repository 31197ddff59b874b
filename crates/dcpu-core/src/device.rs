//! The hardware device protocol: registration, query, and interrupt
//! handling.

use crate::interrupt::TriggerFn;
use crate::storage::Storage;

/// A hardware device, queryable and interruptible per the `HWN`/`HWQ`/`HWI`
/// protocol (spec.md §4.4).
pub trait Device {
    /// 32-bit hardware id, returned split across `A`/`B` by `HWQ`.
    fn id(&self) -> u32;

    /// 16-bit hardware revision, returned in `C` by `HWQ`.
    fn revision(&self) -> u16;

    /// 32-bit manufacturer id, returned split across `X`/`Y` by `HWQ`.
    fn manufacturer(&self) -> u32;

    /// Handle being selected by `HWI`. Runs on the executor thread; devices
    /// must not mutate anything but the `Storage` they're given here.
    fn handle(&mut self, storage: &mut Storage);
}

/// A device factory: receives a [`TriggerFn`] at construction time and
/// returns the device. The device may retain and call the trigger from any
/// thread to raise an interrupt.
pub type DeviceBuilder = Box<dyn FnOnce(TriggerFn) -> Box<dyn Device + Send>>;
