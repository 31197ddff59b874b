//! The bounded interrupt queue and the cross-thread trigger handle devices
//! raise interrupts through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Mutex};

use crate::word::Word;

/// Bounded capacity of the interrupt queue. Fixed by the architecture;
/// exceeding it is always fatal.
pub const MAX_INT_QUEUE: usize = 256;

/// The live channel plus overload flag shared between `Cpu` and every
/// registered device's trigger handle.
///
/// Kept behind an `Arc<Mutex<_>>` so that [`crate::Cpu::reset`] can swap in
/// a freshly allocated channel (per spec.md §3, reset "reallocates the
/// interrupt queue") without invalidating trigger handles devices captured
/// at registration time - mirroring the source's `func(w Word){
/// c.interrupt(w) }`, which closes over the CPU rather than over one
/// specific channel value.
pub(crate) struct InterruptLine {
    tx: Mutex<SyncSender<Word>>,
    overloaded: AtomicBool,
}

impl InterruptLine {
    fn new_pair() -> (Arc<Self>, Receiver<Word>) {
        let (tx, rx) = sync_channel(MAX_INT_QUEUE);
        (
            Arc::new(Self {
                tx: Mutex::new(tx),
                overloaded: AtomicBool::new(false),
            }),
            rx,
        )
    }

    /// Replace the live channel, returning the new receiver end. Clears any
    /// previously recorded overload.
    fn replace(&self, rx_slot: &mut Receiver<Word>) {
        let (tx, rx) = sync_channel(MAX_INT_QUEUE);
        *self.tx.lock().expect("interrupt line mutex poisoned") = tx;
        self.overloaded.store(false, Ordering::SeqCst);
        *rx_slot = rx;
    }

    /// Enqueue a message. Callable from any thread - this is the one
    /// concurrent mutation point in the whole emulator (Design Notes §9).
    ///
    /// On overflow, records the condition rather than returning an error:
    /// the trigger handle devices hold has signature `Fn(Word)` (per
    /// spec.md §6's device factory contract), so there is no caller here
    /// that could usefully receive a `Result`. The condition is surfaced as
    /// [`crate::Error::Overload`] the next time [`crate::Cpu::step`] runs.
    fn send(&self, msg: Word) {
        let tx = self.tx.lock().expect("interrupt line mutex poisoned");
        if let Err(TrySendError::Full(_)) = tx.try_send(msg) {
            log::error!("interrupt queue overload; dropping further delivery");
            self.overloaded.store(true, Ordering::SeqCst);
        }
    }

    fn take_overload(&self) -> bool {
        self.overloaded.swap(false, Ordering::SeqCst)
    }

    /// Enqueue a message on behalf of a synchronous, executor-thread caller
    /// (the `INT` opcode), which can receive a `Result` directly instead of
    /// going through the deferred overload flag.
    fn send_sync(&self, msg: Word) -> Result<(), ()> {
        let tx = self.tx.lock().expect("interrupt line mutex poisoned");
        tx.try_send(msg).map_err(|_| ())
    }
}

/// A cloneable handle devices use to raise an interrupt on the CPU that
/// registered them, from any thread, at any time.
#[derive(Clone)]
pub struct TriggerFn(Arc<InterruptLine>);

impl TriggerFn {
    /// Raise an interrupt with the given message.
    pub fn call(&self, msg: Word) {
        self.0.send(msg);
    }
}

/// Owns the receiving end of the interrupt queue plus the shared line used
/// to construct [`TriggerFn`] handles for devices.
pub(crate) struct InterruptController {
    line: Arc<InterruptLine>,
    rx: Receiver<Word>,
}

impl InterruptController {
    pub(crate) fn new() -> Self {
        let (line, rx) = InterruptLine::new_pair();
        Self { line, rx }
    }

    /// A trigger handle bound to this controller's current channel.
    pub(crate) fn trigger_fn(&self) -> TriggerFn {
        TriggerFn(Arc::clone(&self.line))
    }

    /// Reallocate the queue, as `Cpu::reset` requires.
    pub(crate) fn reset(&mut self) {
        self.line.replace(&mut self.rx);
    }

    /// Enqueue a message raised synchronously on the executor thread (used
    /// internally by the `INT` opcode). Fails if the queue is already full.
    pub(crate) fn send(&self, msg: Word) -> Result<(), ()> {
        self.line.send_sync(msg)
    }

    /// Pop the next pending message, if any, without blocking.
    pub(crate) fn try_recv(&self) -> Option<Word> {
        self.rx.try_recv().ok()
    }

    /// Consume and clear a pending overload condition, if any.
    pub(crate) fn take_overload(&self) -> bool {
        self.line.take_overload()
    }
}
