use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A predicate polled by every blocking wait on the consumer side.
///
/// When it returns true, reads return short, seeks and control requests fail,
/// and enabling the cache gives up.
pub trait Interrupt: Send + Sync {
    fn is_interrupted(&self) -> bool;
}

/// Never interrupts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInterrupt;

impl Interrupt for NoInterrupt {
    fn is_interrupted(&self) -> bool {
        false
    }
}

/// A cloneable flag that can be raised from any thread.
#[derive(Debug, Default, Clone)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Interrupt for InterruptFlag {
    fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sleep for `wait` unless already interrupted. Returns true if the caller
/// should stop waiting.
pub(crate) fn sleep_or_interrupted(interrupt: &dyn Interrupt, wait: Duration) -> bool {
    if interrupt.is_interrupted() {
        return true;
    }

    std::thread::sleep(wait);

    interrupt.is_interrupted()
}
