// ===============================
// src/state.rs (shared strategy/execution runtime)
// ===============================
//
// All mutable trading state lives on this one struct, owned by the engine
// and shared with the executor. Locks are std mutexes and are never held
// across an await point; `closing` and `disabled` are plain atomics since
// the hazard is interleaving at await boundaries, not parallelism.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::domain::{Position, Signal};

#[derive(Debug, Default)]
pub struct RuntimeState {
    pub signal: Mutex<Option<Signal>>,
    pub position: Mutex<Option<Position>>,
    closing: AtomicBool,
    disabled: AtomicBool,
    /// Shared across opens and closes; advisory 500 ms spacing, not a lock.
    pub last_order_ms: Mutex<i64>,
    pub last_close_ms: Mutex<Option<i64>>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> Option<Signal> {
        self.signal.lock().unwrap().clone()
    }

    pub fn set_signal(&self, sig: Option<Signal>) {
        *self.signal.lock().unwrap() = sig;
    }

    pub fn position(&self) -> Option<Position> {
        self.position.lock().unwrap().clone()
    }

    pub fn set_position(&self, pos: Option<Position>) {
        *self.position.lock().unwrap() = pos;
    }

    pub fn clear_trade_state(&self) {
        self.set_signal(None);
        self.set_position(None);
    }

    pub fn disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn set_disabled(&self, v: bool) {
        self.disabled.store(v, Ordering::SeqCst);
    }

    /// Try to claim the close path. Returns a guard that releases the flag
    /// on every exit (early return, error, or panic) when it exists; `None`
    /// means another close is already in flight.
    pub fn try_begin_close(&self) -> Option<ClosingGuard<'_>> {
        if self
            .closing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(ClosingGuard { state: self })
        } else {
            None
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn last_close_ms(&self) -> Option<i64> {
        *self.last_close_ms.lock().unwrap()
    }
}

pub struct ClosingGuard<'a> {
    state: &'a RuntimeState,
}

impl Drop for ClosingGuard<'_> {
    fn drop(&mut self) {
        self.state.closing.store(false, Ordering::SeqCst);
    }
}
