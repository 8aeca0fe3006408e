//! Thread-local record of the logical process a worker is executing.
//!
//! Set and cleared by the dispatcher around each round so that code reached
//! from deep inside an event payload (diagnostics, assertions) can answer
//! "which LP am I on" without threading the id through every call.

use std::cell::Cell;

thread_local! {
    static CURRENT_LP: Cell<Option<u32>> = const { Cell::new(None) };
}

/// Local id of the LP executing on this thread, if a round is in progress.
pub fn current_lp() -> Option<u32> {
    CURRENT_LP.with(Cell::get)
}

pub(crate) fn enter(lp: u32) {
    CURRENT_LP.with(|c| c.set(Some(lp)));
}

pub(crate) fn exit() {
    CURRENT_LP.with(|c| c.set(None));
}
