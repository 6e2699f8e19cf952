// SPDX-License-Identifier: MIT

//! Callback-driven asynchronous block IO.
//!
//! `AsyncBlockIo` stands in for the external AIO dispatcher a real driver
//! would sit on top of: `submit_*` enqueues work and returns immediately: the
//! completion closure runs later, driven by [`Trampoline::run_pending`].
//! Completions submitted here must never run synchronously inside
//! `submit_*` — callers (notably `vdi-core`'s async state machine) rely on
//! that to avoid re-entrant phase transitions.

use crate::error::IoResult;

#[cfg(feature = "alloc")]
use alloc::{boxed::Box, collections::VecDeque, vec::Vec};

/// Outcome handed back to a completion closure.
pub enum IoOutcome {
    Read { buf: Vec<u8>, result: IoResult },
    Write { result: IoResult },
    Flush { result: IoResult },
}

/// A one-shot completion callback.
pub type Completion = Box<dyn FnOnce(IoOutcome)>;

/// Queue of deferred completions. A backend that cannot complete a request
/// inline pushes a thunk here instead of calling the completion directly;
/// the driver pumps the queue via `run_pending` at a safe point (after the
/// current phase transition has been committed).
#[derive(Default)]
pub struct Trampoline {
    pending: VecDeque<Box<dyn FnOnce()>>,
}

impl Trampoline {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    /// Defers `f` to run on the next `run_pending` call, not before.
    pub fn defer(&mut self, f: impl FnOnce() + 'static) {
        self.pending.push_back(Box::new(f));
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Runs every thunk queued so far, in order. Thunks deferred by a thunk
    /// run in a later call, never the same one (one-shot re-entry only).
    pub fn run_pending(&mut self) {
        let batch: Vec<_> = self.pending.drain(..).collect();
        for f in batch {
            f();
        }
    }
}

/// Asynchronous counterpart to `BlockIo`: submission returns immediately,
/// completion is delivered later through `cb`.
pub trait AsyncBlockIo {
    fn submit_read(
        &mut self,
        offset: u64,
        buf: Vec<u8>,
        trampoline: &mut Trampoline,
        cb: Completion,
    );

    fn submit_write(
        &mut self,
        offset: u64,
        buf: Vec<u8>,
        trampoline: &mut Trampoline,
        cb: Completion,
    );

    fn submit_flush(&mut self, trampoline: &mut Trampoline, cb: Completion);
}
