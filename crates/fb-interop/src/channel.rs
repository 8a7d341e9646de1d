//! Return channel: the result stack the sandbox pushes its answer onto.
//!
//! A solve routine cannot return a dynamically sized byte range through a
//! wasm return value, so it calls the `stack_push` import twice before it
//! returns: length first, then pointer. The host pops pointer, then length.
//!
//! ```text
//!   Idle --arm()--> Armed --push(len), push(ptr)--> Fulfilled --take()--> Idle
//! ```
//!
//! The channel is a single slot. It supports one synchronous, non-reentrant
//! call at a time.

use crate::error::{InteropError, Result};

/// Number of values one completed call pushes: (length, pointer).
pub const RESULT_ARITY: usize = 2;

/// Pushes accepted before the call is trapped.
const MAX_DEPTH: usize = 8;

/// Phase of the current call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelPhase {
    /// No call in flight; pushes are rejected
    #[default]
    Idle,
    /// A call is in flight and has not pushed a full pair yet
    Armed,
    /// A full pair (or more) has been pushed
    Fulfilled,
}

/// The (pointer, length) pair popped after a call, not yet bounds-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawResult {
    /// Result pointer
    pub ptr: u32,
    /// Result length in bytes
    pub len: u32,
}

/// LIFO of values pushed by the sandbox during one call.
#[derive(Debug, Default)]
pub struct ReturnChannel {
    stack: Vec<u32>,
    phase: ChannelPhase,
}

impl ReturnChannel {
    /// Create an empty, idle channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> ChannelPhase {
        self.phase
    }

    /// Number of values currently on the stack.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Prepare for a call. The stack must be empty.
    pub fn arm(&mut self) -> Result<()> {
        if !self.stack.is_empty() {
            let found = self.reset();
            return Err(desync(0, found));
        }
        self.phase = ChannelPhase::Armed;
        Ok(())
    }

    /// Push a value on behalf of the sandbox.
    ///
    /// Fails outside an armed call and once the stack is unreasonably deep;
    /// the host function turns the failure into a trap.
    pub fn push(&mut self, value: u32) -> Result<()> {
        if self.phase == ChannelPhase::Idle {
            return Err(desync(0, self.stack.len() + 1));
        }
        if self.stack.len() >= MAX_DEPTH {
            return Err(desync(RESULT_ARITY, self.stack.len() + 1));
        }
        self.stack.push(value);
        if self.stack.len() >= RESULT_ARITY {
            self.phase = ChannelPhase::Fulfilled;
        }
        Ok(())
    }

    /// Pop the result pair. The stack must hold exactly [`RESULT_ARITY`]
    /// values; anything else drains the channel and reports a desync.
    pub fn take(&mut self) -> Result<RawResult> {
        let found = self.stack.len();
        if found != RESULT_ARITY {
            self.reset();
            return Err(desync(RESULT_ARITY, found));
        }

        let (ptr, len) = match (self.stack.pop(), self.stack.pop()) {
            (Some(ptr), Some(len)) => (ptr, len),
            _ => return Err(desync(RESULT_ARITY, found)),
        };
        self.phase = ChannelPhase::Idle;
        Ok(RawResult { ptr, len })
    }

    /// Drain the channel and return to idle. Returns how many values were
    /// discarded.
    pub fn reset(&mut self) -> usize {
        let discarded = self.stack.len();
        self.stack.clear();
        self.phase = ChannelPhase::Idle;
        discarded
    }
}

fn desync(expected: usize, found: usize) -> InteropError {
    tracing::error!(
        target: "fb_interop::protocol",
        expected,
        found,
        "return channel desync"
    );
    InteropError::ProtocolDesync { expected, found }
}
