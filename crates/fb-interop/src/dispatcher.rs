//! Invocation dispatcher: one request at a time through encode, call,
//! decode and release.

use std::fmt;

use crate::allocator::Allocator;
use crate::channel::RESULT_ARITY;
use crate::error::{InteropError, Result};
use crate::marshal;
use crate::memory::ForeignString;
use crate::module::SandboxModule;
use crate::request::{OrientationSet, Request, Response};
use crate::scramble;
use crate::stats::SolveStats;

/// Where the dispatcher is in the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    /// Ready for a request
    #[default]
    Idle,
    /// Copying the scramble into the sandbox
    Encoding,
    /// Inside the solve routine
    Calling,
    /// Reading the result back
    Decoding,
    /// Returning buffers to the sandbox allocator
    Releasing,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Idle => "idle",
            DispatchState::Encoding => "encoding",
            DispatchState::Calling => "calling",
            DispatchState::Decoding => "decoding",
            DispatchState::Releasing => "releasing",
        };
        f.write_str(name)
    }
}

/// Buffers owned by the request currently in flight.
#[derive(Default)]
struct InFlight {
    input: Option<ForeignString>,
    result: Option<ForeignString>,
}

/// Drives one sandbox through the solve protocol.
///
/// The dispatcher owns its sandbox handle, so several independent
/// dispatchers (and sandboxes) can coexist in one process.
pub struct Dispatcher<M> {
    module: M,
    allocator: Allocator,
    state: DispatchState,
    validate_scramble: bool,
    stats: SolveStats,
}

impl<M: SandboxModule> Dispatcher<M> {
    /// Wrap an instantiated sandbox.
    pub fn new(module: M) -> Self {
        Self {
            module,
            allocator: Allocator::new(),
            state: DispatchState::Idle,
            validate_scramble: true,
            stats: SolveStats::new(),
        }
    }

    /// Builder: check scramble notation before calling into the sandbox
    pub fn with_scramble_validation(mut self, enabled: bool) -> Self {
        self.validate_scramble = enabled;
        self
    }

    /// Current state.
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Host-side view of live sandbox allocations.
    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Timings of every solve call so far.
    pub fn stats(&self) -> &SolveStats {
        &self.stats
    }

    /// Borrow the sandbox.
    pub fn module(&self) -> &M {
        &self.module
    }

    /// Mutably borrow the sandbox.
    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    /// Give the sandbox back.
    pub fn into_module(self) -> M {
        self.module
    }

    /// Run one request to completion.
    ///
    /// Whatever happens, every buffer allocated for the request is released
    /// (best effort on failure), the return channel is drained and the
    /// dispatcher is back in [`DispatchState::Idle`] when this returns.
    pub fn dispatch(&mut self, request: &Request) -> Result<Response> {
        // Guard only: `&mut self` already rules out re-entry from safe code.
        if self.state != DispatchState::Idle {
            return Err(InteropError::Busy);
        }

        let orientations = request.orientation_set()?;
        if self.validate_scramble {
            scramble::parse_moves(&request.scramble)?;
        }

        let mut buffers = InFlight::default();
        let outcome = self.run(request, orientations, &mut buffers);

        self.transition(DispatchState::Releasing);
        let released = self.release(&mut buffers);
        let leftover = self.module.return_channel().reset();
        if leftover > 0 {
            tracing::warn!(leftover, "drained return channel after failed request");
        }
        self.transition(DispatchState::Idle);

        match (outcome, released) {
            (Ok(response), Ok(())) => Ok(response),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), released) => {
                if let Err(release_err) = released {
                    tracing::warn!("release after failed request also failed: {}", release_err);
                }
                if !e.is_protocol_violation() {
                    tracing::debug!("request failed: {}", e);
                }
                Err(e)
            }
        }
    }

    fn run(
        &mut self,
        request: &Request,
        orientations: OrientationSet,
        buffers: &mut InFlight,
    ) -> Result<Response> {
        self.transition(DispatchState::Encoding);
        let input = marshal::encode(&mut self.module, &mut self.allocator, &request.scramble)?;
        buffers.input = Some(input);

        self.transition(DispatchState::Calling);
        self.module.return_channel().arm()?;
        let metrics = match self.module.solve(input, orientations) {
            Ok(metrics) => metrics,
            Err(e) => {
                self.salvage_result(buffers);
                return Err(e);
            }
        };
        self.stats.record(metrics);
        let raw = self.module.return_channel().take()?;

        self.transition(DispatchState::Decoding);
        let memory_size = self.module.memory_size();
        let result = ForeignString::new(raw.ptr, raw.len, memory_size)?;
        if !result.is_empty() {
            self.allocator.adopt(result)?;
            buffers.result = Some(result);
        }
        let text = marshal::decode(&mut self.module, result)?;
        tracing::debug!(
            len = result.len(),
            us = metrics.execution_time_us,
            "solve returned"
        );
        Response::parse(&text)
    }

    /// Claim a result the module pushed before its call failed, so the
    /// release step frees it along with the request buffer.
    fn salvage_result(&mut self, buffers: &mut InFlight) {
        if self.module.return_channel().depth() != RESULT_ARITY {
            return;
        }
        let Ok(raw) = self.module.return_channel().take() else {
            return;
        };
        let memory_size = self.module.memory_size();
        match ForeignString::new(raw.ptr, raw.len, memory_size) {
            Ok(result) if !result.is_empty() => match self.allocator.adopt(result) {
                Ok(()) => {
                    tracing::warn!(
                        ptr = raw.ptr,
                        len = raw.len,
                        "reclaiming result of failed call"
                    );
                    buffers.result = Some(result);
                }
                Err(e) => tracing::warn!("cannot reclaim result of failed call: {}", e),
            },
            Ok(_) => {}
            Err(e) => tracing::warn!("cannot reclaim result of failed call: {}", e),
        }
    }

    /// Release the result buffer, then the request buffer.
    fn release(&mut self, buffers: &mut InFlight) -> Result<()> {
        let mut first_error = None;
        for buffer in [buffers.result.take(), buffers.input.take()].into_iter().flatten() {
            if let Err(e) = self.allocator.release(&mut self.module, buffer.ptr()) {
                tracing::warn!(ptr = buffer.ptr(), "failed to release buffer: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn transition(&mut self, next: DispatchState) {
        tracing::trace!(from = %self.state, to = %next, "dispatch");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelPhase;
    use crate::error::DecodeError;
    use crate::testing::{Behavior, FakeModule};
    use serde_json::json;

    fn reply(text: &str) -> Dispatcher<FakeModule> {
        Dispatcher::new(FakeModule::new(Behavior::Reply(text.to_string())))
    }

    fn assert_clean(dispatcher: &mut Dispatcher<FakeModule>) {
        assert_eq!(dispatcher.state(), DispatchState::Idle);
        assert_eq!(dispatcher.allocator().outstanding_count(), 0);
        assert_eq!(dispatcher.module().outstanding_bytes(), 0);
        let channel = dispatcher.module_mut().return_channel();
        assert_eq!(channel.depth(), 0);
        assert_eq!(channel.phase(), ChannelPhase::Idle);
    }

    #[test]
    fn test_end_to_end() {
        let mut dispatcher = reply(r#"{"moves":["R"],"length":1}"#);
        let request = Request::new("R U R' U'", vec![0, 1, 2, 3]);

        let response = dispatcher.dispatch(&request).unwrap();
        assert_eq!(response.as_value(), &json!({"moves": ["R"], "length": 1}));
        assert_eq!(dispatcher.module().masks, vec![0b1111]);
        assert_eq!(dispatcher.module().depth_at_call, vec![0]);
        assert_eq!(dispatcher.stats().count(), 1);
        assert_clean(&mut dispatcher);
    }

    #[test]
    fn test_no_push_is_desync() {
        let mut dispatcher = Dispatcher::new(FakeModule::new(Behavior::Push(vec![])));
        let err = dispatcher.dispatch(&Request::new("R", vec![])).unwrap_err();
        assert!(matches!(
            err,
            InteropError::ProtocolDesync {
                expected: 2,
                found: 0
            }
        ));
        assert_clean(&mut dispatcher);
    }

    #[test]
    fn test_single_push_is_desync() {
        let mut dispatcher = Dispatcher::new(FakeModule::new(Behavior::Push(vec![4096])));
        let err = dispatcher.dispatch(&Request::new("R", vec![])).unwrap_err();
        assert!(matches!(err, InteropError::ProtocolDesync { found: 1, .. }));
        assert!(err.is_protocol_violation());
        assert_clean(&mut dispatcher);
    }

    #[test]
    fn test_result_past_memory_end() {
        // (len, ptr): 1 MiB at offset 2048 in a 64 KiB memory
        let mut dispatcher =
            Dispatcher::new(FakeModule::new(Behavior::Push(vec![1024 * 1024, 2048])));
        let err = dispatcher.dispatch(&Request::new("R", vec![])).unwrap_err();
        assert!(matches!(
            err,
            InteropError::OutOfBounds {
                ptr: 2048,
                len: 1048576,
                ..
            }
        ));
        assert_clean(&mut dispatcher);
    }

    #[test]
    fn test_malformed_result_is_decode_error() {
        let mut dispatcher = reply("not json");
        let err = dispatcher.dispatch(&Request::new("R", vec![])).unwrap_err();
        assert!(matches!(err, InteropError::Decode(DecodeError::Json(_))));
        assert_clean(&mut dispatcher);
    }

    #[test]
    fn test_invalid_scramble_never_reaches_sandbox() {
        let mut dispatcher = reply("[]");
        let err = dispatcher.dispatch(&Request::new("R U Q", vec![])).unwrap_err();
        match err {
            InteropError::InvalidScramble(e) => assert_eq!(e.position, 4),
            other => panic!("unexpected error: {other}"),
        }
        assert!(dispatcher.module().masks.is_empty());
        assert_clean(&mut dispatcher);
    }

    #[test]
    fn test_validation_can_be_disabled() {
        let mut dispatcher =
            Dispatcher::new(FakeModule::new(Behavior::Echo)).with_scramble_validation(false);
        let response = dispatcher.dispatch(&Request::new("héllo wörld", vec![])).unwrap();
        assert_eq!(response.as_value(), &json!(["héllo wörld"]));
        assert_clean(&mut dispatcher);
    }

    #[test]
    fn test_invalid_orientation() {
        let mut dispatcher = reply("[]");
        let err = dispatcher.dispatch(&Request::new("R", vec![30])).unwrap_err();
        assert!(matches!(err, InteropError::InvalidOrientation(30)));
        assert_clean(&mut dispatcher);
    }

    #[test]
    fn test_empty_orientations_select_all() {
        let mut dispatcher = reply("[]");
        dispatcher.dispatch(&Request::new("R", vec![])).unwrap();
        assert_eq!(dispatcher.module().masks, vec![OrientationSet::ALL.bits()]);
    }

    #[test]
    fn test_empty_scramble_and_empty_result() {
        let mut dispatcher = Dispatcher::new(FakeModule::new(Behavior::Echo));
        let response = dispatcher.dispatch(&Request::new("", vec![])).unwrap();
        assert_eq!(response.as_value(), &json!([""]));
        assert_clean(&mut dispatcher);

        // An empty result is not valid JSON, but nothing may leak either way.
        let mut dispatcher = reply("");
        assert!(dispatcher.dispatch(&Request::new("R", vec![])).is_err());
        assert_clean(&mut dispatcher);
    }

    #[test]
    fn test_allocation_failure_is_request_scoped() {
        let module = FakeModule::new(Behavior::Echo).with_max_pages(1);
        let mut dispatcher = Dispatcher::new(module);

        let huge = "R ".repeat(40 * 1024);
        let err = dispatcher.dispatch(&Request::new(huge, vec![])).unwrap_err();
        assert!(matches!(err, InteropError::Allocation { .. }));
        assert_clean(&mut dispatcher);

        // The sandbox still serves ordinary requests afterwards.
        let response = dispatcher.dispatch(&Request::new("R U", vec![])).unwrap();
        assert_eq!(response.as_value(), &json!(["R U"]));
    }

    #[test]
    fn test_no_leak_over_many_cycles() {
        let mut dispatcher = Dispatcher::new(FakeModule::new(Behavior::Echo));
        let baseline = dispatcher.module().outstanding_bytes();

        for i in 0..100 {
            let scramble = "R U R' U' ".repeat(i % 17 + 1);
            let response = dispatcher.dispatch(&Request::new(scramble.clone(), vec![])).unwrap();
            assert_eq!(response.as_value(), &json!([scramble]));
        }

        assert_eq!(dispatcher.module().outstanding_bytes(), baseline);
        assert_eq!(dispatcher.allocator().outstanding_bytes(), 0);
        assert_eq!(dispatcher.stats().count(), 100);
        assert!(dispatcher.module().depth_at_call.iter().all(|&d| d == 0));
    }

    #[test]
    fn test_failed_call_releases_pushed_result() {
        let module = FakeModule::new(Behavior::ReplyThenTrap(r#"{"moves":[]}"#.to_string()));
        let mut dispatcher = Dispatcher::new(module);

        let err = dispatcher.dispatch(&Request::new("R", vec![])).unwrap_err();
        assert!(matches!(err, InteropError::Wasm(_)));
        assert_eq!(dispatcher.stats().count(), 0);
        assert_clean(&mut dispatcher);
    }

    #[test]
    fn test_failed_call_with_partial_push() {
        let module = FakeModule::new(Behavior::PushThenTrap(vec![12]));
        let mut dispatcher = Dispatcher::new(module);

        assert!(dispatcher.dispatch(&Request::new("R", vec![])).is_err());
        assert_clean(&mut dispatcher);
    }

    #[test]
    fn test_failures_interleaved_with_successes() {
        let mut dispatcher = reply(r#"{"ok":true}"#);
        for i in 0..10 {
            let request = if i % 2 == 0 {
                Request::new("R", vec![])
            } else {
                Request::new("nope", vec![])
            };
            let _ = dispatcher.dispatch(&request);
            assert_clean(&mut dispatcher);
        }
    }
}
