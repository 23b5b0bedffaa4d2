//! The mode-driven step machine.
//!
//! One call to [`Vm::step`] performs exactly one transition of the current
//! [`Mode`] and reports it as a [`StepEvent`]. The machine never blocks:
//! whenever host work is needed it surfaces `NeedsHostCall` and waits for
//! the driver to feed the outcome back through [`Vm::receive_host_result`].

use crate::continuation::Continuation;
use crate::control::Yielded;
use crate::error::{Exception, VmError, VmResult};
use crate::frame::{Frame, SharedHandlerProgram};
use crate::handler::HandlerStep;
use crate::host::{GenStep, HostCall, HostResult};
use crate::ids::CoroutineId;
use crate::stdlib::{StdlibContext, StdlibHandler};
use crate::value::Value;
use crate::vm::Vm;

/// The machine's internal mode: what is flowing, and where.
#[derive(Debug)]
pub enum Mode {
    /// A value is flowing into the current segment's top frame.
    Deliver(Value),
    /// An exception is flowing the same way.
    Throw(Exception),
    /// A classified yield must be interpreted.
    HandleYield(Yielded),
    /// The current segment is exhausted; its value returns to the caller.
    Return(Value),
}

/// Externally observable outcome of one step.
#[derive(Debug)]
pub enum StepEvent {
    /// Pure internal transition; step again.
    Continue,
    /// The driver must execute this host call and feed the result back.
    NeedsHostCall(HostCall),
    /// Terminal success.
    Done(Value),
    /// Terminal failure.
    Error(VmError),
}

/// What to do with the next host-call result.
#[derive(Debug)]
pub enum PendingHostCall {
    /// The result is a coroutine for a program started in place.
    StartProgramFrame,
    /// The result is a step of the user coroutine `handle`.
    StepUserCoroutine { handle: CoroutineId },
    /// The result is a coroutine for a host handler's body; the callsite
    /// continuation stays in the live dispatch context.
    CallHostHandler,
    /// The result feeds a standard handler waiting on a host call.
    StandardContinuation {
        handler: StdlibHandler,
        k: Continuation,
        context: StdlibContext,
    },
}

impl Vm {
    /// Performs one transition and reports it.
    pub fn step(&mut self) -> StepEvent {
        if self.limits.max_steps > 0 && self.steps_taken >= self.limits.max_steps {
            self.finalize_dispatches();
            return StepEvent::Error(VmError::StepLimitExceeded {
                limit: self.limits.max_steps,
            });
        }
        self.steps_taken += 1;

        let mode = std::mem::replace(&mut self.mode, Mode::Deliver(Value::Unit));
        let result = match mode {
            Mode::Deliver(value) => self.on_deliver(value),
            Mode::Throw(exception) => self.on_throw(exception),
            Mode::HandleYield(yielded) => self.on_yield(yielded),
            Mode::Return(value) => self.on_return(value),
        };
        match result {
            Ok(event) => {
                if matches!(event, StepEvent::Done(_) | StepEvent::Error(_)) {
                    self.finalize_dispatches();
                }
                event
            }
            Err(err) => {
                self.finalize_dispatches();
                StepEvent::Error(err)
            }
        }
    }

    /// Routes a host-call result according to the pending tag.
    pub fn receive_host_result(&mut self, result: HostResult) -> VmResult<StepEvent> {
        let pending = self
            .pending_host
            .take()
            .ok_or_else(|| VmError::internal("host result without a pending host call"))?;

        match (pending, result) {
            (_, HostResult::Failed(exception)) => {
                // Host-raised errors enter the machine as a throw at the
                // point that requested the call.
                self.mode = Mode::Throw(exception);
                Ok(StepEvent::Continue)
            }
            (PendingHostCall::StartProgramFrame, HostResult::Coroutine(handle)) => {
                self.push_frame(Frame::coroutine(handle))?;
                self.mode = Mode::Deliver(Value::Unit);
                Ok(StepEvent::Continue)
            }
            (PendingHostCall::StepUserCoroutine { handle }, HostResult::Gen(step)) => {
                match step {
                    GenStep::Yield(yielded) => {
                        self.push_frame(Frame::started_coroutine(handle))?;
                        self.mode = Mode::HandleYield(yielded);
                    }
                    GenStep::Return(value) => {
                        self.mode = Mode::Deliver(value);
                    }
                    GenStep::Error(exception) => {
                        self.mode = Mode::Throw(exception);
                    }
                }
                Ok(StepEvent::Continue)
            }
            (PendingHostCall::CallHostHandler, HostResult::Coroutine(handle)) => {
                self.push_handler_return_hook()?;
                self.push_frame(Frame::coroutine(handle))?;
                self.mode = Mode::Deliver(Value::Unit);
                Ok(StepEvent::Continue)
            }
            (
                PendingHostCall::StandardContinuation {
                    handler,
                    k,
                    context,
                },
                HostResult::Value(value),
            ) => {
                let action = handler.continue_after_host(value, context, k, &mut self.store)?;
                if matches!(action, crate::handler::HandlerAction::NeedsHost { .. }) {
                    return Err(VmError::internal(
                        "standard handler requested a second host call",
                    ));
                }
                self.apply_handler_action(handler, action)
            }
            (pending, result) => Err(VmError::internal(format!(
                "host result {result:?} does not match pending {pending:?}"
            ))),
        }
    }

    fn on_deliver(&mut self, value: Value) -> VmResult<StepEvent> {
        if self.current_seg()?.is_exhausted() {
            self.mode = Mode::Return(value);
            return Ok(StepEvent::Continue);
        }

        let frame = self
            .current_seg_mut()?
            .pop_frame()
            .ok_or_else(|| VmError::internal("frame stack emptied concurrently"))?;
        match frame {
            Frame::NativeReturn { callback } => {
                let callback = self.callbacks.remove(callback)?;
                callback(value, self)
            }
            Frame::NativeHandlerProgram { program } => {
                let step = {
                    let mut instance = program.lock();
                    instance.resume(value, &mut self.store)
                };
                self.apply_handler_program_step(program, step)
            }
            Frame::HostCoroutine { handle, started } => {
                self.pending_host = Some(PendingHostCall::StepUserCoroutine { handle });
                let call = if started {
                    HostCall::GenSend { co: handle, value }
                } else {
                    HostCall::GenNext { co: handle }
                };
                Ok(StepEvent::NeedsHostCall(call))
            }
        }
    }

    fn on_throw(&mut self, exception: Exception) -> VmResult<StepEvent> {
        let seg_id = self.current_segment_id()?;
        if self.current_seg()?.is_exhausted() {
            let (caller, is_prompt) = {
                let seg = self.current_seg()?;
                (seg.caller, seg.is_prompt_boundary())
            };
            if is_prompt {
                // A throw unwinding past a prompt abandons every dispatch
                // rooted there.
                self.complete_dispatches_at_prompt(seg_id);
            }
            return match caller {
                Some(caller_id) => {
                    self.release_segment(seg_id);
                    self.current_segment = Some(caller_id);
                    self.mode = Mode::Throw(exception);
                    Ok(StepEvent::Continue)
                }
                None => {
                    log::debug!("uncaught exception at root: {exception}");
                    Err(VmError::uncaught(exception))
                }
            };
        }

        let frame = self
            .current_seg_mut()?
            .pop_frame()
            .ok_or_else(|| VmError::internal("frame stack emptied concurrently"))?;
        match frame {
            Frame::NativeReturn { callback } => {
                // Native return frames do not catch; the callback is
                // discarded unrun.
                self.callbacks.discard(callback);
                self.mode = Mode::Throw(exception);
                Ok(StepEvent::Continue)
            }
            Frame::NativeHandlerProgram { program } => {
                let step = {
                    let mut instance = program.lock();
                    instance.throw(exception, &mut self.store)
                };
                self.apply_handler_program_step(program, step)
            }
            Frame::HostCoroutine { handle, .. } => {
                // The coroutine gets a chance to catch.
                self.pending_host = Some(PendingHostCall::StepUserCoroutine { handle });
                Ok(StepEvent::NeedsHostCall(HostCall::GenThrow {
                    co: handle,
                    error: exception,
                }))
            }
        }
    }

    fn on_yield(&mut self, yielded: Yielded) -> VmResult<StepEvent> {
        match yielded {
            Yielded::Primitive(primitive) => self.handle_primitive(primitive),
            Yielded::Effect(effect) => self.start_dispatch(effect),
            Yielded::Program(program) => {
                self.pending_host = Some(PendingHostCall::StartProgramFrame);
                Ok(StepEvent::NeedsHostCall(HostCall::StartProgram { program }))
            }
            Yielded::Unknown(value) => {
                self.mode = Mode::Throw(Exception::type_error(format!(
                    "cannot interpret yielded {} value",
                    value.type_name()
                )));
                Ok(StepEvent::Continue)
            }
        }
    }

    fn on_return(&mut self, value: Value) -> VmResult<StepEvent> {
        let seg_id = self.current_segment_id()?;
        let caller = self.current_seg()?.caller;
        match caller {
            Some(caller_id) => {
                self.release_segment(seg_id);
                self.current_segment = Some(caller_id);
                self.mode = Mode::Deliver(value);
                Ok(StepEvent::Continue)
            }
            None => {
                log::debug!("run finished after {} steps", self.steps_taken);
                Ok(StepEvent::Done(value))
            }
        }
    }

    /// Applies one step of a native handler program: yields re-push the
    /// program frame, return and throw drop it.
    pub(crate) fn apply_handler_program_step(
        &mut self,
        program: SharedHandlerProgram,
        step: HandlerStep,
    ) -> VmResult<StepEvent> {
        match step {
            HandlerStep::Yield(yielded) => {
                self.push_frame(Frame::handler_program(program))?;
                self.mode = Mode::HandleYield(yielded);
                Ok(StepEvent::Continue)
            }
            HandlerStep::Return(value) => {
                self.mode = Mode::Deliver(value);
                Ok(StepEvent::Continue)
            }
            HandlerStep::Throw(exception) => {
                self.mode = Mode::Throw(exception);
                Ok(StepEvent::Continue)
            }
        }
    }

    /// Pushes the implicit return frame that routes a handler's completion
    /// through `handle_handler_return`.
    pub(crate) fn push_handler_return_hook(&mut self) -> VmResult<()> {
        let callback = self.register_callback(Box::new(|value, vm| {
            vm.handle_handler_return(value)
        }));
        self.push_frame(Frame::native_return(callback))
    }
}
