//! Effect dispatch and the control primitives.
//!
//! Everything a handler can do with a dispatch lives here: starting one,
//! answering or abandoning the callsite, forwarding outward, installing
//! handlers, and minting or activating continuations.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::continuation::Continuation;
use crate::control::ControlPrimitive;
use crate::coroutine::Program;
use crate::dispatch::DispatchContext;
use crate::effect::Effect;
use crate::error::{Exception, VmError, VmResult};
use crate::handler::{Handler, HandlerAction, HandlerEntry};
use crate::host::HostCall;
use crate::ids::{DispatchId, Marker};
use crate::segment::Segment;
use crate::step::{Mode, PendingHostCall, StepEvent};
use crate::stdlib::StdlibHandler;
use crate::trace::{HandlerOutcome, TraceEvent};
use crate::value::Value;
use crate::vm::Vm;

/// How a continuation is being entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActivationKind {
    /// Call-return: the current segment becomes the caller.
    Resume,
    /// Tail: the current context is abandoned.
    Transfer,
}

/// What flows into the activated continuation.
#[derive(Debug)]
pub(crate) enum ActivationPayload {
    Deliver(Value),
    Throw(Exception),
}

/// Which forwarding primitive is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForwardKind {
    Delegate,
    Pass,
}

impl Vm {
    /// Routes `effect` to the first visible handler that can handle it.
    pub(crate) fn start_dispatch(&mut self, effect: Effect) -> VmResult<StepEvent> {
        self.lazy_pop_completed();
        if self.dispatch_stack.len() >= self.limits.max_dispatch_depth {
            return Err(VmError::DispatchDepthExceeded {
                limit: self.limits.max_dispatch_depth,
            });
        }

        let scope_chain = self.current_scope_chain();
        let handler_chain: Vec<Marker> = self
            .visible_handlers(&scope_chain)
            .into_iter()
            .filter(|marker| self.handlers.contains_key(marker))
            .collect();

        let (handler_idx, handler_marker, entry) =
            self.find_matching_handler(&handler_chain, &effect)?;
        let HandlerEntry {
            handler,
            prompt_seg_id,
        } = entry;

        let dispatch_id = DispatchId::fresh();
        let k_user = self.capture_current(Some(dispatch_id))?;

        let handler_seg = Segment::new(handler_marker, Some(prompt_seg_id), scope_chain);
        let handler_seg_id = self.alloc_segment(handler_seg)?;
        self.current_segment = Some(handler_seg_id);

        log::trace!(
            "dispatch {}: {} -> handler `{}` (idx {})",
            dispatch_id.raw(),
            effect,
            handler.name(),
            handler_idx
        );
        self.trace.record(TraceEvent::DispatchStarted {
            dispatch_id,
            effect: effect.to_string(),
            handler: handler.name().to_string(),
            handler_idx,
        });

        self.dispatch_stack.push(DispatchContext {
            dispatch_id,
            effect: effect.clone(),
            handler_chain,
            handler_idx,
            k_user: k_user.clone(),
            prompt_seg_id,
            completed: false,
            pass_through: false,
        });

        self.invoke_handler(handler, effect, k_user)
    }

    /// Finds the first marker in `handler_chain` whose handler can handle
    /// `effect`.
    fn find_matching_handler(
        &self,
        handler_chain: &[Marker],
        effect: &Effect,
    ) -> VmResult<(usize, Marker, HandlerEntry)> {
        for (idx, &marker) in handler_chain.iter().enumerate() {
            let entry = self.handlers.get(&marker).ok_or_else(|| {
                VmError::internal(format!(
                    "handler registry lost marker {marker} at chain index {idx}"
                ))
            })?;
            if entry.handler.can_handle(effect) {
                return Ok((idx, marker, entry.clone()));
            }
        }
        Err(VmError::unhandled_effect(effect.to_string()))
    }

    /// Invokes `handler` in the freshly allocated handler execution segment.
    pub(crate) fn invoke_handler(
        &mut self,
        handler: Handler,
        effect: Effect,
        k_user: Continuation,
    ) -> VmResult<StepEvent> {
        match handler {
            Handler::Standard(h) => {
                let action = h.handle(effect, k_user, &mut self.store)?;
                self.apply_handler_action(h, action)
            }
            Handler::Native(factory) => {
                self.push_handler_return_hook()?;
                let mut instance = factory.instantiate();
                let step = instance.start(effect, k_user, &mut self.store);
                let shared = Arc::new(Mutex::new(instance));
                self.apply_handler_program_step(shared, step)
            }
            Handler::HostCallable(h) => {
                self.pending_host = Some(PendingHostCall::CallHostHandler);
                Ok(StepEvent::NeedsHostCall(HostCall::CallHandler {
                    handler: h,
                    effect,
                    k: k_user,
                }))
            }
        }
    }

    /// Applies the immediate action a standard handler produced.
    pub(crate) fn apply_handler_action(
        &mut self,
        handler: StdlibHandler,
        action: HandlerAction,
    ) -> VmResult<StepEvent> {
        match action {
            HandlerAction::Resume { k, value } => {
                self.record_handler_outcome(HandlerOutcome::Resumed);
                self.activate(&k, ActivationPayload::Deliver(value), ActivationKind::Resume)
            }
            HandlerAction::Transfer { k, value } => {
                self.record_handler_outcome(HandlerOutcome::Transferred);
                self.activate(&k, ActivationPayload::Deliver(value), ActivationKind::Transfer)
            }
            HandlerAction::Return { value } => self.handle_handler_return(value),
            HandlerAction::NeedsHost { call, k, context } => {
                self.pending_host = Some(PendingHostCall::StandardContinuation {
                    handler,
                    k,
                    context,
                });
                Ok(StepEvent::NeedsHostCall(call))
            }
        }
    }

    /// Interprets one control primitive.
    pub(crate) fn handle_primitive(&mut self, primitive: ControlPrimitive) -> VmResult<StepEvent> {
        log::trace!("primitive: {}", primitive.name());
        match primitive {
            ControlPrimitive::Resume { k, value } => {
                self.activate(&k, ActivationPayload::Deliver(value), ActivationKind::Resume)
            }
            ControlPrimitive::Transfer { k, value } => {
                self.activate(&k, ActivationPayload::Deliver(value), ActivationKind::Transfer)
            }
            ControlPrimitive::ThrowInto { k, error } => {
                self.activate(&k, ActivationPayload::Throw(error), ActivationKind::Transfer)
            }
            ControlPrimitive::Delegate { effect } => {
                self.handle_forward(ForwardKind::Delegate, effect)
            }
            ControlPrimitive::Pass { effect } => self.handle_forward(ForwardKind::Pass, effect),
            ControlPrimitive::WithHandler { handler, program } => {
                self.with_handler(handler, program)
            }
            ControlPrimitive::GetContinuation => self.get_continuation(),
            ControlPrimitive::GetHandlers => self.get_handlers(),
            ControlPrimitive::CreateContinuation { program, handlers } => {
                let k = Continuation::create(program, handlers);
                self.mode = Mode::Deliver(Value::Continuation(k));
                Ok(StepEvent::Continue)
            }
            ControlPrimitive::ResumeContinuation { k, value } => {
                if k.is_started() {
                    self.activate(&k, ActivationPayload::Deliver(value), ActivationKind::Resume)
                } else {
                    // The handler tree returns here when the new program
                    // finishes; the resume value is ignored by contract.
                    let caller = self.current_segment;
                    self.activate_created(&k, caller)
                }
            }
        }
    }

    /// Activates a continuation with the given payload and position.
    pub(crate) fn activate(
        &mut self,
        k: &Continuation,
        payload: ActivationPayload,
        kind: ActivationKind,
    ) -> VmResult<StepEvent> {
        if !k.is_started() {
            return match kind {
                ActivationKind::Resume => Err(VmError::invalid_continuation(
                    "cannot resume an unstarted continuation",
                )),
                ActivationKind::Transfer => match payload {
                    ActivationPayload::Deliver(_) => self.activate_created(k, None),
                    ActivationPayload::Throw(_) => Err(VmError::invalid_continuation(
                        "cannot throw into an unstarted continuation",
                    )),
                },
            };
        }

        self.lazy_pop_completed();
        if self.chain_consumed(k) {
            return Err(VmError::ContinuationAlreadyResumed);
        }
        self.consume_chain(k);
        self.check_dispatch_completion(k);

        // Materialize the whole parent chain: the deepest parent receives
        // the payload; each link's segment calls back into the next-outer
        // link, and the outermost link calls back here (or nowhere, for a
        // tail transfer).
        let mut caller = match kind {
            ActivationKind::Resume => Some(self.current_segment_id()?),
            ActivationKind::Transfer => None,
        };
        for link in k.chain() {
            let mut seg = Segment::new(link.marker, caller, (*link.scope_chain).clone());
            seg.frames = (*link.frames_snapshot).clone();
            let id = self.alloc_segment(seg)?;
            caller = Some(id);
        }
        self.current_segment = caller;

        self.trace.record(TraceEvent::ContinuationActivated {
            cont_id: k.cont_id().raw(),
            tail: kind == ActivationKind::Transfer,
        });

        self.mode = match payload {
            ActivationPayload::Deliver(value) => Mode::Deliver(value),
            ActivationPayload::Throw(error) => Mode::Throw(error),
        };
        Ok(StepEvent::Continue)
    }

    /// Forwards the current dispatch to the next outer matching handler.
    fn handle_forward(
        &mut self,
        kind: ForwardKind,
        effect_override: Option<Effect>,
    ) -> VmResult<StepEvent> {
        self.lazy_pop_completed();
        let Some(top) = self.dispatch_stack.last() else {
            return Err(VmError::invalid_continuation(format!(
                "{kind:?} outside of a dispatch"
            )));
        };
        let dispatch_id = top.dispatch_id;
        let handler_chain = top.handler_chain.clone();
        let from_idx = top.handler_idx;
        let start_idx = top.handler_idx + 1;
        let effect = effect_override.unwrap_or_else(|| top.effect.clone());
        let parent_k = top.k_user.clone();
        let inner_seg_id = self.current_segment_id()?;

        match kind {
            ForwardKind::Delegate => {
                // The inner handler keeps a continuation: the outer
                // handler's return value becomes the value of its yield.
                let k_new = self
                    .capture_current(Some(dispatch_id))?
                    .with_parent(parent_k);
                self.current_seg_mut()?.frames.clear();
                if let Some(top) = self.dispatch_stack.last_mut() {
                    top.k_user = k_new;
                }
            }
            ForwardKind::Pass => {
                // Terminal for the inner handler: the outer answer flows
                // through its emptied segment to the callsite.
                self.current_seg_mut()?.frames.clear();
                if let Some(top) = self.dispatch_stack.last_mut() {
                    top.pass_through = true;
                }
            }
        }

        for idx in start_idx..handler_chain.len() {
            let marker = handler_chain[idx];
            let entry = self.handlers.get(&marker).ok_or_else(|| {
                VmError::internal(format!(
                    "handler registry lost marker {marker} while forwarding"
                ))
            })?;
            if !entry.handler.can_handle(&effect) {
                continue;
            }
            let handler = entry.handler.clone();

            let k_user = {
                let top = self
                    .dispatch_stack
                    .last_mut()
                    .ok_or_else(|| VmError::internal("dispatch popped while forwarding"))?;
                top.handler_idx = idx;
                top.effect = effect.clone();
                top.k_user.clone()
            };

            let event = TraceEvent::Delegated {
                dispatch_id,
                from_idx,
                to_idx: idx,
                to_handler: handler.name().to_string(),
            };
            self.trace.record(match kind {
                ForwardKind::Delegate => event,
                ForwardKind::Pass => TraceEvent::Passed {
                    dispatch_id,
                    from_idx,
                    to_idx: idx,
                    to_handler: handler.name().to_string(),
                },
            });

            let scope_chain = self.current_scope_chain();
            let handler_seg = Segment::new(marker, Some(inner_seg_id), scope_chain);
            let handler_seg_id = self.alloc_segment(handler_seg)?;
            self.current_segment = Some(handler_seg_id);

            return self.invoke_handler(handler, effect, k_user);
        }

        Err(VmError::unhandled_effect(format!(
            "{effect} (no outer handler)"
        )))
    }

    /// Installs `handler` around `program` and starts the program.
    fn with_handler(&mut self, handler: Handler, program: Program) -> VmResult<StepEvent> {
        let outside_id = self.current_segment_id()?;
        let outside_scope = self.current_scope_chain();

        let marker = Marker::fresh();
        let prompt = Segment::prompt(marker, Some(outside_id), outside_scope.clone());
        let prompt_seg_id = self.alloc_segment(prompt)?;
        self.handlers.insert(
            marker,
            HandlerEntry {
                handler,
                prompt_seg_id,
            },
        );

        let mut scope = outside_scope;
        scope.insert(0, marker);
        let body = Segment::new(marker, Some(prompt_seg_id), scope);
        let body_seg_id = self.alloc_segment(body)?;
        self.current_segment = Some(body_seg_id);

        self.pending_host = Some(PendingHostCall::StartProgramFrame);
        Ok(StepEvent::NeedsHostCall(HostCall::StartProgram { program }))
    }

    /// Answers the callsite continuation of the current dispatch without
    /// consuming it.
    fn get_continuation(&mut self) -> VmResult<StepEvent> {
        self.lazy_pop_completed();
        let top = self.dispatch_stack.last().ok_or_else(|| {
            VmError::invalid_continuation("GetContinuation outside of a dispatch")
        })?;
        self.mode = Mode::Deliver(Value::Continuation(top.k_user.clone()));
        Ok(StepEvent::Continue)
    }

    /// Answers the handler objects of the current dispatch chain, innermost
    /// first.
    fn get_handlers(&mut self) -> VmResult<StepEvent> {
        self.lazy_pop_completed();
        let chain = self
            .dispatch_stack
            .last()
            .ok_or_else(|| VmError::invalid_continuation("GetHandlers outside of a dispatch"))?
            .handler_chain
            .clone();
        let mut handlers = Vec::with_capacity(chain.len());
        for marker in chain {
            let entry = self.handlers.get(&marker).ok_or_else(|| {
                VmError::internal(format!("handler registry lost marker {marker}"))
            })?;
            handlers.push(entry.handler.clone());
        }
        self.mode = Mode::Deliver(Value::Handlers(handlers));
        Ok(StepEvent::Continue)
    }

    /// Routes a handler's return value.
    ///
    /// The value simply delivers up the caller chain; when the returning
    /// handler is the root of the current dispatch, the dispatch completes
    /// and its callsite is abandoned.
    pub(crate) fn handle_handler_return(&mut self, value: Value) -> VmResult<StepEvent> {
        self.lazy_pop_completed();
        if self.dispatch_stack.is_empty() {
            self.mode = Mode::Deliver(value);
            return Ok(StepEvent::Continue);
        }

        self.record_handler_outcome(HandlerOutcome::Returned);

        let caller = self.current_seg()?.caller;
        if let Some(caller_id) = caller {
            let completed_dispatch = {
                let top = self
                    .dispatch_stack
                    .last()
                    .ok_or_else(|| VmError::internal("dispatch stack emptied mid-return"))?;
                let terminal = caller_id == top.prompt_seg_id
                    || (top.pass_through && top.k_user.parent.is_none());
                terminal.then_some(top.dispatch_id)
            };
            if let Some(dispatch_id) = completed_dispatch {
                self.mark_dispatch_completed(dispatch_id);
            }
        }

        self.mode = Mode::Deliver(value);
        Ok(StepEvent::Continue)
    }

    fn record_handler_outcome(&mut self, outcome: HandlerOutcome) {
        if let Some(top) = self.dispatch_stack.last() {
            let dispatch_id = top.dispatch_id;
            self.trace.record(TraceEvent::HandlerCompleted {
                dispatch_id,
                outcome,
            });
        }
    }
}
