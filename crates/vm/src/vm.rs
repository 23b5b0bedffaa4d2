//! The machine state.
//!
//! [`Vm`] owns every internal store: the segment arena, the callback slot
//! map, the dispatch stack, the one-shot ledger, the handler registry, and
//! the native store. None of it is visible to user code; programs interact
//! with the machine only through yields and the run API.

use std::collections::{HashMap, HashSet};

use crate::arena::{CallbackSlots, NativeCallback, SegmentArena};
use crate::continuation::Continuation;
use crate::coroutine::Program;
use crate::dispatch::DispatchContext;
use crate::error::{VmError, VmResult};
use crate::frame::Frame;
use crate::handler::{Handler, HandlerEntry};
use crate::host::HostCall;
use crate::ids::{CallbackId, ContId, DispatchId, Marker, SegmentId};
use crate::limits::VmLimits;
use crate::segment::Segment;
use crate::step::{Mode, PendingHostCall, StepEvent};
use crate::store::Store;
use crate::trace::DispatchTrace;
use crate::value::Value;

/// The core interpreter state.
pub struct Vm {
    pub(crate) segments: SegmentArena,
    pub(crate) callbacks: CallbackSlots,
    pub(crate) dispatch_stack: Vec<DispatchContext>,
    pub(crate) consumed_cont_ids: HashSet<ContId>,
    pub(crate) handlers: HashMap<Marker, HandlerEntry>,
    pub(crate) current_segment: Option<SegmentId>,
    pub(crate) mode: Mode,
    pub(crate) pending_host: Option<PendingHostCall>,
    pub(crate) store: Store,
    pub(crate) limits: VmLimits,
    pub(crate) steps_taken: u64,
    pub(crate) trace: DispatchTrace,
}

impl Vm {
    /// Creates a machine with the given store, limits, and trace switch.
    pub fn new(store: Store, limits: VmLimits, trace: bool) -> Self {
        Self {
            segments: SegmentArena::new(),
            callbacks: CallbackSlots::new(),
            dispatch_stack: Vec::new(),
            consumed_cont_ids: HashSet::new(),
            handlers: HashMap::new(),
            current_segment: None,
            mode: Mode::Deliver(Value::Unit),
            pending_host: None,
            store,
            limits,
            steps_taken: 0,
            trace: DispatchTrace::new(trace),
        }
    }

    /// The native store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The native store, mutably.
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// The dispatch trace recorder.
    pub fn trace(&self) -> &DispatchTrace {
        &self.trace
    }

    /// Number of live segments, for diagnostics and tests.
    pub fn live_segments(&self) -> usize {
        self.segments.live_count()
    }

    /// Current dispatch stack depth.
    pub fn dispatch_depth(&self) -> usize {
        self.dispatch_stack.len()
    }

    /// Allocates a segment, honoring the arena limit.
    pub(crate) fn alloc_segment(&mut self, segment: Segment) -> VmResult<SegmentId> {
        if self.segments.live_count() >= self.limits.max_segments {
            return Err(VmError::SegmentLimitExceeded {
                limit: self.limits.max_segments,
            });
        }
        Ok(self.segments.alloc(segment))
    }

    /// Releases a segment back to the arena. Prompt segments stay alive
    /// because the handler registry holds their ids.
    pub(crate) fn release_segment(&mut self, id: SegmentId) {
        let is_prompt = self
            .segments
            .get(id)
            .map(Segment::is_prompt_boundary)
            .unwrap_or(false);
        if !is_prompt {
            self.segments.free(id);
        }
    }

    /// The current segment id, or an internal error when idle.
    pub(crate) fn current_segment_id(&self) -> VmResult<SegmentId> {
        self.current_segment
            .ok_or_else(|| VmError::internal("no current segment"))
    }

    /// The current segment, by reference.
    pub(crate) fn current_seg(&self) -> VmResult<&Segment> {
        let id = self.current_segment_id()?;
        self.segments
            .get(id)
            .ok_or_else(|| VmError::internal(format!("current segment {id} not in arena")))
    }

    /// The current segment, mutably.
    pub(crate) fn current_seg_mut(&mut self) -> VmResult<&mut Segment> {
        let id = self.current_segment_id()?;
        self.segments
            .get_mut(id)
            .ok_or_else(|| VmError::internal(format!("current segment {id} not in arena")))
    }

    /// Scope chain of the current segment, innermost first.
    pub(crate) fn current_scope_chain(&self) -> Vec<Marker> {
        self.current_segment
            .and_then(|id| self.segments.get(id))
            .map(|seg| seg.scope_chain.clone())
            .unwrap_or_default()
    }

    /// Captures the current segment as a continuation.
    pub(crate) fn capture_current(
        &self,
        dispatch_id: Option<DispatchId>,
    ) -> VmResult<Continuation> {
        Ok(Continuation::capture(self.current_seg()?, dispatch_id))
    }

    /// Stores a one-shot native callback.
    pub(crate) fn register_callback(&mut self, callback: NativeCallback) -> CallbackId {
        self.callbacks.insert(callback)
    }

    /// Pushes a frame onto the current segment.
    pub(crate) fn push_frame(&mut self, frame: Frame) -> VmResult<()> {
        self.current_seg_mut()?.push_frame(frame);
        Ok(())
    }

    /// Pops completed dispatches off the top of the stack.
    pub(crate) fn lazy_pop_completed(&mut self) {
        while let Some(top) = self.dispatch_stack.last() {
            if top.completed {
                self.dispatch_stack.pop();
            } else {
                break;
            }
        }
    }

    /// Top-only busy boundary: the markers busy in the topmost non-completed
    /// dispatch are hidden; everything else in scope is visible.
    pub(crate) fn visible_handlers(&self, scope_chain: &[Marker]) -> Vec<Marker> {
        let Some(top) = self.dispatch_stack.last() else {
            return scope_chain.to_vec();
        };
        if top.completed || self.consumed_cont_ids.contains(&top.k_user.cont_id) {
            return scope_chain.to_vec();
        }

        let busy: HashSet<Marker> = top.busy_markers().iter().copied().collect();
        scope_chain
            .iter()
            .copied()
            .filter(|marker| !busy.contains(marker))
            .collect()
    }

    /// Marks every link of `k`'s parent chain as consumed.
    pub(crate) fn consume_chain(&mut self, k: &Continuation) {
        for link in k.chain() {
            self.consumed_cont_ids.insert(link.cont_id);
        }
    }

    /// Returns `true` when any link of `k`'s chain was already consumed.
    pub(crate) fn chain_consumed(&self, k: &Continuation) -> bool {
        k.chain()
            .iter()
            .any(|link| self.consumed_cont_ids.contains(&link.cont_id))
    }

    /// Marks the dispatch `k` is the callsite of as completed, when `k` is
    /// exactly the top dispatch's pristine callsite continuation.
    pub(crate) fn check_dispatch_completion(&mut self, k: &Continuation) {
        let Some(dispatch_id) = k.dispatch_id else {
            return;
        };
        if let Some(top) = self.dispatch_stack.last_mut() {
            if top.dispatch_id == dispatch_id
                && top.k_user.cont_id == k.cont_id
                && top.k_user.parent.is_none()
            {
                top.completed = true;
            }
        }
    }

    /// Marks a dispatch completed by id, consuming its callsite.
    pub(crate) fn mark_dispatch_completed(&mut self, dispatch_id: DispatchId) {
        let chain_ids: Vec<ContId> = match self
            .dispatch_stack
            .iter()
            .rev()
            .find(|ctx| ctx.dispatch_id == dispatch_id)
        {
            Some(ctx) => ctx.k_user.chain().iter().map(|link| link.cont_id).collect(),
            None => return,
        };
        for id in chain_ids {
            self.consumed_cont_ids.insert(id);
        }
        if let Some(ctx) = self
            .dispatch_stack
            .iter_mut()
            .rev()
            .find(|ctx| ctx.dispatch_id == dispatch_id)
        {
            ctx.completed = true;
        }
    }

    /// Completes every dispatch rooted at `prompt_seg_id`. Called when a
    /// throw unwinds past that prompt.
    pub(crate) fn complete_dispatches_at_prompt(&mut self, prompt_seg_id: SegmentId) {
        let ids: Vec<DispatchId> = self
            .dispatch_stack
            .iter()
            .filter(|ctx| !ctx.completed && ctx.prompt_seg_id == prompt_seg_id)
            .map(|ctx| ctx.dispatch_id)
            .collect();
        for id in ids {
            self.mark_dispatch_completed(id);
        }
    }

    /// Completes every open dispatch. Called on terminal events.
    pub(crate) fn finalize_dispatches(&mut self) {
        let ids: Vec<DispatchId> = self
            .dispatch_stack
            .iter()
            .filter(|ctx| !ctx.completed)
            .map(|ctx| ctx.dispatch_id)
            .collect();
        for id in ids {
            self.mark_dispatch_completed(id);
        }
    }

    /// Installs `handlers` around `program` and starts it.
    ///
    /// This is the entry point the runner uses: it behaves like activating a
    /// created continuation in tail position.
    pub fn bootstrap(&mut self, program: Program, handlers: Vec<Handler>) -> VmResult<StepEvent> {
        let k = Continuation::create(program, handlers);
        self.activate_created(&k, None)
    }

    /// Installs the handler chain of a created continuation and requests the
    /// start of its program. `base_caller` decides whether the new tree
    /// returns anywhere (`ResumeContinuation`) or is a tail transfer.
    pub(crate) fn activate_created(
        &mut self,
        k: &Continuation,
        base_caller: Option<SegmentId>,
    ) -> VmResult<StepEvent> {
        if self.consumed_cont_ids.contains(&k.cont_id) {
            return Err(VmError::ContinuationAlreadyResumed);
        }
        self.consumed_cont_ids.insert(k.cont_id);

        let program = k
            .program
            .clone()
            .ok_or_else(|| VmError::internal("created continuation without a program"))?;

        let mut caller = base_caller;
        let mut scope: Vec<Marker> = Vec::new();
        for handler in &k.handlers {
            let marker = Marker::fresh();
            let prompt = Segment::prompt(marker, caller, scope.clone());
            let prompt_seg_id = self.alloc_segment(prompt)?;
            self.handlers.insert(
                marker,
                HandlerEntry {
                    handler: handler.clone(),
                    prompt_seg_id,
                },
            );
            scope.insert(0, marker);
            caller = Some(prompt_seg_id);
        }

        let body_marker = scope.first().copied().unwrap_or_else(Marker::placeholder);
        let body = Segment::new(body_marker, caller, scope);
        let body_seg_id = self.alloc_segment(body)?;
        self.current_segment = Some(body_seg_id);

        log::debug!(
            "starting program `{}` under {} handler(s)",
            program.name(),
            k.handlers.len()
        );
        self.pending_host = Some(PendingHostCall::StartProgramFrame);
        Ok(StepEvent::NeedsHostCall(HostCall::StartProgram { program }))
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("current_segment", &self.current_segment)
            .field("dispatch_depth", &self.dispatch_stack.len())
            .field("live_segments", &self.segments.live_count())
            .field("steps_taken", &self.steps_taken)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::{CoStep, FnCoroutine};
    use crate::stdlib::state_handler;

    fn noop_program() -> Program {
        Program::from_fn("noop", || {
            Box::new(FnCoroutine::new(|_| CoStep::Return(Value::Unit)))
        })
    }

    #[test]
    fn bootstrap_installs_prompts_outermost_first() {
        let mut vm = Vm::new(Store::new(), VmLimits::default(), false);
        let event = vm
            .bootstrap(noop_program(), vec![state_handler(), state_handler()])
            .unwrap();
        assert!(matches!(event, StepEvent::NeedsHostCall(HostCall::StartProgram { .. })));

        // Two prompts plus the body segment.
        assert_eq!(vm.live_segments(), 3);
        assert_eq!(vm.handlers.len(), 2);

        let body = vm.current_seg().unwrap();
        assert_eq!(body.scope_chain.len(), 2);
        // The innermost marker delimits the prompt the body returns into.
        let inner_prompt = vm.segments.get(body.caller.unwrap()).unwrap();
        assert_eq!(inner_prompt.handled_marker(), Some(body.scope_chain[0]));
        // The outermost prompt has no caller: the tree is in tail position.
        let outer_prompt = vm.segments.get(inner_prompt.caller.unwrap()).unwrap();
        assert!(outer_prompt.caller.is_none());
    }

    #[test]
    fn visible_handlers_without_dispatches_is_the_scope() {
        let vm = Vm::new(Store::new(), VmLimits::default(), false);
        let scope = vec![Marker::fresh(), Marker::fresh()];
        assert_eq!(vm.visible_handlers(&scope), scope);
    }

    #[test]
    fn segment_limit_is_enforced() {
        let limits = VmLimits {
            max_segments: 1,
            ..VmLimits::default()
        };
        let mut vm = Vm::new(Store::new(), limits, false);
        vm.alloc_segment(Segment::new(Marker::fresh(), None, Vec::new()))
            .unwrap();
        let err = vm
            .alloc_segment(Segment::new(Marker::fresh(), None, Vec::new()))
            .unwrap_err();
        assert!(matches!(err, VmError::SegmentLimitExceeded { .. }));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// Installs a fabricated dispatch so the busy boundary has a top to
        /// consult.
        fn push_dispatch(vm: &mut Vm, chain: Vec<Marker>, handler_idx: usize, completed: bool) {
            let seg = Segment::new(Marker::fresh(), None, chain.clone());
            let k_user = Continuation::capture(&seg, Some(DispatchId::fresh()));
            let prompt_seg_id = vm
                .alloc_segment(Segment::prompt(Marker::fresh(), None, Vec::new()))
                .unwrap();
            vm.dispatch_stack.push(DispatchContext {
                dispatch_id: DispatchId::fresh(),
                effect: crate::effect::Effect::get("x"),
                handler_chain: chain,
                handler_idx,
                k_user,
                prompt_seg_id,
                completed,
                pass_through: false,
            });
        }

        proptest! {
            /// Visible handlers are the scope minus the top dispatch's busy
            /// prefix, and exactly the scope when the top is completed.
            #[test]
            fn busy_boundary_hides_exactly_the_busy_prefix(
                chain_len in 1usize..6,
                handler_idx in 0usize..6,
                extra in 0usize..4,
                completed in proptest::bool::ANY,
            ) {
                let handler_idx = handler_idx.min(chain_len - 1);
                let chain: Vec<Marker> = (0..chain_len).map(|_| Marker::fresh()).collect();
                let outer: Vec<Marker> = (0..extra).map(|_| Marker::fresh()).collect();
                let scope: Vec<Marker> =
                    chain.iter().copied().chain(outer.iter().copied()).collect();

                let mut vm = Vm::new(Store::new(), VmLimits::default(), false);
                push_dispatch(&mut vm, chain.clone(), handler_idx, completed);

                let visible = vm.visible_handlers(&scope);
                if completed {
                    prop_assert_eq!(visible, scope);
                } else {
                    let expected: Vec<Marker> = scope
                        .iter()
                        .copied()
                        .filter(|m| !chain[..=handler_idx].contains(m))
                        .collect();
                    prop_assert_eq!(visible, expected);
                }
            }

            /// Consuming the top callsite lifts the boundary entirely.
            #[test]
            fn consumed_callsites_do_not_hide_handlers(chain_len in 1usize..6) {
                let chain: Vec<Marker> = (0..chain_len).map(|_| Marker::fresh()).collect();
                let mut vm = Vm::new(Store::new(), VmLimits::default(), false);
                push_dispatch(&mut vm, chain.clone(), chain_len - 1, false);

                let k = vm.dispatch_stack.last().unwrap().k_user.clone();
                vm.consume_chain(&k);
                prop_assert_eq!(vm.visible_handlers(&chain), chain);
            }
        }
    }
}
