//! The reference scheduler handler.
//!
//! Cooperative multitasking built on the machine's own primitives: spawning
//! mints an unstarted continuation for the task body, and every scheduling
//! decision is a `Transfer`, never a `Resume`, so context switches do not
//! grow the segment caller chains.
//!
//! Scheduler state is shared between the per-dispatch program instances
//! through an `Arc`; tasks spawned anywhere under the same handler see the
//! same queues.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::continuation::Continuation;
use crate::control::{ControlPrimitive, Yielded};
use crate::coroutine::{CoStep, CoroutineInput, FnCoroutine, HostYield, Program};
use crate::effect::{Effect, MergePolicy, StoreMode, TaskOutcome};
use crate::error::Exception;
use crate::handler::{
    Handler, HandlerProgram, HandlerStep, NativeHandlerFactory,
};
use crate::ids::{PromiseId, TaskId};
use crate::store::Store;
use crate::value::{
    ExternalInbox, ExternalPromiseHandle, PromiseHandle, TaskHandle, Value,
};

/// The scheduler handler factory.
///
/// Install it with [`scheduler_handler`]; clones share queues and
/// registries.
#[derive(Clone, Default)]
pub struct SchedulerHandler {
    state: Arc<Mutex<SchedulerState>>,
}

impl SchedulerHandler {
    /// Creates a scheduler with empty queues.
    pub fn new() -> Self {
        Self::default()
    }
}

/// A scheduler, ready to install.
pub fn scheduler_handler() -> Handler {
    Handler::native(SchedulerHandler::new())
}

impl NativeHandlerFactory for SchedulerHandler {
    fn name(&self) -> &str {
        "scheduler"
    }

    fn can_handle(&self, effect: &Effect) -> bool {
        effect.is_scheduler_effect()
    }

    fn instantiate(&self) -> Box<dyn HandlerProgram> {
        Box::new(SchedulerProgram {
            state: Arc::clone(&self.state),
            phase: Phase::Idle,
        })
    }
}

/// What a waiter is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum WaitTarget {
    Task(TaskId),
    Promise(PromiseId),
}

#[derive(Debug)]
enum TaskStatus {
    Pending,
    Done(TaskOutcome),
}

#[derive(Debug)]
struct TaskRecord {
    status: TaskStatus,
    mode: StoreMode,
    /// Which store the task runs against: its own id when isolated, the
    /// spawner's owner when shared.
    run_owner: Option<TaskId>,
    /// The isolated store, parked here while the task is not running.
    store: Option<Store>,
    /// Whether the isolated log was already folded into a collector.
    merged: bool,
    waiters: Vec<WaiterRef>,
}

#[derive(Debug)]
enum PromiseStatus {
    Pending,
    Done(TaskOutcome),
}

#[derive(Debug)]
struct PromiseRecord {
    status: PromiseStatus,
    waiters: Vec<WaiterRef>,
}

#[derive(Debug, Clone, Copy)]
struct WaiterRef {
    waiter: u64,
    slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaiterKind {
    /// Gather: wake once every slot is filled.
    All,
    /// Race: wake on the first fill.
    First,
    /// Wait/Await: single target.
    One,
}

struct Waiter {
    kind: WaiterKind,
    k: Continuation,
    owner: Option<TaskId>,
    targets: Vec<WaitTarget>,
    slots: Vec<Option<TaskOutcome>>,
    pending: usize,
    woken: bool,
}

/// A continuation ready to run, with the store context to install first.
struct Runnable {
    k: Continuation,
    outcome: TaskOutcome,
    owner: Option<TaskId>,
    /// Isolated tasks whose logs fold into the installed store on entry,
    /// in submission order.
    merges: Vec<TaskId>,
}

#[derive(Default)]
struct SchedulerState {
    next_task: u64,
    next_promise: u64,
    next_waiter: u64,
    tasks: HashMap<TaskId, TaskRecord>,
    promises: HashMap<PromiseId, PromiseRecord>,
    waiters: HashMap<u64, Waiter>,
    ready: VecDeque<Runnable>,
    external_inbox: ExternalInbox,
    /// Whose store is currently installed in the machine. `None` is the
    /// spawning (parent) context.
    store_owner: Option<TaskId>,
    parent_store: Option<Store>,
}

/// Per-dispatch scheduler program instance.
struct SchedulerProgram {
    state: Arc<Mutex<SchedulerState>>,
    phase: Phase,
}

enum Phase {
    Idle,
    /// Spawn asked for the visible handlers to rebind into the child.
    SpawnAwaitHandlers {
        program: Program,
        handlers: Vec<Handler>,
        store_mode: StoreMode,
        k_user: Continuation,
    },
    /// Spawn asked for the child continuation.
    SpawnAwaitContinuation {
        task: TaskId,
        k_user: Continuation,
    },
    Finished,
}

impl HandlerProgram for SchedulerProgram {
    fn start(&mut self, effect: Effect, k_user: Continuation, store: &mut Store) -> HandlerStep {
        let shared = Arc::clone(&self.state);
        let mut state = shared.lock();
        state.drain_external();

        match effect {
            Effect::Spawn {
                program,
                handlers,
                store_mode,
            } => {
                self.phase = Phase::SpawnAwaitHandlers {
                    program,
                    handlers,
                    store_mode,
                    k_user,
                };
                yield_primitive(ControlPrimitive::GetHandlers)
            }
            Effect::Gather { items } => state.gather(items, k_user, store),
            Effect::Race { items } => state.race(items, k_user, store),
            Effect::Wait { task } => state.wait_single(task, k_user, store),
            Effect::Await { promise } => state.wait_single(promise, k_user, store),
            Effect::CreatePromise => {
                let handle = state.create_promise();
                transfer(k_user, Value::Promise(handle))
            }
            Effect::CreateExternalPromise => {
                let handle = state.create_external_promise();
                transfer(k_user, Value::ExternalPromise(handle))
            }
            Effect::CompletePromise { promise, value } => {
                state.settle_promise(promise, Ok(value), k_user)
            }
            Effect::FailPromise { promise, error } => {
                state.settle_promise(promise, Err(error), k_user)
            }
            Effect::TaskCompleted { task, result } => {
                state.on_task_completed(task.id(), result, store)
            }
            other => HandlerStep::Throw(Exception::runtime(format!(
                "scheduler cannot handle {other}"
            ))),
        }
    }

    fn resume(&mut self, value: Value, store: &mut Store) -> HandlerStep {
        match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::SpawnAwaitHandlers {
                program,
                handlers,
                store_mode,
                k_user,
            } => {
                let chain = match value.as_handlers() {
                    Ok(chain) => chain.to_vec(),
                    Err(err) => {
                        return HandlerStep::Throw(Exception::runtime(format!(
                            "GetHandlers answered oddly: {err}"
                        )))
                    }
                };

                let task = {
                    let mut state = self.state.lock();
                    state.register_task(store_mode, store)
                };

                // Rebind the visible chain (innermost-first, so reversed)
                // around the task's own handlers.
                let mut child_handlers: Vec<Handler> = chain.into_iter().rev().collect();
                child_handlers.extend(handlers);

                let wrapped = task_body(TaskHandle::new(task), program);
                self.phase = Phase::SpawnAwaitContinuation { task, k_user };
                yield_primitive(ControlPrimitive::CreateContinuation {
                    program: wrapped,
                    handlers: child_handlers,
                })
            }
            Phase::SpawnAwaitContinuation { task, k_user } => {
                let k_child = match value.as_continuation() {
                    Ok(k) => k.clone(),
                    Err(err) => {
                        return HandlerStep::Throw(Exception::runtime(format!(
                            "CreateContinuation answered oddly: {err}"
                        )))
                    }
                };

                let mut state = self.state.lock();
                let owner = state
                    .tasks
                    .get(&task)
                    .and_then(|record| record.run_owner);
                state.ready.push_back(Runnable {
                    k: k_child,
                    outcome: Ok(Value::Unit),
                    owner,
                    merges: Vec::new(),
                });
                log::debug!("spawned {task}");
                transfer(k_user, Value::Task(TaskHandle::new(task)))
            }
            Phase::Idle | Phase::Finished => HandlerStep::Return(value),
        }
    }

    fn throw(&mut self, error: Exception, _store: &mut Store) -> HandlerStep {
        self.phase = Phase::Finished;
        HandlerStep::Throw(error)
    }
}

fn yield_primitive(primitive: ControlPrimitive) -> HandlerStep {
    HandlerStep::Yield(Yielded::Primitive(primitive))
}

fn transfer(k: Continuation, value: Value) -> HandlerStep {
    yield_primitive(ControlPrimitive::Transfer { k, value })
}

fn throw_into(k: Continuation, error: Exception) -> HandlerStep {
    yield_primitive(ControlPrimitive::ThrowInto { k, error })
}

fn deliver(k: Continuation, outcome: TaskOutcome) -> HandlerStep {
    match outcome {
        Ok(value) => transfer(k, value),
        Err(error) => throw_into(k, error),
    }
}

/// Wraps a task program so its termination reports back to the scheduler.
fn task_body(task: TaskHandle, inner: Program) -> Program {
    let name = format!("task-{}", task.id().raw());
    Program::from_fn(name, move || {
        let inner = inner.clone();
        let mut phase = 0u8;
        Box::new(FnCoroutine::new(move |input| match phase {
            0 => {
                phase = 1;
                CoStep::Yield(HostYield::Program(inner.clone()))
            }
            1 => {
                phase = 2;
                let result = match input {
                    CoroutineInput::Value(value) => Ok(value),
                    CoroutineInput::Throw(error) => Err(error),
                    CoroutineInput::Start => Err(Exception::runtime(
                        "task body restarted after its program ran",
                    )),
                };
                CoStep::Yield(HostYield::Effect(Effect::TaskCompleted { task, result }))
            }
            _ => CoStep::Return(Value::Unit),
        }))
    })
}

impl SchedulerState {
    fn register_task(&mut self, mode: StoreMode, store: &Store) -> TaskId {
        self.next_task += 1;
        let task = TaskId::from_raw(self.next_task);
        let (run_owner, snapshot) = match mode {
            StoreMode::Shared => (self.store_owner, None),
            StoreMode::Isolated(_) => (Some(task), Some(store.clone())),
        };
        self.tasks.insert(
            task,
            TaskRecord {
                status: TaskStatus::Pending,
                mode,
                run_owner,
                store: snapshot,
                merged: false,
                waiters: Vec::new(),
            },
        );
        task
    }

    fn create_promise(&mut self) -> PromiseHandle {
        self.next_promise += 1;
        let id = PromiseId::from_raw(self.next_promise);
        self.promises.insert(
            id,
            PromiseRecord {
                status: PromiseStatus::Pending,
                waiters: Vec::new(),
            },
        );
        PromiseHandle::new(id)
    }

    fn create_external_promise(&mut self) -> ExternalPromiseHandle {
        let handle = self.create_promise();
        ExternalPromiseHandle::new(handle.id(), Arc::clone(&self.external_inbox))
    }

    /// Applies completions queued from outside the VM.
    fn drain_external(&mut self) {
        let drained: Vec<_> = {
            let mut inbox = self.external_inbox.lock();
            inbox.drain(..).collect()
        };
        for (id, result) in drained {
            self.resolve_promise(id, result);
        }
    }

    fn resolve_promise(&mut self, id: PromiseId, result: TaskOutcome) -> bool {
        let Some(record) = self.promises.get_mut(&id) else {
            return false;
        };
        if !matches!(record.status, PromiseStatus::Pending) {
            return false;
        }
        record.status = PromiseStatus::Done(result.clone());
        let refs = std::mem::take(&mut record.waiters);
        for waiter_ref in refs {
            self.fill_waiter_slot(waiter_ref, result.clone());
        }
        true
    }

    fn settle_promise(
        &mut self,
        promise: Value,
        result: TaskOutcome,
        k_user: Continuation,
    ) -> HandlerStep {
        let id = match promise_id_of(&promise) {
            Ok(id) => id,
            Err(error) => return HandlerStep::Throw(error),
        };
        if !self.resolve_promise(id, result) {
            return HandlerStep::Throw(Exception::runtime(format!(
                "{id} is already settled"
            )));
        }
        // The completer keeps running; woken waiters sit in the ready queue
        // until the next suspension.
        transfer(k_user, Value::Unit)
    }

    fn gather(
        &mut self,
        items: Vec<Value>,
        k_user: Continuation,
        store: &mut Store,
    ) -> HandlerStep {
        let targets = match self.parse_targets(&items) {
            Ok(targets) => targets,
            Err(error) => return HandlerStep::Throw(error),
        };

        let mut slots: Vec<Option<TaskOutcome>> = Vec::with_capacity(targets.len());
        let mut pending = 0usize;
        for target in &targets {
            let status = self.status_of(*target);
            if status.is_none() {
                pending += 1;
            }
            slots.push(status);
        }

        if pending == 0 {
            let outcome = collect_outcome(&slots);
            self.merge_finished_tasks(&targets, store);
            return deliver(k_user, outcome);
        }

        self.register_waiter(WaiterKind::All, k_user, targets, slots, pending);
        self.schedule_next(store)
    }

    fn race(&mut self, items: Vec<Value>, k_user: Continuation, store: &mut Store) -> HandlerStep {
        let targets = match self.parse_targets(&items) {
            Ok(targets) => targets,
            Err(error) => return HandlerStep::Throw(error),
        };
        if targets.is_empty() {
            return HandlerStep::Throw(Exception::runtime("Race of an empty item list"));
        }

        // Ties break by submission order: the first already-resolved item
        // wins outright.
        for target in &targets {
            if let Some(outcome) = self.status_of(*target) {
                self.merge_finished_tasks(&[*target], store);
                return deliver(k_user, outcome);
            }
        }

        let slots = vec![None; targets.len()];
        self.register_waiter(WaiterKind::First, k_user, targets, slots, 1);
        self.schedule_next(store)
    }

    fn wait_single(&mut self, item: Value, k_user: Continuation, store: &mut Store) -> HandlerStep {
        let target = match self.parse_target(&item) {
            Ok(target) => target,
            Err(error) => return HandlerStep::Throw(error),
        };

        if let Some(outcome) = self.status_of(target) {
            self.merge_finished_tasks(&[target], store);
            return deliver(k_user, outcome);
        }

        self.register_waiter(WaiterKind::One, k_user, vec![target], vec![None], 1);
        self.schedule_next(store)
    }

    fn on_task_completed(
        &mut self,
        task: TaskId,
        result: TaskOutcome,
        store: &mut Store,
    ) -> HandlerStep {
        log::debug!("{task} completed (ok: {})", result.is_ok());
        let refs = match self.tasks.get_mut(&task) {
            Some(record) => {
                record.status = TaskStatus::Done(result.clone());
                std::mem::take(&mut record.waiters)
            }
            None => {
                return HandlerStep::Throw(Exception::runtime(format!(
                    "completion for unknown {task}"
                )))
            }
        };
        for waiter_ref in refs {
            self.fill_waiter_slot(waiter_ref, result.clone());
        }
        // The completing task's continuation is abandoned: it is never
        // enqueued again, which is what makes one-shot cleanup safe.
        self.schedule_next(store)
    }

    fn register_waiter(
        &mut self,
        kind: WaiterKind,
        k: Continuation,
        targets: Vec<WaitTarget>,
        slots: Vec<Option<TaskOutcome>>,
        pending: usize,
    ) {
        self.next_waiter += 1;
        let waiter_id = self.next_waiter;
        for (slot, target) in targets.iter().enumerate() {
            if slots[slot].is_some() {
                continue;
            }
            let waiter_ref = WaiterRef {
                waiter: waiter_id,
                slot,
            };
            match target {
                WaitTarget::Task(id) => {
                    if let Some(record) = self.tasks.get_mut(id) {
                        record.waiters.push(waiter_ref);
                    }
                }
                WaitTarget::Promise(id) => {
                    if let Some(record) = self.promises.get_mut(id) {
                        record.waiters.push(waiter_ref);
                    }
                }
            }
        }
        self.waiters.insert(
            waiter_id,
            Waiter {
                kind,
                k,
                owner: self.store_owner,
                targets,
                slots,
                pending,
                woken: false,
            },
        );
    }

    /// Records one completion into a waiter; enqueues the waiter when it
    /// becomes ready.
    fn fill_waiter_slot(&mut self, waiter_ref: WaiterRef, result: TaskOutcome) {
        let ready = {
            let Some(waiter) = self.waiters.get_mut(&waiter_ref.waiter) else {
                return;
            };
            if waiter.woken {
                return;
            }
            waiter.slots[waiter_ref.slot] = Some(result.clone());
            match waiter.kind {
                WaiterKind::All => {
                    waiter.pending -= 1;
                    waiter.pending == 0
                }
                WaiterKind::First | WaiterKind::One => true,
            }
        };
        if !ready {
            return;
        }

        let Some(waiter) = self.waiters.get_mut(&waiter_ref.waiter) else {
            return;
        };
        waiter.woken = true;
        let outcome = match waiter.kind {
            WaiterKind::All => collect_outcome(&waiter.slots),
            WaiterKind::First | WaiterKind::One => result,
        };
        let merges = merge_candidates(&waiter.targets, &waiter.slots, waiter.kind);
        let runnable = Runnable {
            k: waiter.k.clone(),
            outcome,
            owner: waiter.owner,
            merges,
        };
        self.waiters.remove(&waiter_ref.waiter);
        self.ready.push_back(runnable);
    }

    /// Transfers into the next ready continuation, swapping stores first.
    fn schedule_next(&mut self, store: &mut Store) -> HandlerStep {
        let Some(run) = self.ready.pop_front() else {
            return HandlerStep::Throw(Exception::runtime(format!(
                "scheduler is idle with {} waiter(s) still blocked",
                self.waiters.len()
            )));
        };
        self.install_store(run.owner, store);
        self.apply_merges(&run.merges, store);
        deliver(run.k, run.outcome)
    }

    /// Parks the current store with its owner and installs `new_owner`'s.
    fn install_store(&mut self, new_owner: Option<TaskId>, store: &mut Store) {
        if self.store_owner == new_owner {
            return;
        }
        let outgoing = std::mem::take(store);
        match self.store_owner {
            None => self.parent_store = Some(outgoing),
            Some(task) => {
                if let Some(record) = self.tasks.get_mut(&task) {
                    record.store = Some(outgoing);
                }
            }
        }
        *store = match new_owner {
            None => self.parent_store.take().unwrap_or_default(),
            Some(task) => self
                .tasks
                .get_mut(&task)
                .and_then(|record| record.store.take())
                .unwrap_or_default(),
        };
        self.store_owner = new_owner;
    }

    /// Folds finished isolated task stores into the current store, once per
    /// task, honoring each task's merge policy.
    fn apply_merges(&mut self, tasks: &[TaskId], store: &mut Store) {
        for task in tasks {
            let Some(record) = self.tasks.get_mut(task) else {
                continue;
            };
            if record.merged || !matches!(record.status, TaskStatus::Done(_)) {
                continue;
            }
            record.merged = true;
            if let StoreMode::Isolated(MergePolicy::LogsOnly) = record.mode {
                if let Some(task_store) = record.store.as_ref() {
                    store.merge_logs_from(task_store);
                }
            }
        }
    }

    fn merge_finished_tasks(&mut self, targets: &[WaitTarget], store: &mut Store) {
        let tasks: Vec<TaskId> = targets
            .iter()
            .filter_map(|target| match target {
                WaitTarget::Task(id) => Some(*id),
                WaitTarget::Promise(_) => None,
            })
            .collect();
        self.apply_merges(&tasks, store);
    }

    fn parse_targets(&self, items: &[Value]) -> Result<Vec<WaitTarget>, Exception> {
        items.iter().map(|item| self.parse_target(item)).collect()
    }

    fn parse_target(&self, item: &Value) -> Result<WaitTarget, Exception> {
        match item {
            Value::Task(handle) => Ok(WaitTarget::Task(handle.id())),
            Value::Promise(handle) => Ok(WaitTarget::Promise(handle.id())),
            Value::ExternalPromise(handle) => Ok(WaitTarget::Promise(handle.id())),
            other => Err(Exception::type_error(format!(
                "cannot wait on a {} value",
                other.type_name()
            ))),
        }
    }

    fn status_of(&self, target: WaitTarget) -> Option<TaskOutcome> {
        match target {
            WaitTarget::Task(id) => match self.tasks.get(&id) {
                Some(TaskRecord {
                    status: TaskStatus::Done(outcome),
                    ..
                }) => Some(outcome.clone()),
                _ => None,
            },
            WaitTarget::Promise(id) => match self.promises.get(&id) {
                Some(PromiseRecord {
                    status: PromiseStatus::Done(outcome),
                    ..
                }) => Some(outcome.clone()),
                _ => None,
            },
        }
    }
}

fn promise_id_of(value: &Value) -> Result<PromiseId, Exception> {
    match value {
        Value::Promise(handle) => Ok(handle.id()),
        Value::ExternalPromise(handle) => Ok(handle.id()),
        other => Err(Exception::type_error(format!(
            "expected a promise, got {}",
            other.type_name()
        ))),
    }
}

/// Folds gather slots into one outcome: the first error in submission order
/// wins, otherwise the values in order.
fn collect_outcome(slots: &[Option<TaskOutcome>]) -> TaskOutcome {
    let mut values = Vec::with_capacity(slots.len());
    for slot in slots {
        match slot {
            Some(Ok(value)) => values.push(value.clone()),
            Some(Err(error)) => return Err(error.clone()),
            None => {
                return Err(Exception::runtime(
                    "gather woke with an unfilled slot",
                ))
            }
        }
    }
    Ok(Value::List(values))
}

/// Task ids whose stores should fold into the waker, in submission order.
fn merge_candidates(
    targets: &[WaitTarget],
    slots: &[Option<TaskOutcome>],
    kind: WaiterKind,
) -> Vec<TaskId> {
    targets
        .iter()
        .zip(slots.iter())
        .filter_map(|(target, slot)| match (target, kind) {
            (WaitTarget::Task(id), WaiterKind::All) => Some(*id),
            (WaitTarget::Task(id), _) if slot.is_some() => Some(*id),
            _ => None,
        })
        .collect()
}
