//! The effect model.
//!
//! Effects are requests a program yields without saying how to fulfill them.
//! Standard store effects and the built-in concurrency effects are variants
//! here; user-defined effects ride along as host objects and are matched by
//! their type name. Every effect, standard or not, goes through dispatch.

use std::fmt;

use crate::coroutine::Program;
use crate::error::Exception;
use crate::handler::Handler;
use crate::host::HostFn;
use crate::value::{HostObjectRef, TaskHandle, Value};

/// Result of a finished task, reported through `TaskCompleted`.
pub type TaskOutcome = Result<Value, Exception>;

/// How a spawned task relates to the parent's native store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// The task reads and writes the spawner's store directly.
    Shared,
    /// The task runs against a snapshot taken at spawn time; the snapshot is
    /// merged back per the given policy when the task is gathered.
    Isolated(MergePolicy),
}

/// Merge policy applied to an isolated task store when its result is
/// collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Append the task's log entries to the collector's log. State and env
    /// changes stay in the snapshot.
    #[default]
    LogsOnly,
    /// Drop the snapshot entirely.
    Discard,
}

/// An effect dispatched through the handler chain.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Read `key` from the state store.
    Get { key: String },

    /// Write `value` under `key` in the state store.
    Put { key: String, value: Value },

    /// Replace the value under `key` with `modifier(old)`; answers the old
    /// value. The modifier runs as a host call.
    Modify { key: String, modifier: HostFn },

    /// Read `key` from the environment.
    Ask { key: String },

    /// Append `message` to the log.
    Tell { message: Value },

    /// Start `program` as a task under `handlers`.
    Spawn {
        program: Program,
        handlers: Vec<Handler>,
        store_mode: StoreMode,
    },

    /// Wait for every item; answers their results in submission order.
    Gather { items: Vec<Value> },

    /// Wait for the first item to resolve; answers its result.
    Race { items: Vec<Value> },

    /// Create a promise; answers its handle.
    CreatePromise,

    /// Resolve `promise` with `value`.
    CompletePromise { promise: Value, value: Value },

    /// Reject `promise` with `error`.
    FailPromise { promise: Value, error: Exception },

    /// Create a promise completable from outside the VM; answers its handle.
    CreateExternalPromise,

    /// Block until `task` completes; answers its result.
    Wait { task: Value },

    /// Block until `promise` resolves; answers its value.
    Await { promise: Value },

    /// Emitted by the task wrapper when a task terminates.
    TaskCompleted {
        task: TaskHandle,
        result: TaskOutcome,
    },

    /// A user-defined effect, matched by its host type name.
    Host(HostObjectRef),
}

impl Effect {
    /// Builds a `Get` effect.
    pub fn get(key: impl Into<String>) -> Self {
        Effect::Get { key: key.into() }
    }

    /// Builds a `Put` effect.
    pub fn put(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Effect::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Builds a `Modify` effect.
    pub fn modify(key: impl Into<String>, modifier: HostFn) -> Self {
        Effect::Modify {
            key: key.into(),
            modifier,
        }
    }

    /// Builds an `Ask` effect.
    pub fn ask(key: impl Into<String>) -> Self {
        Effect::Ask { key: key.into() }
    }

    /// Builds a `Tell` effect.
    pub fn tell(message: impl Into<Value>) -> Self {
        Effect::Tell {
            message: message.into(),
        }
    }

    /// Builds a `Spawn` effect with a shared store.
    pub fn spawn(program: Program) -> Self {
        Effect::Spawn {
            program,
            handlers: Vec::new(),
            store_mode: StoreMode::Shared,
        }
    }

    /// Builds a `Spawn` effect with explicit handlers and store mode.
    pub fn spawn_with(program: Program, handlers: Vec<Handler>, store_mode: StoreMode) -> Self {
        Effect::Spawn {
            program,
            handlers,
            store_mode,
        }
    }

    /// Builds a `Gather` effect.
    pub fn gather(items: Vec<Value>) -> Self {
        Effect::Gather { items }
    }

    /// Builds a `Race` effect.
    pub fn race(items: Vec<Value>) -> Self {
        Effect::Race { items }
    }

    /// Builds a `Wait` effect for a task handle value.
    pub fn wait(task: impl Into<Value>) -> Self {
        Effect::Wait { task: task.into() }
    }

    /// Builds an `Await` effect for a promise handle value.
    pub fn await_promise(promise: impl Into<Value>) -> Self {
        Effect::Await {
            promise: promise.into(),
        }
    }

    /// Wraps a user-defined effect object.
    pub fn host(object: HostObjectRef) -> Self {
        Effect::Host(object)
    }

    /// The name handlers match on.
    pub fn type_name(&self) -> &str {
        match self {
            Effect::Get { .. } => "state.get",
            Effect::Put { .. } => "state.put",
            Effect::Modify { .. } => "state.modify",
            Effect::Ask { .. } => "reader.ask",
            Effect::Tell { .. } => "writer.tell",
            Effect::Spawn { .. } => "task.spawn",
            Effect::Gather { .. } => "task.gather",
            Effect::Race { .. } => "task.race",
            Effect::CreatePromise => "promise.create",
            Effect::CompletePromise { .. } => "promise.complete",
            Effect::FailPromise { .. } => "promise.fail",
            Effect::CreateExternalPromise => "promise.create-external",
            Effect::Wait { .. } => "task.wait",
            Effect::Await { .. } => "promise.await",
            Effect::TaskCompleted { .. } => "task.completed",
            Effect::Host(obj) => obj.type_name(),
        }
    }

    /// Returns `true` when this is one of the built-in store effects.
    pub fn is_store_effect(&self) -> bool {
        matches!(
            self,
            Effect::Get { .. }
                | Effect::Put { .. }
                | Effect::Modify { .. }
                | Effect::Ask { .. }
                | Effect::Tell { .. }
        )
    }

    /// Returns `true` when this is one of the scheduler effects.
    pub fn is_scheduler_effect(&self) -> bool {
        matches!(
            self,
            Effect::Spawn { .. }
                | Effect::Gather { .. }
                | Effect::Race { .. }
                | Effect::CreatePromise
                | Effect::CompletePromise { .. }
                | Effect::FailPromise { .. }
                | Effect::CreateExternalPromise
                | Effect::Wait { .. }
                | Effect::Await { .. }
                | Effect::TaskCompleted { .. }
        )
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Get { key } | Effect::Ask { key } | Effect::Modify { key, .. } => {
                write!(f, "{}({key})", self.type_name())
            }
            Effect::Put { key, .. } => write!(f, "{}({key})", self.type_name()),
            Effect::TaskCompleted { task, .. } => {
                write!(f, "{}({})", self.type_name(), task.id())
            }
            other => write!(f, "{}", other.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_distinguish_store_effects() {
        assert_eq!(Effect::get("k").type_name(), "state.get");
        assert_eq!(Effect::put("k", 1).type_name(), "state.put");
        assert_eq!(Effect::ask("k").type_name(), "reader.ask");
        assert_eq!(Effect::tell("m").type_name(), "writer.tell");
        assert!(Effect::get("k").is_store_effect());
        assert!(!Effect::get("k").is_scheduler_effect());
    }

    #[test]
    fn display_includes_the_key() {
        assert_eq!(Effect::get("n").to_string(), "state.get(n)");
    }

    #[test]
    fn default_merge_policy_keeps_logs() {
        assert_eq!(MergePolicy::default(), MergePolicy::LogsOnly);
    }
}
