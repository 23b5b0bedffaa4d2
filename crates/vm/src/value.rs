//! Values flowing through the VM.
//!
//! [`Value`] is the tagged union every frame, handler, and store slot works
//! with. Host objects are reference-counted trait objects behind
//! [`HostObject`], converted to and from embedded-runtime values only while
//! the host lock is held.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::continuation::Continuation;
use crate::error::{Exception, VmError, VmResult};
use crate::handler::Handler;
use crate::ids::{PromiseId, TaskId};

/// A host-language object carried opaquely through the VM.
///
/// The VM never looks inside a host object beyond its `type_name`; effects
/// defined by user code are matched by that name.
pub trait HostObject: fmt::Debug + Send + Sync {
    /// The type name used for effect matching and diagnostics.
    fn type_name(&self) -> &str;

    /// Allows downcasting to concrete types.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a [`HostObject`].
pub type HostObjectRef = Arc<dyn HostObject>;

/// Handle to a task spawned under the scheduler handler.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskHandle {
    id: TaskId,
}

impl TaskHandle {
    /// Wraps a task id.
    pub fn new(id: TaskId) -> Self {
        Self { id }
    }

    /// The underlying task id.
    pub fn id(self) -> TaskId {
        self.id
    }
}

/// Handle to a promise managed by the scheduler handler.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PromiseHandle {
    id: PromiseId,
}

impl PromiseHandle {
    /// Wraps a promise id.
    pub fn new(id: PromiseId) -> Self {
        Self { id }
    }

    /// The underlying promise id.
    pub fn id(self) -> PromiseId {
        self.id
    }
}

/// Completion record delivered to the scheduler from outside the VM.
pub(crate) type ExternalCompletion = (PromiseId, Result<Value, Exception>);

/// Thread-safe inbox shared between external promise handles and the
/// scheduler that drains them.
pub(crate) type ExternalInbox = Arc<Mutex<VecDeque<ExternalCompletion>>>;

/// Handle to a promise completable from outside the VM.
///
/// The handle is `Clone + Send`; completing it from another thread enqueues
/// the result, which the scheduler drains on its next dispatch.
#[derive(Clone)]
pub struct ExternalPromiseHandle {
    id: PromiseId,
    inbox: ExternalInbox,
}

impl ExternalPromiseHandle {
    pub(crate) fn new(id: PromiseId, inbox: ExternalInbox) -> Self {
        Self { id, inbox }
    }

    /// The underlying promise id.
    pub fn id(&self) -> PromiseId {
        self.id
    }

    /// Completes the promise with `value`. Idempotence is resolved by the
    /// scheduler: only the first completion wins.
    pub fn complete(&self, value: Value) {
        self.inbox.lock().push_back((self.id, Ok(value)));
    }

    /// Fails the promise with `error`.
    pub fn fail(&self, error: Exception) {
        self.inbox.lock().push_back((self.id, Err(error)));
    }
}

impl fmt::Debug for ExternalPromiseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalPromiseHandle")
            .field("id", &self.id)
            .finish()
    }
}

impl PartialEq for ExternalPromiseHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// A value in the Effex VM.
#[derive(Debug, Clone)]
pub enum Value {
    /// The unit value, produced by effects with no interesting answer.
    Unit,

    /// Absent value, distinct from unit.
    Null,

    /// A machine integer.
    Int(i64),

    /// An owned string.
    Str(String),

    /// A boolean.
    Bool(bool),

    /// An ordered sequence of values.
    List(Vec<Value>),

    /// An opaque host-language object.
    Host(HostObjectRef),

    /// A captured or created continuation.
    Continuation(Continuation),

    /// A list of handler objects, as returned by `GetHandlers`.
    Handlers(Vec<Handler>),

    /// A task handle.
    Task(TaskHandle),

    /// A promise handle.
    Promise(PromiseHandle),

    /// An externally completable promise handle.
    ExternalPromise(ExternalPromiseHandle),
}

impl Value {
    /// Builds a list value.
    pub fn list<T: Into<Vec<Value>>>(items: T) -> Self {
        Value::List(items.into())
    }

    /// Wraps a host object.
    pub fn host<T: HostObject + 'static>(object: T) -> Self {
        Value::Host(Arc::new(object))
    }

    /// Short name of the variant, used in diagnostics and type errors.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Unit => "unit",
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Host(obj) => obj.type_name(),
            Value::Continuation(_) => "continuation",
            Value::Handlers(_) => "handlers",
            Value::Task(_) => "task",
            Value::Promise(_) => "promise",
            Value::ExternalPromise(_) => "external-promise",
        }
    }

    /// Returns `true` for the unit value.
    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    /// Returns `true` for the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Reads the value as an integer.
    pub fn as_int(&self) -> VmResult<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(type_mismatch("int", other)),
        }
    }

    /// Reads the value as a string slice.
    pub fn as_str(&self) -> VmResult<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(type_mismatch("str", other)),
        }
    }

    /// Reads the value as a boolean.
    pub fn as_bool(&self) -> VmResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(type_mismatch("bool", other)),
        }
    }

    /// Reads the value as a list slice.
    pub fn as_list(&self) -> VmResult<&[Value]> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(type_mismatch("list", other)),
        }
    }

    /// Reads the value as a continuation.
    pub fn as_continuation(&self) -> VmResult<&Continuation> {
        match self {
            Value::Continuation(k) => Ok(k),
            other => Err(type_mismatch("continuation", other)),
        }
    }

    /// Reads the value as a handler list.
    pub fn as_handlers(&self) -> VmResult<&[Handler]> {
        match self {
            Value::Handlers(handlers) => Ok(handlers),
            other => Err(type_mismatch("handlers", other)),
        }
    }

    /// Reads the value as a task handle.
    pub fn as_task(&self) -> VmResult<TaskHandle> {
        match self {
            Value::Task(task) => Ok(*task),
            other => Err(type_mismatch("task", other)),
        }
    }

    /// Reads the value as a promise handle.
    pub fn as_promise(&self) -> VmResult<PromiseHandle> {
        match self {
            Value::Promise(promise) => Ok(*promise),
            other => Err(type_mismatch("promise", other)),
        }
    }

    /// Reads the value as a host object handle.
    pub fn as_host(&self) -> VmResult<&HostObjectRef> {
        match self {
            Value::Host(obj) => Ok(obj),
            other => Err(type_mismatch("host object", other)),
        }
    }
}

fn type_mismatch(expected: &str, actual: &Value) -> VmError {
    VmError::type_error(format!(
        "expected {expected}, got {}",
        actual.type_name()
    ))
}

impl Default for Value {
    fn default() -> Self {
        Value::Unit
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Host(a), Value::Host(b)) => Arc::ptr_eq(a, b),
            (Value::Continuation(a), Value::Continuation(b)) => a.cont_id() == b.cont_id(),
            (Value::Handlers(a), Value::Handlers(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.name() == y.name())
            }
            (Value::Task(a), Value::Task(b)) => a == b,
            (Value::Promise(a), Value::Promise(b)) => a == b,
            (Value::ExternalPromise(a), Value::ExternalPromise(b)) => a == b,
            _ => false,
        }
    }
}
