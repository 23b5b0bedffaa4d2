//! The host-call boundary.
//!
//! The machine never touches the embedded runtime directly: whenever it
//! needs host work done it surfaces a purpose-tagged [`HostCall`], the
//! driver executes it against the [`CoroutineRuntime`] while holding the
//! host lock, and the outcome flows back in as a [`HostResult`].
//! Classification of yielded objects is complete: every yield lands in
//! exactly one [`Yielded`](crate::control::Yielded) bucket.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::continuation::Continuation;
use crate::control::Yielded;
use crate::coroutine::{CoStep, Coroutine, CoroutineInput, HostYield, Program};
use crate::effect::Effect;
use crate::error::Exception;
use crate::handler::HostHandler;
use crate::ids::CoroutineId;
use crate::value::Value;

/// A host-language function, callable only through a host call.
#[derive(Clone)]
pub struct HostFn {
    name: Arc<str>,
    func: Arc<dyn Fn(Vec<Value>) -> Result<Value, Exception> + Send + Sync>,
}

impl HostFn {
    /// Wraps a host function under a display name.
    pub fn new<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, Exception> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// The function's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Calls the function. Must only happen while the host lock is held.
    pub fn call(&self, args: Vec<Value>) -> Result<Value, Exception> {
        (self.func)(args)
    }
}

impl fmt::Debug for HostFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFn").field("name", &self.name).finish()
    }
}

/// A host call requested by the machine.
#[derive(Debug)]
pub enum HostCall {
    /// Coerce `program` to a coroutine and register it.
    StartProgram { program: Program },

    /// Call a host function with converted arguments.
    CallFunc { func: HostFn, args: Vec<Value> },

    /// Invoke a host handler; its return is coerced to a coroutine.
    CallHandler {
        handler: HostHandler,
        effect: Effect,
        k: Continuation,
    },

    /// First step of a coroutine.
    GenNext { co: CoroutineId },

    /// Send a value into a started coroutine.
    GenSend { co: CoroutineId, value: Value },

    /// Throw an exception into a coroutine.
    GenThrow { co: CoroutineId, error: Exception },
}

/// Outcome of stepping a coroutine, classification already applied.
#[derive(Debug)]
pub enum GenStep {
    /// The coroutine yielded a classified object.
    Yield(Yielded),
    /// The coroutine returned; its instance is gone.
    Return(Value),
    /// The coroutine raised; its instance is gone.
    Error(Exception),
}

/// Result of one executed host call, fed back to the machine.
#[derive(Debug)]
pub enum HostResult {
    /// A plain value (from `CallFunc`).
    Value(Value),
    /// A freshly registered coroutine (from `StartProgram`/`CallHandler`).
    Coroutine(CoroutineId),
    /// A coroutine step (from `GenNext`/`GenSend`/`GenThrow`).
    Gen(GenStep),
    /// The host raised while executing the call itself.
    Failed(Exception),
}

/// The embedded coroutine runtime.
///
/// Owns every live coroutine instance. The driver keeps it behind the host
/// lock; nothing in the step machine touches it.
#[derive(Default)]
pub struct CoroutineRuntime {
    coroutines: HashMap<CoroutineId, Box<dyn Coroutine>>,
}

impl CoroutineRuntime {
    /// Creates an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live coroutine instances.
    pub fn live_count(&self) -> usize {
        self.coroutines.len()
    }

    /// Executes one host call and returns its outcome.
    pub fn execute(&mut self, call: HostCall) -> HostResult {
        match call {
            HostCall::StartProgram { program } => {
                log::trace!("host: start program `{}`", program.name());
                HostResult::Coroutine(self.register(program.instantiate()))
            }
            HostCall::CallFunc { func, args } => {
                log::trace!("host: call fn `{}`", func.name());
                match func.call(args) {
                    Ok(value) => HostResult::Value(value),
                    Err(exception) => HostResult::Failed(exception),
                }
            }
            HostCall::CallHandler { handler, effect, k } => {
                log::trace!("host: call handler `{}` for {}", handler.name(), effect);
                match handler.invoke(effect, k) {
                    Ok(program) => HostResult::Coroutine(self.register(program.instantiate())),
                    Err(exception) => HostResult::Failed(exception),
                }
            }
            HostCall::GenNext { co } => self.step_coroutine(co, CoroutineInput::Start),
            HostCall::GenSend { co, value } => self.step_coroutine(co, CoroutineInput::Value(value)),
            HostCall::GenThrow { co, error } => self.step_coroutine(co, CoroutineInput::Throw(error)),
        }
    }

    fn register(&mut self, coroutine: Box<dyn Coroutine>) -> CoroutineId {
        let id = CoroutineId::fresh();
        self.coroutines.insert(id, coroutine);
        id
    }

    fn step_coroutine(&mut self, id: CoroutineId, input: CoroutineInput) -> HostResult {
        let Some(coroutine) = self.coroutines.get_mut(&id) else {
            return HostResult::Failed(Exception::runtime(format!(
                "coroutine {} is not alive",
                id.raw()
            )));
        };
        match coroutine.resume(input) {
            CoStep::Yield(yielded) => HostResult::Gen(GenStep::Yield(classify(yielded))),
            CoStep::Return(value) => {
                self.coroutines.remove(&id);
                HostResult::Gen(GenStep::Return(value))
            }
            CoStep::Throw(exception) => {
                self.coroutines.remove(&id);
                HostResult::Gen(GenStep::Error(exception))
            }
        }
    }
}

impl fmt::Debug for CoroutineRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoroutineRuntime")
            .field("live", &self.coroutines.len())
            .finish()
    }
}

/// Classifies a raw yield into the machine's buckets.
///
/// Total: control primitives, effects, and programs keep their kind, and any
/// plain value lands in `Unknown`, which the step machine turns into a type
/// error.
pub fn classify(yielded: HostYield) -> Yielded {
    match yielded {
        HostYield::Control(primitive) => Yielded::Primitive(primitive),
        HostYield::Effect(effect) => Yielded::Effect(effect),
        HostYield::Program(program) => Yielded::Program(program),
        HostYield::Value(value) => Yielded::Unknown(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlPrimitive;
    use crate::coroutine::FnCoroutine;

    fn yielding_program() -> Program {
        Program::from_fn("yields-once", || {
            let mut done = false;
            Box::new(FnCoroutine::new(move |input| {
                if done {
                    CoStep::Return(input.into_value())
                } else {
                    done = true;
                    CoStep::Yield(HostYield::Effect(Effect::get("k")))
                }
            }))
        })
    }

    #[test]
    fn start_and_step_a_program() {
        let mut runtime = CoroutineRuntime::new();
        let co = match runtime.execute(HostCall::StartProgram {
            program: yielding_program(),
        }) {
            HostResult::Coroutine(id) => id,
            other => panic!("unexpected result: {other:?}"),
        };
        assert_eq!(runtime.live_count(), 1);

        match runtime.execute(HostCall::GenNext { co }) {
            HostResult::Gen(GenStep::Yield(Yielded::Effect(Effect::Get { key }))) => {
                assert_eq!(key, "k")
            }
            other => panic!("unexpected result: {other:?}"),
        }

        match runtime.execute(HostCall::GenSend {
            co,
            value: Value::from(5),
        }) {
            HostResult::Gen(GenStep::Return(Value::Int(5))) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(runtime.live_count(), 0);
    }

    #[test]
    fn stepping_a_dead_coroutine_fails() {
        let mut runtime = CoroutineRuntime::new();
        let co = CoroutineId::fresh();
        assert!(matches!(
            runtime.execute(HostCall::GenNext { co }),
            HostResult::Failed(_)
        ));
    }

    #[test]
    fn classification_is_total() {
        assert!(matches!(
            classify(HostYield::Control(ControlPrimitive::GetContinuation)),
            Yielded::Primitive(_)
        ));
        assert!(matches!(
            classify(HostYield::Effect(Effect::get("k"))),
            Yielded::Effect(_)
        ));
        assert!(matches!(
            classify(HostYield::Program(yielding_program())),
            Yielded::Program(_)
        ));
        assert!(matches!(
            classify(HostYield::Value(Value::from(3))),
            Yielded::Unknown(_)
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn primitive_value() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Unit),
                Just(Value::Null),
                any::<i64>().prop_map(Value::Int),
                ".*".prop_map(Value::Str),
                any::<bool>().prop_map(Value::Bool),
            ]
        }

        proptest! {
            /// Primitive values survive a round trip across the host
            /// boundary unchanged.
            #[test]
            fn primitives_round_trip_through_host_calls(value in primitive_value()) {
                let mut runtime = CoroutineRuntime::new();
                let identity =
                    HostFn::new("id", |mut args| Ok(args.pop().unwrap_or(Value::Unit)));
                match runtime.execute(HostCall::CallFunc {
                    func: identity,
                    args: vec![value.clone()],
                }) {
                    HostResult::Value(back) => prop_assert_eq!(back, value),
                    other => prop_assert!(false, "unexpected result: {:?}", other),
                }
            }
        }
    }

    #[test]
    fn host_fn_errors_surface_as_failed() {
        let mut runtime = CoroutineRuntime::new();
        let failing = HostFn::new("boom", |_| Err(Exception::runtime("boom")));
        assert!(matches!(
            runtime.execute(HostCall::CallFunc {
                func: failing,
                args: vec![],
            }),
            HostResult::Failed(_)
        ));

        let identity = HostFn::new("id", |mut args| Ok(args.pop().unwrap_or(Value::Unit)));
        match runtime.execute(HostCall::CallFunc {
            func: identity,
            args: vec![Value::from("x")],
        }) {
            HostResult::Value(v) => assert_eq!(v, Value::from("x")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
