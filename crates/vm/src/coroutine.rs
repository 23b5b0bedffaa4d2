//! The embedded coroutine protocol.
//!
//! User programs are coroutine-like generators: they are stepped with a
//! start/send/throw input and answer with a yield, a return, or a throw.
//! A [`Program`] is the cloneable factory handle the VM passes around;
//! instantiation happens inside the coroutine runtime, under the host lock.

use std::fmt;
use std::sync::Arc;

use crate::control::ControlPrimitive;
use crate::effect::Effect;
use crate::error::Exception;
use crate::value::Value;

/// Input fed into one coroutine step.
#[derive(Debug, Clone)]
pub enum CoroutineInput {
    /// First step of the coroutine.
    Start,
    /// Answer to the previous yield.
    Value(Value),
    /// Exception thrown at the previous yield point.
    Throw(Exception),
}

/// What a coroutine step produced.
#[derive(Debug)]
pub enum CoStep {
    /// The coroutine yielded; classification happens in the runtime.
    Yield(HostYield),
    /// The coroutine finished with a value.
    Return(Value),
    /// The coroutine raised.
    Throw(Exception),
}

/// A yield before classification.
///
/// Everything a program can yield falls in one of these buckets; the
/// runtime's classifier maps them onto the machine's `Yielded` kinds, with
/// plain values landing in the unknown bucket.
#[derive(Debug)]
pub enum HostYield {
    /// A dispatch or continuation primitive.
    Control(ControlPrimitive),
    /// An effect to dispatch.
    Effect(Effect),
    /// A sub-program to run in place.
    Program(Program),
    /// Anything else. Rejected by classification with a type error.
    Value(Value),
}

/// One coroutine instance, stepped by the runtime.
pub trait Coroutine: Send {
    /// Advances the coroutine with `input` and returns what it did.
    ///
    /// After `CoStep::Return` or `CoStep::Throw` the instance is dead and
    /// must not be resumed again.
    fn resume(&mut self, input: CoroutineInput) -> CoStep;
}

/// Factory producing coroutine instances for a program.
pub trait ProgramSource: Send + Sync {
    /// Instantiates a fresh coroutine for one run of the program.
    fn instantiate(&self) -> Box<dyn Coroutine>;
}

/// Cloneable handle to a program.
///
/// The analog of a decorated generator function in the embedded language:
/// calling it (here: [`ProgramSource::instantiate`]) produces a fresh
/// coroutine each time.
#[derive(Clone)]
pub struct Program {
    name: Arc<str>,
    source: Arc<dyn ProgramSource>,
}

impl Program {
    /// Wraps an explicit program source.
    pub fn new(name: impl Into<Arc<str>>, source: Arc<dyn ProgramSource>) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }

    /// Builds a program from a factory closure.
    pub fn from_fn<F>(name: impl Into<Arc<str>>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Coroutine> + Send + Sync + 'static,
    {
        struct FnSource<F>(F);

        impl<F> ProgramSource for FnSource<F>
        where
            F: Fn() -> Box<dyn Coroutine> + Send + Sync,
        {
            fn instantiate(&self) -> Box<dyn Coroutine> {
                (self.0)()
            }
        }

        Self::new(name, Arc::new(FnSource(factory)))
    }

    /// The program's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instantiates a fresh coroutine.
    pub fn instantiate(&self) -> Box<dyn Coroutine> {
        self.source.instantiate()
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program").field("name", &self.name).finish()
    }
}

/// Coroutine written as a step closure over its own captured state.
///
/// The closure is handed each [`CoroutineInput`] in turn; it owns whatever
/// state it needs to remember where it is.
pub struct FnCoroutine<F> {
    step: F,
}

impl<F> FnCoroutine<F>
where
    F: FnMut(CoroutineInput) -> CoStep + Send,
{
    /// Wraps a step closure.
    pub fn new(step: F) -> Self {
        Self { step }
    }
}

impl<F> Coroutine for FnCoroutine<F>
where
    F: FnMut(CoroutineInput) -> CoStep + Send,
{
    fn resume(&mut self, input: CoroutineInput) -> CoStep {
        (self.step)(input)
    }
}

impl CoroutineInput {
    /// The delivered value, with `Start` reading as unit.
    ///
    /// Panics on `Throw`; step closures that expect a value should only use
    /// this after the throw case is handled.
    pub fn into_value(self) -> Value {
        match self {
            CoroutineInput::Start => Value::Unit,
            CoroutineInput::Value(v) => v,
            CoroutineInput::Throw(e) => {
                panic!("coroutine expected a value, got throw: {e}")
            }
        }
    }
}
