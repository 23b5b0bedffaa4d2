//! The handler model.
//!
//! Three kinds of handler fulfil effects: the standard store handlers
//! (native, immediate), generator-like native handler programs (the
//! scheduler, user-written native handlers), and host-callable handlers
//! whose body is a program in the embedded language.

use std::fmt;
use std::sync::Arc;

use crate::continuation::Continuation;
use crate::control::Yielded;
use crate::coroutine::Program;
use crate::effect::Effect;
use crate::error::Exception;
use crate::host::HostCall;
use crate::ids::SegmentId;
use crate::stdlib::{StdlibContext, StdlibHandler};
use crate::store::Store;
use crate::value::Value;

/// Immediate answer of a standard handler.
#[derive(Debug)]
pub enum HandlerAction {
    /// Answer `k` with `value`, call-return style.
    Resume { k: Continuation, value: Value },
    /// Answer `k` with `value`, tail style.
    Transfer { k: Continuation, value: Value },
    /// Finish the dispatch with `value` flowing to the prompt's caller.
    Return { value: Value },
    /// The handler needs a host call before it can answer. The machine
    /// remembers `k` and `context` and feeds the call's result back through
    /// [`StdlibHandler::continue_after_host`].
    NeedsHost {
        call: HostCall,
        k: Continuation,
        context: StdlibContext,
    },
}

/// One step of a generator-like native handler program.
#[derive(Debug)]
pub enum HandlerStep {
    /// The program yielded; the machine interprets the yield and resumes the
    /// program with its answer later.
    Yield(Yielded),
    /// The program finished; the value flows as a handler return.
    Return(Value),
    /// The program raised.
    Throw(Exception),
}

/// A generator-like native handler program instance.
///
/// Mirrors the coroutine protocol of host handlers: `start` plays the first
/// send, `resume`/`throw` continue after a yield.
pub trait HandlerProgram: Send {
    /// First step, with the dispatched effect and the callsite continuation.
    fn start(&mut self, effect: Effect, k_user: Continuation, store: &mut Store) -> HandlerStep;

    /// Continue after a yield with the yield's answer.
    fn resume(&mut self, value: Value, store: &mut Store) -> HandlerStep;

    /// Continue after a yield with an exception thrown at the yield point.
    fn throw(&mut self, error: Exception, store: &mut Store) -> HandlerStep;
}

/// Factory for native handler program instances, one per dispatch.
pub trait NativeHandlerFactory: Send + Sync {
    /// The handler's display name.
    fn name(&self) -> &str;

    /// Whether this handler answers `effect`.
    fn can_handle(&self, effect: &Effect) -> bool;

    /// Creates the program instance for one dispatch.
    fn instantiate(&self) -> Box<dyn HandlerProgram>;
}

/// A handler whose body lives in the embedded language.
///
/// Invoking it is a host call producing a program; that program's coroutine
/// yields control primitives to answer the effect.
#[derive(Clone)]
pub struct HostHandler {
    name: Arc<str>,
    matcher: Arc<dyn Fn(&Effect) -> bool + Send + Sync>,
    body: Arc<dyn Fn(Effect, Continuation) -> Result<Program, Exception> + Send + Sync>,
}

impl HostHandler {
    /// Builds a host handler from a match predicate and a body factory.
    pub fn new<M, B>(name: impl Into<Arc<str>>, matcher: M, body: B) -> Self
    where
        M: Fn(&Effect) -> bool + Send + Sync + 'static,
        B: Fn(Effect, Continuation) -> Result<Program, Exception> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            matcher: Arc::new(matcher),
            body: Arc::new(body),
        }
    }

    /// Builds a host handler matching effects by type name.
    pub fn for_effect<B>(name: impl Into<Arc<str>>, effect_name: &str, body: B) -> Self
    where
        B: Fn(Effect, Continuation) -> Result<Program, Exception> + Send + Sync + 'static,
    {
        let wanted = effect_name.to_string();
        Self::new(name, move |effect| effect.type_name() == wanted, body)
    }

    /// The handler's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handler answers `effect`.
    pub fn can_handle(&self, effect: &Effect) -> bool {
        (self.matcher)(effect)
    }

    /// Produces the handler body program for `effect` and `k`.
    pub fn invoke(&self, effect: Effect, k: Continuation) -> Result<Program, Exception> {
        (self.body)(effect, k)
    }
}

impl fmt::Debug for HostHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHandler").field("name", &self.name).finish()
    }
}

/// An installable handler.
#[derive(Clone)]
pub enum Handler {
    /// A standard store handler with immediate native semantics.
    Standard(StdlibHandler),
    /// A generator-like native handler.
    Native(Arc<dyn NativeHandlerFactory>),
    /// A handler whose body runs in the embedded language.
    HostCallable(HostHandler),
}

impl Handler {
    /// Wraps a native handler factory.
    pub fn native<F: NativeHandlerFactory + 'static>(factory: F) -> Self {
        Handler::Native(Arc::new(factory))
    }

    /// Wraps a host-callable handler.
    pub fn host_callable(handler: HostHandler) -> Self {
        Handler::HostCallable(handler)
    }

    /// The handler's display name.
    pub fn name(&self) -> &str {
        match self {
            Handler::Standard(h) => h.name(),
            Handler::Native(f) => f.name(),
            Handler::HostCallable(h) => h.name(),
        }
    }

    /// Whether this handler answers `effect`.
    pub fn can_handle(&self, effect: &Effect) -> bool {
        match self {
            Handler::Standard(h) => h.can_handle(effect),
            Handler::Native(f) => f.can_handle(effect),
            Handler::HostCallable(h) => h.can_handle(effect),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Standard(h) => write!(f, "Standard({})", h.name()),
            Handler::Native(factory) => write!(f, "Native({})", factory.name()),
            Handler::HostCallable(h) => write!(f, "HostCallable({})", h.name()),
        }
    }
}

/// Registry entry for an installed handler.
///
/// Stores the prompt segment alongside the handler so dispatch does not have
/// to search for the prompt.
#[derive(Debug, Clone)]
pub struct HandlerEntry {
    pub handler: Handler,
    pub prompt_seg_id: SegmentId,
}
