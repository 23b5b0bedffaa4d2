//! Control primitives and the classified-yield type.
//!
//! Control primitives are the instructions handler authors (and the
//! scheduler) yield to steer dispatch: answering a continuation, forwarding
//! an effect outward, installing handlers, or minting new continuations.

use crate::continuation::Continuation;
use crate::coroutine::Program;
use crate::effect::Effect;
use crate::error::Exception;
use crate::handler::Handler;
use crate::value::Value;

/// A control instruction yielded to the machine.
#[derive(Debug, Clone)]
pub enum ControlPrimitive {
    /// Answer `k` with `value`; control returns here when `k` finishes.
    Resume { k: Continuation, value: Value },

    /// Answer `k` with `value` in tail position; the current context is
    /// abandoned.
    Transfer { k: Continuation, value: Value },

    /// Throw `error` into `k` in tail position, as a generator throw would.
    ThrowInto { k: Continuation, error: Exception },

    /// Forward the current (or a substituted) effect to the next outer
    /// visible handler; its return value becomes the value of this yield.
    Delegate { effect: Option<Effect> },

    /// Forward like `Delegate`, but terminally: the outer handler's answer
    /// flows through to the callsite untouched.
    Pass { effect: Option<Effect> },

    /// Run `program` under `handler` installed as the innermost scope.
    WithHandler { handler: Handler, program: Program },

    /// Answer with the callsite continuation of the current dispatch.
    /// Does not consume it.
    GetContinuation,

    /// Answer with the handler objects visible to the current dispatch,
    /// innermost first.
    GetHandlers,

    /// Mint an unstarted continuation from a program and a handler list
    /// (outermost first); answer with it.
    CreateContinuation {
        program: Program,
        handlers: Vec<Handler>,
    },

    /// Activate `k`: captured continuations resume as `Resume` does;
    /// created ones install their handlers and start their program.
    ResumeContinuation { k: Continuation, value: Value },
}

impl ControlPrimitive {
    /// Short name used in traces and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ControlPrimitive::Resume { .. } => "Resume",
            ControlPrimitive::Transfer { .. } => "Transfer",
            ControlPrimitive::ThrowInto { .. } => "ThrowInto",
            ControlPrimitive::Delegate { .. } => "Delegate",
            ControlPrimitive::Pass { .. } => "Pass",
            ControlPrimitive::WithHandler { .. } => "WithHandler",
            ControlPrimitive::GetContinuation => "GetContinuation",
            ControlPrimitive::GetHandlers => "GetHandlers",
            ControlPrimitive::CreateContinuation { .. } => "CreateContinuation",
            ControlPrimitive::ResumeContinuation { .. } => "ResumeContinuation",
        }
    }
}

/// A classified yield, ready for the step machine.
#[derive(Debug)]
pub enum Yielded {
    /// A control primitive to interpret.
    Primitive(ControlPrimitive),
    /// An effect to dispatch.
    Effect(Effect),
    /// A sub-program to start in place.
    Program(Program),
    /// An unclassifiable object; interpreting it raises a type error.
    Unknown(Value),
}
