//! # Effex VM
//!
//! An algebraic-effects virtual machine: a single-threaded interpreter that
//! runs coroutine-like programs, intercepts the effects and control
//! primitives they yield, and routes effects through a stack of installed
//! handlers using one-shot delimited continuations.
//!
//! ## Architecture
//!
//! - **Segments** hold the live frame stacks of delimited continuations,
//!   arena-allocated with a free list.
//! - **The step machine** advances one mode transition per step: delivering
//!   values, propagating throws, interpreting yields, and returning across
//!   segments.
//! - **Dispatch** routes each effect through the handlers visible at its
//!   callsite under a top-only busy boundary, capturing the callsite as a
//!   one-shot continuation handlers can resume, transfer into, or abandon.
//! - **The driver** executes host calls (starting programs, stepping
//!   coroutines, invoking host handlers) while holding the host lock, and
//!   feeds the outcomes back into the machine.
//! - **The scheduler handler** builds cooperative tasks, promises, and
//!   gather/race on top of the same primitives, switching contexts with
//!   tail transfers only.
//!
//! ## Example
//!
//! ```
//! use effex_vm::coroutine::{CoStep, FnCoroutine, HostYield, Program};
//! use effex_vm::effect::Effect;
//! use effex_vm::runner::{run_with, RunConfig};
//! use effex_vm::stdlib::state_handler;
//! use effex_vm::value::Value;
//!
//! // x <- Get("n"); Put("n", x + 1); return x + 1
//! let program = Program::from_fn("bump", || {
//!     let mut phase = 0;
//!     let mut seen = 0;
//!     Box::new(FnCoroutine::new(move |input| {
//!         phase += 1;
//!         match phase {
//!             1 => CoStep::Yield(HostYield::Effect(Effect::get("n"))),
//!             2 => {
//!                 seen = input.into_value().as_int().unwrap();
//!                 CoStep::Yield(HostYield::Effect(Effect::put("n", seen + 1)))
//!             }
//!             _ => CoStep::Return(Value::from(seen + 1)),
//!         }
//!     }))
//! });
//!
//! let config = RunConfig::default().with_state("n", 41);
//! let outcome = run_with(program, vec![state_handler()], config);
//! assert_eq!(outcome.value(), Some(&Value::from(42)));
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// Internal machinery: the arena, segments, frames, dispatch bookkeeping,
// the step machine, and the driver are not part of the public surface.
mod arena;
mod dispatch;
mod driver;
mod frame;
mod segment;
mod step;
mod vm;
mod vm_dispatch;

/// Control primitives available to handler authors
pub mod control;
/// One-shot continuation values
pub mod continuation;
/// The coroutine protocol programs are written against
pub mod coroutine;
/// The effect model
pub mod effect;
/// Exceptions and terminal errors
pub mod error;
/// Handler variants and the native handler protocol
pub mod handler;
/// The host-call boundary and the embedded coroutine runtime
pub mod host;
/// Opaque identifier types
pub mod ids;
/// Execution limits
pub mod limits;
/// Run entry points and results
pub mod runner;
/// The reference cooperative scheduler handler
pub mod scheduler;
/// The standard state/reader/writer handlers
pub mod stdlib;
/// The native store
pub mod store;
/// Optional dispatch tracing
pub mod trace;
/// Values flowing through the machine
pub mod value;

pub use continuation::Continuation;
pub use control::{ControlPrimitive, Yielded};
pub use coroutine::{CoStep, Coroutine, CoroutineInput, FnCoroutine, HostYield, Program};
pub use effect::{Effect, MergePolicy, StoreMode};
pub use error::{Exception, VmError, VmResult};
pub use handler::{Handler, HandlerProgram, HandlerStep, HostHandler, NativeHandlerFactory};
pub use host::HostFn;
pub use ids::{Marker, PromiseId, TaskId};
pub use limits::VmLimits;
pub use runner::{async_run, async_run_with, run, run_with, RunConfig, RunResult};
pub use scheduler::{scheduler_handler, SchedulerHandler};
pub use stdlib::{reader_handler, state_handler, writer_handler, StdlibHandler};
pub use store::Store;
pub use value::{ExternalPromiseHandle, HostObject, PromiseHandle, TaskHandle, Value};
