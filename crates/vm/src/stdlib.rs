//! Standard store handlers.
//!
//! State, reader, and writer are native immediate handlers over the store.
//! They are optimized implementations, not special cases: every store effect
//! still goes through dispatch like any user effect.

use crate::continuation::Continuation;
use crate::effect::Effect;
use crate::error::{VmError, VmResult};
use crate::handler::{Handler, HandlerAction};
use crate::host::HostCall;
use crate::store::Store;
use crate::value::Value;

/// The standard handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdlibHandler {
    /// `Get`/`Put`/`Modify` over the state map.
    State,
    /// `Ask` over the environment map.
    Reader,
    /// `Tell` onto the log.
    Writer,
}

/// Saved context for a standard handler waiting on a host call.
#[derive(Debug, Clone)]
pub enum StdlibContext {
    /// A `Modify` whose modifier function is running; `old` is answered to
    /// the callsite once the new value is written.
    ModifyPending { key: String, old: Value },
}

impl StdlibHandler {
    /// The handler's display name.
    pub fn name(&self) -> &'static str {
        match self {
            StdlibHandler::State => "state",
            StdlibHandler::Reader => "reader",
            StdlibHandler::Writer => "writer",
        }
    }

    /// Whether this handler answers `effect`.
    pub fn can_handle(&self, effect: &Effect) -> bool {
        match self {
            StdlibHandler::State => matches!(
                effect,
                Effect::Get { .. } | Effect::Put { .. } | Effect::Modify { .. }
            ),
            StdlibHandler::Reader => matches!(effect, Effect::Ask { .. }),
            StdlibHandler::Writer => matches!(effect, Effect::Tell { .. }),
        }
    }

    /// Answers `effect` against `store`.
    pub fn handle(
        &self,
        effect: Effect,
        k: Continuation,
        store: &mut Store,
    ) -> VmResult<HandlerAction> {
        match (*self, effect) {
            (StdlibHandler::State, Effect::Get { key }) => {
                let value = store.get_state(&key).cloned().unwrap_or(Value::Null);
                Ok(HandlerAction::Resume { k, value })
            }
            (StdlibHandler::State, Effect::Put { key, value }) => {
                store.set_state(key, value);
                Ok(HandlerAction::Resume {
                    k,
                    value: Value::Unit,
                })
            }
            (StdlibHandler::State, Effect::Modify { key, modifier }) => {
                let old = store.get_state(&key).cloned().unwrap_or(Value::Null);
                Ok(HandlerAction::NeedsHost {
                    call: HostCall::CallFunc {
                        func: modifier,
                        args: vec![old.clone()],
                    },
                    k,
                    context: StdlibContext::ModifyPending { key, old },
                })
            }
            (StdlibHandler::Reader, Effect::Ask { key }) => {
                let value = store.get_env(&key).cloned().unwrap_or(Value::Null);
                Ok(HandlerAction::Resume { k, value })
            }
            (StdlibHandler::Writer, Effect::Tell { message }) => {
                store.append_log(message);
                Ok(HandlerAction::Resume {
                    k,
                    value: Value::Unit,
                })
            }
            (handler, effect) => Err(VmError::internal(format!(
                "{} handler asked to handle {}",
                handler.name(),
                effect
            ))),
        }
    }

    /// Continues after the host call a previous [`HandlerAction::NeedsHost`]
    /// requested. The returned action must not itself need the host.
    pub fn continue_after_host(
        &self,
        result: Value,
        context: StdlibContext,
        k: Continuation,
        store: &mut Store,
    ) -> VmResult<HandlerAction> {
        match context {
            StdlibContext::ModifyPending { key, old } => {
                store.set_state(key, result);
                Ok(HandlerAction::Resume { k, value: old })
            }
        }
    }
}

/// The state handler, ready to install.
pub fn state_handler() -> Handler {
    Handler::Standard(StdlibHandler::State)
}

/// The reader handler, ready to install.
pub fn reader_handler() -> Handler {
    Handler::Standard(StdlibHandler::Reader)
}

/// The writer handler, ready to install.
pub fn writer_handler() -> Handler {
    Handler::Standard(StdlibHandler::Writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostFn;
    use crate::ids::Marker;
    use crate::segment::Segment;

    fn callsite() -> Continuation {
        let seg = Segment::new(Marker::fresh(), None, Vec::new());
        Continuation::capture(&seg, None)
    }

    #[test]
    fn get_answers_the_stored_value_or_null() {
        let mut store = Store::new();
        store.set_state("n", Value::from(41));

        match StdlibHandler::State
            .handle(Effect::get("n"), callsite(), &mut store)
            .unwrap()
        {
            HandlerAction::Resume { value, .. } => assert_eq!(value, Value::from(41)),
            other => panic!("unexpected action: {other:?}"),
        }

        match StdlibHandler::State
            .handle(Effect::get("missing"), callsite(), &mut store)
            .unwrap()
        {
            HandlerAction::Resume { value, .. } => assert!(value.is_null()),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn put_updates_and_answers_unit() {
        let mut store = Store::new();
        match StdlibHandler::State
            .handle(Effect::put("n", 7), callsite(), &mut store)
            .unwrap()
        {
            HandlerAction::Resume { value, .. } => assert!(value.is_unit()),
            other => panic!("unexpected action: {other:?}"),
        }
        assert_eq!(store.get_state("n"), Some(&Value::from(7)));
    }

    #[test]
    fn modify_round_trips_through_the_host() {
        let mut store = Store::new();
        store.set_state("n", Value::from(10));
        let bump = HostFn::new("bump", |args| {
            Ok(Value::from(args[0].as_int()? + 1))
        });

        let action = StdlibHandler::State
            .handle(Effect::modify("n", bump.clone()), callsite(), &mut store)
            .unwrap();
        let (call, k, context) = match action {
            HandlerAction::NeedsHost { call, k, context } => (call, k, context),
            other => panic!("unexpected action: {other:?}"),
        };

        let host_result = match call {
            HostCall::CallFunc { func, args } => func.call(args).unwrap(),
            other => panic!("unexpected call: {other:?}"),
        };
        assert_eq!(host_result, Value::from(11));

        match StdlibHandler::State
            .continue_after_host(host_result, context, k, &mut store)
            .unwrap()
        {
            HandlerAction::Resume { value, .. } => assert_eq!(value, Value::from(10)),
            other => panic!("unexpected action: {other:?}"),
        }
        assert_eq!(store.get_state("n"), Some(&Value::from(11)));
    }

    #[test]
    fn reader_and_writer_cover_their_effects() {
        let mut store = Store::new();
        store.set_env("mode", Value::from("dev"));

        assert!(StdlibHandler::Reader.can_handle(&Effect::ask("mode")));
        assert!(!StdlibHandler::Reader.can_handle(&Effect::get("mode")));

        match StdlibHandler::Reader
            .handle(Effect::ask("mode"), callsite(), &mut store)
            .unwrap()
        {
            HandlerAction::Resume { value, .. } => assert_eq!(value, Value::from("dev")),
            other => panic!("unexpected action: {other:?}"),
        }

        StdlibHandler::Writer
            .handle(Effect::tell("hello"), callsite(), &mut store)
            .unwrap();
        assert_eq!(store.log(), &[Value::from("hello")]);
    }
}
