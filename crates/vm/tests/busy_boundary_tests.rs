//! Top-only busy boundary behavior.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{int, perform, script, signal, step, ScriptStep};
use effex_vm::control::ControlPrimitive;
use effex_vm::coroutine::HostYield;
use effex_vm::handler::{Handler, HostHandler};
use effex_vm::runner::run;
use effex_vm::value::Value;

fn resume(k: effex_vm::Continuation, value: Value) -> ScriptStep {
    ScriptStep::Yield(HostYield::Control(ControlPrimitive::Resume { k, value }))
}

/// A handler busy with the top dispatch stays hidden for its own nested
/// effects, but handlers of *other* dispatches further down stay visible:
/// H1 (handling A) yields B; H0 (handling B) yields A again, which must
/// reach H1 instead of diverging or failing.
#[test]
fn nested_dispatch_sees_everything_but_the_top_busy_set() {
    let h1_calls = Arc::new(AtomicUsize::new(0));

    let h1 = {
        let calls = Arc::clone(&h1_calls);
        Handler::host_callable(HostHandler::for_effect("h1", "A", move |_, k| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                // First A: ask the outer world for B, add 100 to its answer.
                Ok(script(
                    "h1-first",
                    vec![
                        step(|_| perform(signal("B"))),
                        step({
                            let k = k.clone();
                            move |answers| resume(k.clone(), Value::from(int(answers, 0) + 100))
                        }),
                        step(|answers| ScriptStep::Return(answers[1].clone())),
                    ],
                ))
            } else {
                // Nested A from inside H0: answer directly.
                Ok(script(
                    "h1-nested",
                    vec![
                        step({
                            let k = k.clone();
                            move |_| resume(k.clone(), Value::from(7))
                        }),
                        step(|answers| ScriptStep::Return(answers[0].clone())),
                    ],
                ))
            }
        }))
    };

    let h0 = Handler::host_callable(HostHandler::for_effect("h0", "B", |_, k| {
        Ok(script(
            "h0-body",
            vec![
                // B's handler performs A itself; H1 must be visible because
                // it is busy only in the *A* dispatch below the top.
                step(|_| perform(signal("A"))),
                step({
                    let k = k.clone();
                    move |answers| resume(k.clone(), Value::from(int(answers, 0) + 1))
                }),
                step(|answers| ScriptStep::Return(answers[1].clone())),
            ],
        ))
    }));
    // user: a <- A(); return a
    let user = script(
        "user",
        vec![
            step(|_| perform(signal("A"))),
            step(|answers| ScriptStep::Return(answers[0].clone())),
        ],
    );

    let outcome = run(user, vec![h0, h1]);
    assert!(outcome.is_ok(), "unexpected error: {:?}", outcome.error());
    // nested A answers 7; H0 adds 1; H1 adds 100.
    assert_eq!(outcome.value(), Some(&Value::from(108)));
    assert_eq!(h1_calls.load(Ordering::SeqCst), 2);
}

/// The busy prefix of the top dispatch is really hidden: an effect the busy
/// handler itself would match falls through to an outer handler.
#[test]
fn busy_handler_is_hidden_from_its_own_nested_effects() {
    // Both handlers match E; the inner one performs E from inside its own
    // body, which must reach the outer one.
    let outer = Handler::host_callable(HostHandler::for_effect("outer", "E", |_, k| {
        Ok(script(
            "outer-body",
            vec![
                step({
                    let k = k.clone();
                    move |_| resume(k.clone(), Value::from(1000))
                }),
                step(|answers| ScriptStep::Return(answers[0].clone())),
            ],
        ))
    }));
    let inner = Handler::host_callable(HostHandler::for_effect("inner", "E", |_, k| {
        Ok(script(
            "inner-body",
            vec![
                step(|_| perform(signal("E"))),
                step({
                    let k = k.clone();
                    move |answers| resume(k.clone(), Value::from(int(answers, 0) + 1))
                }),
                step(|answers| ScriptStep::Return(answers[1].clone())),
            ],
        ))
    }));

    let user = script(
        "user",
        vec![
            step(|_| perform(signal("E"))),
            step(|answers| ScriptStep::Return(answers[0].clone())),
        ],
    );

    let outcome = run(user, vec![outer, inner]);
    assert!(outcome.is_ok(), "unexpected error: {:?}", outcome.error());
    assert_eq!(outcome.value(), Some(&Value::from(1001)));
}
