//! Integration tests for dispatch: delegation, pass-through, handler
//! returns, and the introspection primitives.

mod common;

use common::{int, perform, script, signal, step, ScriptStep};
use effex_vm::control::ControlPrimitive;
use effex_vm::coroutine::HostYield;
use effex_vm::handler::{Handler, HostHandler};
use effex_vm::runner::run;
use effex_vm::stdlib::{reader_handler, state_handler};
use effex_vm::value::Value;

fn resume(k: effex_vm::Continuation, value: Value) -> ScriptStep {
    ScriptStep::Yield(HostYield::Control(ControlPrimitive::Resume { k, value }))
}

/// Outer handler of the delegation chain: answers the callsite with 10 and
/// adds 5 to whatever flows back.
fn outer_plus_five() -> Handler {
    Handler::host_callable(HostHandler::for_effect("outer", "E", |_, k| {
        Ok(script(
            "outer-body",
            vec![
                step(move |_| resume(k.clone(), Value::from(10))),
                step(|answers| ScriptStep::Return(Value::from(5 + int(answers, 0)))),
            ],
        ))
    }))
}

/// Inner handler: delegates outward and adds 1 to the outer answer.
fn inner_plus_one() -> Handler {
    Handler::host_callable(HostHandler::for_effect("inner", "E", |_, _k| {
        Ok(script(
            "inner-body",
            vec![
                step(|_| {
                    ScriptStep::Yield(HostYield::Control(ControlPrimitive::Delegate {
                        effect: None,
                    }))
                }),
                step(|answers| ScriptStep::Return(Value::from(1 + int(answers, 0)))),
            ],
        ))
    }))
}

#[test]
fn delegate_chain_transforms_in_both_directions() {
    // user:  r <- E(); return r
    // expect user sees 10, inner sees 10 -> 11, outer sees 11 -> 16.
    let user = script(
        "user",
        vec![
            step(|_| perform(signal("E"))),
            step(|answers| ScriptStep::Return(answers[0].clone())),
        ],
    );

    let outcome = run(user, vec![outer_plus_five(), inner_plus_one()]);
    assert!(outcome.is_ok(), "unexpected error: {:?}", outcome.error());
    assert_eq!(outcome.value(), Some(&Value::from(16)));
}

#[test]
fn delegate_can_substitute_the_effect() {
    // inner turns E into F; outer only knows F.
    let outer = Handler::host_callable(HostHandler::for_effect("outer-f", "F", |_, k| {
        Ok(script(
            "outer-f-body",
            vec![
                step(move |_| resume(k.clone(), Value::from(1))),
                step(|answers| ScriptStep::Return(answers[0].clone())),
            ],
        ))
    }));
    let inner = Handler::host_callable(HostHandler::for_effect("inner-e", "E", |_, _k| {
        Ok(script(
            "inner-e-body",
            vec![
                step(|_| {
                    ScriptStep::Yield(HostYield::Control(ControlPrimitive::Delegate {
                        effect: Some(signal("F")),
                    }))
                }),
                step(|answers| ScriptStep::Return(Value::from(int(answers, 0) + 41))),
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
    // user got 1, inner's yield answered with user's return 1 -> 42.
    assert_eq!(outcome.value(), Some(&Value::from(42)));
}

#[test]
fn pass_routes_the_outer_answer_straight_to_the_callsite() {
    let outer = Handler::host_callable(HostHandler::for_effect("outer", "E", |_, k| {
        Ok(script(
            "outer-body",
            vec![
                step(move |_| resume(k.clone(), Value::from(10))),
                step(|answers| ScriptStep::Return(Value::from(5 + int(answers, 0)))),
            ],
        ))
    }));
    let inner = Handler::host_callable(HostHandler::for_effect("inner", "E", |_, _k| {
        Ok(script(
            "inner-pass",
            vec![step(|_| {
                ScriptStep::Yield(HostYield::Control(ControlPrimitive::Pass { effect: None }))
            })],
        ))
    }));

    // user: r <- E(); return r * 2
    let user = script(
        "user",
        vec![
            step(|_| perform(signal("E"))),
            step(|answers| ScriptStep::Return(Value::from(int(answers, 0) * 2))),
        ],
    );

    let outcome = run(user, vec![outer, inner]);
    // user sees 10, returns 20; outer adds 5; inner is transparent.
    assert_eq!(outcome.value(), Some(&Value::from(25)));
}

#[test]
fn handler_return_abandons_the_callsite() {
    let handler = Handler::host_callable(HostHandler::for_effect("absorb", "E", |_, _k| {
        Ok(script(
            "absorb-body",
            vec![step(|_| ScriptStep::Return(Value::from(99)))],
        ))
    }));

    let user = script(
        "user",
        vec![
            step(|_| perform(signal("E"))),
            // Never reached: the handler returned instead of resuming.
            step(|_| ScriptStep::Return(Value::from(-1))),
        ],
    );

    let outcome = run(user, vec![handler]);
    assert_eq!(outcome.value(), Some(&Value::from(99)));
}

#[test]
fn get_continuation_answers_the_callsite_without_consuming_it() {
    let handler = Handler::host_callable(HostHandler::for_effect("reflect", "E", |_, _k| {
        Ok(script(
            "reflect-body",
            vec![
                step(|_| ScriptStep::Yield(HostYield::Control(ControlPrimitive::GetContinuation))),
                step(|answers| {
                    let k = answers[0]
                        .as_continuation()
                        .expect("GetContinuation answers a continuation")
                        .clone();
                    resume(k, Value::from(5))
                }),
                step(|answers| ScriptStep::Return(answers[1].clone())),
            ],
        ))
    }));

    let user = script(
        "user",
        vec![
            step(|_| perform(signal("E"))),
            step(|answers| ScriptStep::Return(Value::from(int(answers, 0) * 3))),
        ],
    );

    let outcome = run(user, vec![handler]);
    assert_eq!(outcome.value(), Some(&Value::from(15)));
}

#[test]
fn get_handlers_sees_the_whole_visible_chain() {
    let handler = Handler::host_callable(HostHandler::for_effect("count", "E", |_, k| {
        Ok(script(
            "count-body",
            vec![
                step(|_| ScriptStep::Yield(HostYield::Control(ControlPrimitive::GetHandlers))),
                step(move |answers| {
                    let count = answers[0]
                        .as_handlers()
                        .expect("GetHandlers answers a handler list")
                        .len() as i64;
                    resume(k.clone(), Value::from(count))
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

    // state + reader + the counting handler itself.
    let outcome = run(user, vec![state_handler(), reader_handler(), handler]);
    assert_eq!(outcome.value(), Some(&Value::from(3)));
}

#[test]
fn with_handler_scopes_a_handler_to_a_sub_program() {
    let ping_handler = Handler::host_callable(HostHandler::for_effect("ping", "Ping", |_, k| {
        Ok(script(
            "ping-body",
            vec![step(move |_| resume(k.clone(), Value::from(7)))],
        ))
    }));

    let sub = script(
        "sub",
        vec![
            step(|_| perform(signal("Ping"))),
            step(|answers| ScriptStep::Return(Value::from(int(answers, 0) + 1))),
        ],
    );

    let user = script(
        "user",
        vec![
            step(move |_| {
                ScriptStep::Yield(HostYield::Control(ControlPrimitive::WithHandler {
                    handler: ping_handler.clone(),
                    program: sub.clone(),
                }))
            }),
            step(|answers| ScriptStep::Return(Value::from(int(answers, 0) * 2))),
        ],
    );

    // No Ping handler outside the WithHandler scope.
    let outcome = run(user, vec![]);
    assert_eq!(outcome.value(), Some(&Value::from(16)));
}

#[test]
fn sub_programs_run_in_place() {
    let sub = script(
        "sub",
        vec![
            step(|_| perform(effex_vm::effect::Effect::get("n"))),
            step(|answers| ScriptStep::Return(Value::from(int(answers, 0) + 1))),
        ],
    );

    let user = script(
        "user",
        vec![
            step(move |_| ScriptStep::Yield(HostYield::Program(sub.clone()))),
            step(|answers| ScriptStep::Return(Value::from(int(answers, 0) * 10))),
        ],
    );

    let outcome = effex_vm::runner::run_with(
        user,
        vec![state_handler()],
        effex_vm::runner::RunConfig::default().with_state("n", 4),
    );
    assert_eq!(outcome.value(), Some(&Value::from(50)));
}
