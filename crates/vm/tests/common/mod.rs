//! Shared helpers for the integration tests.
//!
//! `script` builds a program from a list of steps; each step sees the
//! answers to every previous yield, so test programs read top to bottom the
//! way the generator they stand in for would.

#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;

use effex_vm::coroutine::{CoStep, CoroutineInput, FnCoroutine, HostYield, Program};
use effex_vm::effect::Effect;
use effex_vm::error::Exception;
use effex_vm::value::{HostObject, Value};

/// What one script step does.
pub enum ScriptStep {
    /// Yield this; the answer is appended to the answer list.
    Yield(HostYield),
    /// Finish the program with this value.
    Return(Value),
    /// Raise out of the program.
    Throw(Exception),
}

type StepFn = Box<dyn Fn(&[Value]) -> ScriptStep + Send + Sync>;

/// Boxes a step closure.
pub fn step<F>(f: F) -> StepFn
where
    F: Fn(&[Value]) -> ScriptStep + Send + Sync + 'static,
{
    Box::new(f)
}

/// Builds a program that walks `steps` in order, feeding each one the
/// answers received so far. Exceptions thrown at a yield propagate out.
pub fn script(name: &str, steps: Vec<StepFn>) -> Program {
    let steps = Arc::new(steps);
    Program::from_fn(name.to_string(), move || {
        let steps = Arc::clone(&steps);
        let mut idx = 0usize;
        let mut answers: Vec<Value> = Vec::new();
        Box::new(FnCoroutine::new(move |input| {
            match input {
                CoroutineInput::Start => {}
                CoroutineInput::Value(value) => answers.push(value),
                CoroutineInput::Throw(error) => return CoStep::Throw(error),
            }
            match steps.get(idx) {
                Some(step) => {
                    idx += 1;
                    match step(&answers) {
                        ScriptStep::Yield(yielded) => CoStep::Yield(yielded),
                        ScriptStep::Return(value) => CoStep::Return(value),
                        ScriptStep::Throw(error) => CoStep::Throw(error),
                    }
                }
                None => CoStep::Return(answers.pop().unwrap_or(Value::Unit)),
            }
        }))
    })
}

/// A named user-defined effect payload.
#[derive(Debug)]
pub struct Signal(pub &'static str);

impl HostObject for Signal {
    fn type_name(&self) -> &str {
        self.0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builds a user-defined effect with the given type name.
pub fn signal(name: &'static str) -> Effect {
    Effect::host(Arc::new(Signal(name)))
}

/// Shorthand for yielding an effect from a script step.
pub fn perform(effect: Effect) -> ScriptStep {
    ScriptStep::Yield(HostYield::Effect(effect))
}

/// The last answer as an integer.
pub fn int(answers: &[Value], idx: usize) -> i64 {
    answers[idx].as_int().expect("answer should be an int")
}
