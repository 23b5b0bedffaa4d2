//! The driver loop.
//!
//! The driver owns the machine and the coroutine runtime and shuttles
//! between them: it steps the machine lock-free until a host call is
//! needed, executes the call with the host lock held, and feeds the result
//! back. `run_async` is the same loop yielding to the executor between
//! events.

use parking_lot::Mutex;

use crate::error::VmError;
use crate::host::CoroutineRuntime;
use crate::step::StepEvent;
use crate::value::Value;
use crate::vm::Vm;

/// Drives a [`Vm`] to a terminal event.
pub struct Driver {
    vm: Vm,
    /// The host lock. Held exactly for the duration of each host call,
    /// including classification of whatever the call yielded.
    runtime: Mutex<CoroutineRuntime>,
}

impl Driver {
    /// Wraps a machine with a fresh coroutine runtime.
    pub fn new(vm: Vm) -> Self {
        Self {
            vm,
            runtime: Mutex::new(CoroutineRuntime::new()),
        }
    }

    /// The wrapped machine.
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Consumes the driver, returning the machine for result extraction.
    pub fn into_vm(self) -> Vm {
        self.vm
    }

    /// Runs until `Done` or `Error`, starting from `initial`.
    pub fn run(&mut self, initial: StepEvent) -> Result<Value, VmError> {
        let mut event = initial;
        loop {
            match self.advance(event) {
                Ok(next) => event = next,
                Err(outcome) => return outcome,
            }
        }
    }

    /// Async variant of [`Driver::run`], yielding to the executor between
    /// events so other tasks (including external promise completers) get a
    /// chance to run.
    pub async fn run_async(&mut self, initial: StepEvent) -> Result<Value, VmError> {
        let mut event = initial;
        loop {
            match self.advance(event) {
                Ok(next) => event = next,
                Err(outcome) => return outcome,
            }
            tokio::task::yield_now().await;
        }
    }

    /// Processes one event; `Err` carries the terminal outcome.
    #[allow(clippy::result_large_err)]
    fn advance(&mut self, event: StepEvent) -> Result<StepEvent, Result<Value, VmError>> {
        match event {
            StepEvent::Continue => Ok(self.vm.step()),
            StepEvent::NeedsHostCall(call) => {
                let result = {
                    let mut runtime = self.runtime.lock();
                    runtime.execute(call)
                };
                match self.vm.receive_host_result(result) {
                    Ok(next) => Ok(next),
                    Err(err) => {
                        self.vm.finalize_dispatches();
                        Ok(StepEvent::Error(err))
                    }
                }
            }
            StepEvent::Done(value) => Err(Ok(value)),
            StepEvent::Error(err) => Err(Err(err)),
        }
    }
}
