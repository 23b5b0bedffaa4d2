//! User-facing entry points.
//!
//! [`run`] executes a program synchronously to a [`RunResult`];
//! [`async_run`] does the same while yielding to the async executor between
//! machine events. No handlers are installed by default.

use indexmap::IndexMap;

use crate::coroutine::Program;
use crate::driver::Driver;
use crate::error::VmError;
use crate::handler::Handler;
use crate::limits::VmLimits;
use crate::store::Store;
use crate::trace::TraceEvent;
use crate::value::Value;
use crate::vm::Vm;

/// Configuration for one run.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Initial contents of the state map.
    pub store: IndexMap<String, Value>,
    /// Initial contents of the environment map.
    pub env: IndexMap<String, Value>,
    /// Execution limits.
    pub limits: VmLimits,
    /// Record dispatch trace events.
    pub trace: bool,
}

impl RunConfig {
    /// Seeds one state entry.
    pub fn with_state(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.store.insert(key.into(), value.into());
        self
    }

    /// Seeds one environment entry.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a run: the terminal result plus a snapshot of the store.
#[derive(Debug)]
pub struct RunResult {
    result: Result<Value, VmError>,
    store: Store,
    trace: Vec<TraceEvent>,
}

impl RunResult {
    fn from_vm(result: Result<Value, VmError>, vm: &Vm) -> Self {
        Self {
            result,
            store: vm.store().clone(),
            trace: vm.trace().events().to_vec(),
        }
    }

    /// The terminal result.
    pub fn result(&self) -> &Result<Value, VmError> {
        &self.result
    }

    /// The returned value, when the run succeeded.
    pub fn value(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }

    /// The terminal error, when the run failed.
    pub fn error(&self) -> Option<&VmError> {
        self.result.as_ref().err()
    }

    /// Returns `true` when the run succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns `true` when the run failed.
    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }

    /// The state map at termination. Reflects the state at failure too.
    pub fn raw_store(&self) -> &IndexMap<String, Value> {
        self.store.state()
    }

    /// The log at termination.
    pub fn log(&self) -> &[Value] {
        self.store.log()
    }

    /// The whole store snapshot.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Recorded trace events, when tracing was enabled.
    pub fn trace_events(&self) -> &[TraceEvent] {
        &self.trace
    }

    /// Unwraps into the terminal result, dropping the snapshots.
    pub fn into_result(self) -> Result<Value, VmError> {
        self.result
    }
}

/// Runs `program` under `handlers` (outermost first) with defaults.
pub fn run(program: Program, handlers: Vec<Handler>) -> RunResult {
    run_with(program, handlers, RunConfig::default())
}

/// Runs `program` under `handlers` (outermost first) with `config`.
pub fn run_with(program: Program, handlers: Vec<Handler>, config: RunConfig) -> RunResult {
    let mut vm = new_vm(config);
    match vm.bootstrap(program, handlers) {
        Ok(initial) => {
            let mut driver = Driver::new(vm);
            let result = driver.run(initial);
            RunResult::from_vm(result, driver.vm())
        }
        Err(err) => RunResult::from_vm(Err(err), &vm),
    }
}

/// Async variant of [`run`].
pub async fn async_run(program: Program, handlers: Vec<Handler>) -> RunResult {
    async_run_with(program, handlers, RunConfig::default()).await
}

/// Async variant of [`run_with`].
pub async fn async_run_with(
    program: Program,
    handlers: Vec<Handler>,
    config: RunConfig,
) -> RunResult {
    let mut vm = new_vm(config);
    match vm.bootstrap(program, handlers) {
        Ok(initial) => {
            let mut driver = Driver::new(vm);
            let result = driver.run_async(initial).await;
            RunResult::from_vm(result, driver.vm())
        }
        Err(err) => RunResult::from_vm(Err(err), &vm),
    }
}

fn new_vm(config: RunConfig) -> Vm {
    let store = Store::with_initial(config.store, config.env);
    Vm::new(store, config.limits, config.trace)
}
