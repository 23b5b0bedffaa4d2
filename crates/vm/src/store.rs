//! The native store backing the standard handlers.
//!
//! Three sections: mutable `state`, read-only-by-convention `env`, and an
//! append-only `log`. Maps keep insertion order so snapshots read back
//! deterministically.

use indexmap::IndexMap;

use crate::value::Value;

/// The native store (mutable state, environment, log).
#[derive(Debug, Clone, Default)]
pub struct Store {
    state: IndexMap<String, Value>,
    env: IndexMap<String, Value>,
    log: Vec<Value>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with initial state and environment.
    pub fn with_initial(
        state: IndexMap<String, Value>,
        env: IndexMap<String, Value>,
    ) -> Self {
        Self {
            state,
            env,
            log: Vec::new(),
        }
    }

    /// Reads a state entry.
    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Writes a state entry, returning the previous value if any.
    pub fn set_state(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.state.insert(key.into(), value)
    }

    /// Reads an environment entry.
    pub fn get_env(&self, key: &str) -> Option<&Value> {
        self.env.get(key)
    }

    /// Writes an environment entry.
    pub fn set_env(&mut self, key: impl Into<String>, value: Value) {
        self.env.insert(key.into(), value);
    }

    /// Appends a message to the log.
    pub fn append_log(&mut self, message: Value) {
        self.log.push(message);
    }

    /// The full state map.
    pub fn state(&self) -> &IndexMap<String, Value> {
        &self.state
    }

    /// The full environment map.
    pub fn env(&self) -> &IndexMap<String, Value> {
        &self.env
    }

    /// The log, in append order.
    pub fn log(&self) -> &[Value] {
        &self.log
    }

    /// Appends every log entry of `other` to this store's log.
    pub fn merge_logs_from(&mut self, other: &Store) {
        self.log.extend(other.log.iter().cloned());
    }
}
