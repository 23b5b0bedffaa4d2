//! Optional dispatch tracing.
//!
//! When enabled, the machine records the lifecycle of every dispatch:
//! starts, forwards, handler completions, and continuation activations.
//! The trace is purely observational; no execution decision reads it.

use crate::ids::DispatchId;

/// What a handler ultimately did with its dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Resumed the callsite continuation.
    Resumed,
    /// Transferred into a continuation.
    Transferred,
    /// Returned a value in place of the callsite.
    Returned,
    /// Raised out of the handler.
    Threw,
}

/// One recorded trace event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A dispatch entered the handler chain.
    DispatchStarted {
        dispatch_id: DispatchId,
        effect: String,
        handler: String,
        handler_idx: usize,
    },
    /// A handler forwarded the dispatch with `Delegate`.
    Delegated {
        dispatch_id: DispatchId,
        from_idx: usize,
        to_idx: usize,
        to_handler: String,
    },
    /// A handler forwarded the dispatch with `Pass`.
    Passed {
        dispatch_id: DispatchId,
        from_idx: usize,
        to_idx: usize,
        to_handler: String,
    },
    /// A handler finished its part of a dispatch.
    HandlerCompleted {
        dispatch_id: DispatchId,
        outcome: HandlerOutcome,
    },
    /// A continuation was resumed or transferred into.
    ContinuationActivated {
        cont_id: u64,
        tail: bool,
    },
}

/// Recorder for [`TraceEvent`]s.
#[derive(Debug, Default)]
pub struct DispatchTrace {
    enabled: bool,
    events: Vec<TraceEvent>,
}

impl DispatchTrace {
    /// Creates a recorder; disabled recorders drop every event.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            events: Vec::new(),
        }
    }

    /// Whether events are being kept.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records `event` when enabled.
    pub fn record(&mut self, event: TraceEvent) {
        if self.enabled {
            self.events.push(event);
        }
    }

    /// Every event recorded so far, in order.
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_traces_drop_events() {
        let mut trace = DispatchTrace::new(false);
        trace.record(TraceEvent::ContinuationActivated {
            cont_id: 1,
            tail: false,
        });
        assert!(trace.events().is_empty());
    }

    #[test]
    fn enabled_traces_keep_order() {
        let mut trace = DispatchTrace::new(true);
        trace.record(TraceEvent::ContinuationActivated {
            cont_id: 1,
            tail: false,
        });
        trace.record(TraceEvent::ContinuationActivated {
            cont_id: 2,
            tail: true,
        });
        assert_eq!(trace.events().len(), 2);
    }
}
