//! Opaque identifier types used throughout the VM.
//!
//! All identifiers are copy-cheap newtypes with identity equality. Fresh
//! values come from process-wide atomic counters, so they are unique across
//! every VM instance in the process.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Identity of an installed handler (a prompt).
///
/// Every `WithHandler` installation mints a fresh marker; segments carry the
/// markers of all handlers lexically in scope.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Marker(u64);

/// Index of a segment slot in the segment arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SegmentId(u32);

/// Identity of a captured or created continuation, used for one-shot
/// enforcement.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ContId(u64);

/// Identity of one in-flight effect dispatch.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DispatchId(u64);

/// Key of a one-shot native callback in the VM's callback slot map.
///
/// Frames store only the id so they stay cheaply cloneable; the callback
/// itself is consumed when the frame is popped.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CallbackId(u32);

/// Handle to a live coroutine instance inside the coroutine runtime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CoroutineId(u64);

/// Identity of a task spawned under the scheduler handler.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(u64);

/// Identity of a promise managed by the scheduler handler.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PromiseId(u64);

static MARKER_COUNTER: AtomicU64 = AtomicU64::new(1);
static CONT_COUNTER: AtomicU64 = AtomicU64::new(1);
static DISPATCH_COUNTER: AtomicU64 = AtomicU64::new(1);
static CALLBACK_COUNTER: AtomicU32 = AtomicU32::new(1);
static COROUTINE_COUNTER: AtomicU64 = AtomicU64::new(1);

impl Marker {
    /// Mints a fresh, process-unique marker.
    pub fn fresh() -> Self {
        Marker(MARKER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Reserved marker for continuations that have not started yet.
    ///
    /// Never returned by [`Marker::fresh`].
    pub fn placeholder() -> Self {
        Marker(0)
    }

    /// Returns `true` for the reserved placeholder marker.
    pub fn is_placeholder(self) -> bool {
        self.0 == 0
    }

    /// Raw counter value, for diagnostics.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

impl SegmentId {
    /// Builds a segment id from an arena slot index.
    pub fn from_index(index: usize) -> Self {
        SegmentId(index as u32)
    }

    /// The arena slot index this id refers to.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl ContId {
    /// Mints a fresh, process-unique continuation id.
    pub fn fresh() -> Self {
        ContId(CONT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw counter value, for diagnostics.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl DispatchId {
    /// Mints a fresh, process-unique dispatch id.
    pub fn fresh() -> Self {
        DispatchId(DISPATCH_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw counter value, for diagnostics.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl CallbackId {
    /// Mints a fresh, process-unique callback id.
    pub fn fresh() -> Self {
        CallbackId(CALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl CoroutineId {
    /// Mints a fresh, process-unique coroutine id.
    pub fn fresh() -> Self {
        CoroutineId(COROUTINE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw counter value, for diagnostics.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl TaskId {
    /// Builds a task id from a scheduler-local counter value.
    pub fn from_raw(value: u64) -> Self {
        TaskId(value)
    }

    /// Raw counter value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task{}", self.0)
    }
}

impl PromiseId {
    /// Builds a promise id from a scheduler-local counter value.
    pub fn from_raw(value: u64) -> Self {
        PromiseId(value)
    }

    /// Raw counter value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_markers_are_unique() {
        assert_ne!(Marker::fresh(), Marker::fresh());
    }

    #[test]
    fn placeholder_marker_is_never_minted() {
        let m = Marker::fresh();
        assert!(!m.is_placeholder());
        assert!(Marker::placeholder().is_placeholder());
    }

    #[test]
    fn fresh_cont_ids_are_unique() {
        assert_ne!(ContId::fresh(), ContId::fresh());
    }

    #[test]
    fn segment_id_round_trips_its_index() {
        assert_eq!(SegmentId::from_index(17).index(), 17);
    }

    #[test]
    fn task_and_promise_ids_compare_by_value() {
        assert_eq!(TaskId::from_raw(3), TaskId::from_raw(3));
        assert_eq!(PromiseId::from_raw(9), PromiseId::from_raw(9));
        assert_ne!(TaskId::from_raw(3), TaskId::from_raw(4));
    }
}
