//! Continuation frames.
//!
//! A frame is one pending "rest of the work" entry on a segment. Frames are
//! cheap to clone so segment snapshots can be captured; the underlying
//! callback or coroutine is consumed only when the frame is popped and
//! executed.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::handler::HandlerProgram;
use crate::ids::{CallbackId, CoroutineId};

/// Shared, lockable reference to a native handler program instance.
pub type SharedHandlerProgram = Arc<Mutex<Box<dyn HandlerProgram>>>;

/// One entry on a segment's frame stack.
#[derive(Clone)]
pub enum Frame {
    /// A one-shot native callback stored in the VM's callback slot map.
    /// Consumed on execution; a throw pops it without running it.
    NativeReturn { callback: CallbackId },

    /// A generator-like native handler program. Re-pushed after every yield
    /// it makes, dropped on return or throw.
    NativeHandlerProgram { program: SharedHandlerProgram },

    /// A coroutine of the embedded language. `started` records whether its
    /// first step has been taken, which selects between a plain next and a
    /// send when the frame is popped.
    HostCoroutine { handle: CoroutineId, started: bool },
}

impl Frame {
    /// Builds a native-return frame for a stored callback.
    pub fn native_return(callback: CallbackId) -> Self {
        Frame::NativeReturn { callback }
    }

    /// Builds a handler-program frame.
    pub fn handler_program(program: SharedHandlerProgram) -> Self {
        Frame::NativeHandlerProgram { program }
    }

    /// Builds a coroutine frame that has not been started.
    pub fn coroutine(handle: CoroutineId) -> Self {
        Frame::HostCoroutine {
            handle,
            started: false,
        }
    }

    /// Builds a coroutine frame that has already yielded at least once.
    pub fn started_coroutine(handle: CoroutineId) -> Self {
        Frame::HostCoroutine {
            handle,
            started: true,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::NativeReturn { callback } => {
                f.debug_struct("NativeReturn").field("callback", callback).finish()
            }
            Frame::NativeHandlerProgram { .. } => f.write_str("NativeHandlerProgram"),
            Frame::HostCoroutine { handle, started } => f
                .debug_struct("HostCoroutine")
                .field("handle", handle)
                .field("started", started)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coroutine_frames_record_their_start_state() {
        let id = CoroutineId::fresh();
        assert!(matches!(
            Frame::coroutine(id),
            Frame::HostCoroutine { started: false, .. }
        ));
        assert!(matches!(
            Frame::started_coroutine(id),
            Frame::HostCoroutine { started: true, .. }
        ));
    }

    #[test]
    fn clones_share_the_coroutine_handle() {
        let id = CoroutineId::fresh();
        let frame = Frame::coroutine(id);
        let copy = frame.clone();
        match (frame, copy) {
            (
                Frame::HostCoroutine { handle: a, .. },
                Frame::HostCoroutine { handle: b, .. },
            ) => assert_eq!(a, b),
            _ => unreachable!(),
        }
    }
}
