//! Delimited continuation segments.
//!
//! A segment is one delimited stretch of the continuation: a mutable frame
//! stack, the marker of the handler scope it belongs to, an optional caller
//! segment to return to, and the innermost-first chain of handler markers
//! lexically visible inside it.

use crate::frame::Frame;
use crate::ids::{Marker, SegmentId};

/// What kind of boundary a segment represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// An ordinary execution segment.
    Normal,
    /// The prompt installed for one handler; capture stops here.
    PromptBoundary { handled_marker: Marker },
}

/// A delimited continuation frame stack.
#[derive(Debug, Clone)]
pub struct Segment {
    /// The handler scope this segment executes under.
    pub marker: Marker,
    /// Pending frames; the top is the last element.
    pub frames: Vec<Frame>,
    /// The segment a `Return` hands its value to.
    pub caller: Option<SegmentId>,
    /// Innermost-first markers of every handler in lexical scope here.
    pub scope_chain: Vec<Marker>,
    /// Boundary classification.
    pub kind: SegmentKind,
}

impl Segment {
    /// Creates an ordinary segment.
    pub fn new(marker: Marker, caller: Option<SegmentId>, scope_chain: Vec<Marker>) -> Self {
        Self {
            marker,
            frames: Vec::new(),
            caller,
            scope_chain,
            kind: SegmentKind::Normal,
        }
    }

    /// Creates a prompt-boundary segment delimiting `handled_marker`.
    pub fn prompt(
        handled_marker: Marker,
        caller: Option<SegmentId>,
        scope_chain: Vec<Marker>,
    ) -> Self {
        Self {
            marker: handled_marker,
            frames: Vec::new(),
            caller,
            scope_chain,
            kind: SegmentKind::PromptBoundary { handled_marker },
        }
    }

    /// The empty sentinel stored in freed arena slots.
    pub(crate) fn tombstone() -> Self {
        Self::new(Marker::placeholder(), None, Vec::new())
    }

    /// Pushes a frame on top of the stack.
    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Pops the top frame.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Number of pending frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` when no frames are pending.
    pub fn is_exhausted(&self) -> bool {
        self.frames.is_empty()
    }

    /// Returns `true` for prompt-boundary segments.
    pub fn is_prompt_boundary(&self) -> bool {
        matches!(self.kind, SegmentKind::PromptBoundary { .. })
    }

    /// The marker delimited by this prompt, if it is one.
    pub fn handled_marker(&self) -> Option<Marker> {
        match self.kind {
            SegmentKind::PromptBoundary { handled_marker } => Some(handled_marker),
            SegmentKind::Normal => None,
        }
    }
}
