//! Per-dispatch bookkeeping.

use crate::continuation::Continuation;
use crate::effect::Effect;
use crate::ids::{DispatchId, Marker, SegmentId};

/// State of one in-progress effect dispatch.
///
/// Pushed when an effect enters the handler chain, marked `completed` when
/// its callsite continuation is answered or abandoned, and lazily popped
/// from the top of the dispatch stack.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// Identity of this dispatch.
    pub dispatch_id: DispatchId,
    /// The effect being dispatched; replaced when a handler forwards a
    /// substituted effect.
    pub effect: Effect,
    /// The handler markers visible at the callsite, innermost first.
    pub handler_chain: Vec<Marker>,
    /// Index into `handler_chain` of the handler currently responsible.
    /// Everything up to and including it is busy for nested dispatches.
    pub handler_idx: usize,
    /// The callsite continuation. After a delegation this is the inner
    /// handler's continuation, with the original callsite as its parent.
    pub k_user: Continuation,
    /// Prompt segment of the handler that roots this dispatch.
    pub prompt_seg_id: SegmentId,
    /// Whether the callsite has been answered or abandoned.
    pub completed: bool,
    /// Set once a handler forwarded this dispatch with `Pass`: the next
    /// handler return is terminal for the whole dispatch.
    pub pass_through: bool,
}

impl DispatchContext {
    /// The busy prefix of the handler chain: markers hidden from dispatches
    /// that originate inside the currently running handler.
    pub fn busy_markers(&self) -> &[Marker] {
        &self.handler_chain[..=self.handler_idx]
    }
}
