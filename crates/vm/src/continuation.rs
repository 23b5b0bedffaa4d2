//! One-shot continuations.
//!
//! A continuation is either *captured* from a running segment (an immutable
//! snapshot of its frames and scope) or *created* from a program plus a
//! handler list that has not started yet. Both shapes share this type;
//! `started` tells them apart.

use std::sync::Arc;

use crate::frame::Frame;
use crate::handler::Handler;
use crate::ids::{ContId, DispatchId, Marker};
use crate::coroutine::Program;
use crate::segment::Segment;

/// A capturable, one-shot continuation.
#[derive(Debug, Clone)]
pub struct Continuation {
    pub(crate) cont_id: ContId,
    pub(crate) frames_snapshot: Arc<Vec<Frame>>,
    pub(crate) scope_chain: Arc<Vec<Marker>>,
    pub(crate) marker: Marker,
    /// Set iff this is a callsite continuation captured by a dispatch.
    pub(crate) dispatch_id: Option<DispatchId>,
    pub(crate) started: bool,
    /// Program to start for created continuations; `None` once captured.
    pub(crate) program: Option<Program>,
    /// Handlers to install, outermost first, for created continuations.
    pub(crate) handlers: Vec<Handler>,
    /// Next-outer continuation link produced by delegation. Activating a
    /// continuation materializes its whole parent chain.
    pub(crate) parent: Option<Arc<Continuation>>,
}

impl Continuation {
    /// Captures a snapshot of `segment`.
    ///
    /// `dispatch_id` is `Some` exactly when this capture is the callsite
    /// continuation of a dispatch.
    pub(crate) fn capture(segment: &Segment, dispatch_id: Option<DispatchId>) -> Self {
        Self {
            cont_id: ContId::fresh(),
            frames_snapshot: Arc::new(segment.frames.clone()),
            scope_chain: Arc::new(segment.scope_chain.clone()),
            marker: segment.marker,
            dispatch_id,
            started: true,
            program: None,
            handlers: Vec::new(),
            parent: None,
        }
    }

    /// Creates an unstarted continuation from a program and the handlers to
    /// install around it, outermost first.
    pub fn create(program: Program, handlers: Vec<Handler>) -> Self {
        Self {
            cont_id: ContId::fresh(),
            frames_snapshot: Arc::new(Vec::new()),
            scope_chain: Arc::new(Vec::new()),
            marker: Marker::placeholder(),
            dispatch_id: None,
            started: false,
            program: Some(program),
            handlers,
            parent: None,
        }
    }

    /// One-shot identity of this continuation.
    pub fn cont_id(&self) -> ContId {
        self.cont_id
    }

    /// Returns `true` for captured continuations, `false` for created ones.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// The dispatch this continuation is the callsite of, if any.
    pub fn dispatch_id(&self) -> Option<DispatchId> {
        self.dispatch_id
    }

    /// The marker of the segment this snapshot was taken from.
    pub fn marker(&self) -> Marker {
        self.marker
    }

    /// Number of frames in the snapshot.
    pub fn snapshot_len(&self) -> usize {
        self.frames_snapshot.len()
    }

    /// Links this continuation to the continuation it delegated from.
    pub(crate) fn with_parent(mut self, parent: Continuation) -> Self {
        self.parent = Some(Arc::new(parent));
        self
    }

    /// Walks the parent chain starting from this continuation.
    pub(crate) fn chain(&self) -> Vec<&Continuation> {
        let mut links = vec![self];
        let mut cursor = self.parent.as_deref();
        while let Some(link) = cursor {
            links.push(link);
            cursor = link.parent.as_deref();
        }
        links
    }
}
