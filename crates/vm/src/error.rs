//! Error types for the Effex VM.
//!
//! Two layers are kept strictly apart: [`Exception`] values travel through
//! the machine as catchable `Throw` payloads, while [`VmError`] is terminal
//! and ends the run.

use thiserror::Error;

use crate::value::Value;

/// Result alias used across the crate.
pub type VmResult<T> = Result<T, VmError>;

/// A catchable exception flowing through the machine in `Throw` mode.
///
/// Exceptions carry a kind string used the way exception classes are used in
/// the embedded language, a human-readable message, and an optional payload
/// value.
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    kind: String,
    message: String,
    payload: Option<Value>,
}

impl Exception {
    /// Builds an exception with an explicit kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            payload: None,
        }
    }

    /// Builds a plain runtime exception.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new("RuntimeError", message)
    }

    /// Builds a type error, e.g. for unclassifiable yields.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    /// Attaches a payload value.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The exception kind string.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The exception message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The attached payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Returns `true` when the exception kind matches `kind`.
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

impl From<VmError> for Exception {
    fn from(err: VmError) -> Self {
        Exception::runtime(err.to_string())
    }
}

impl std::fmt::Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Terminal VM errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    /// No visible handler can handle the dispatched effect.
    #[error("unhandled effect: {effect}")]
    UnhandledEffect { effect: String },

    /// A throw propagated past every frame and caller segment.
    #[error("uncaught exception: {exception}")]
    UncaughtException { exception: Exception },

    /// A one-shot continuation was activated a second time.
    #[error("continuation already resumed")]
    ContinuationAlreadyResumed,

    /// A continuation or dispatch primitive was used outside its contract.
    #[error("invalid continuation use: {reason}")]
    InvalidContinuationUse { reason: String },

    /// A value could not play the role the machine required of it.
    #[error("type error: {reason}")]
    Type { reason: String },

    /// The embedded runtime raised while executing a host call.
    #[error("host exception: {exception}")]
    Host { exception: Exception },

    /// The step budget configured in the limits was exhausted.
    #[error("step limit exceeded: {limit} steps")]
    StepLimitExceeded { limit: u64 },

    /// The dispatch stack grew past the configured depth.
    #[error("dispatch depth exceeded: {limit}")]
    DispatchDepthExceeded { limit: usize },

    /// The segment arena grew past the configured size.
    #[error("segment limit exceeded: {limit}")]
    SegmentLimitExceeded { limit: usize },

    /// An internal invariant was violated. Should not occur in correct code.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl VmError {
    /// Builds an [`VmError::UnhandledEffect`] from an effect description.
    pub fn unhandled_effect(effect: impl Into<String>) -> Self {
        VmError::UnhandledEffect {
            effect: effect.into(),
        }
    }

    /// Builds an [`VmError::UncaughtException`].
    pub fn uncaught(exception: Exception) -> Self {
        VmError::UncaughtException { exception }
    }

    /// Builds an [`VmError::InvalidContinuationUse`].
    pub fn invalid_continuation(reason: impl Into<String>) -> Self {
        VmError::InvalidContinuationUse {
            reason: reason.into(),
        }
    }

    /// Builds a [`VmError::Type`].
    pub fn type_error(reason: impl Into<String>) -> Self {
        VmError::Type {
            reason: reason.into(),
        }
    }

    /// Builds a [`VmError::Host`].
    pub fn host(exception: Exception) -> Self {
        VmError::Host { exception }
    }

    /// Builds an [`VmError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        VmError::Internal {
            message: message.into(),
        }
    }

    /// Returns the exception carried by uncaught/host errors, if any.
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            VmError::UncaughtException { exception } | VmError::Host { exception } => {
                Some(exception)
            }
            _ => None,
        }
    }
}
