//! Top-level error taxonomy
//!
//! Every capability and component surfaces failures through [`ErrorKind`],
//! orthogonal to which handler or capability produced them. This replaces
//! the teacher's split between `ActivityError`/`WorkflowError` with a single
//! kind enum threaded through [`CapabilityError`].

use serde::{Deserialize, Serialize};

/// Classification of a failure, independent of which component raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient failure; the same call may succeed later (network blip,
    /// rate limit, lock contention). Goes through the retry policy.
    Transient,

    /// Permanent failure; retrying will not help (invalid input, malformed
    /// payload). Fails the step immediately.
    Permanent,

    /// The capability backing this call is intentionally disabled/unconfigured
    /// (e.g. no GitHub token configured). Not a bug; callers should treat this
    /// as a no-op success where the spec allows, or a skip.
    DependencyDisabled,

    /// The engine's own infrastructure (state store, queue) is unreachable.
    /// Propagates out of the worker loop and exits the process non-zero so
    /// that supervision restarts it.
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::DependencyDisabled => write!(f, "dependency_disabled"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Error returned by capability interfaces and ambient engine components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CapabilityError {
    pub kind: ErrorKind,
    pub message: String,
    pub code: Option<String>,
}

impl CapabilityError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
            code: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
            code: None,
        }
    }

    pub fn dependency_disabled(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::DependencyDisabled,
            message: message.into(),
            code: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Whether the worker loop should route this through the retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient)
    }
}

impl From<crate::persistence::StoreError> for CapabilityError {
    fn from(err: crate::persistence::StoreError) -> Self {
        Self::fatal(err.to_string())
    }
}

/// Lets handlers call `?` directly on a breaker-wrapped capability call: a
/// rejected (open-circuit) call is transient — the breaker will let calls
/// back through once its recovery timeout elapses, so the retry policy
/// should keep trying rather than failing the step outright.
impl From<crate::reliability::CallError<CapabilityError>> for CapabilityError {
    fn from(err: crate::reliability::CallError<CapabilityError>) -> Self {
        match err {
            crate::reliability::CallError::Open(_) => Self::transient("circuit breaker is open"),
            crate::reliability::CallError::Inner(inner) => inner,
        }
    }
}
