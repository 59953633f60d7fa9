//! Error types for hub switchover
//!
//! Errors are structured with fields to aid debugging during a switchover.
//! Every variant maps onto one of four handling categories ([`ErrorKind`]):
//! transient faults are retried inside the client, everything else aborts
//! the current phase immediately.

use std::path::PathBuf;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Handling category for an error
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Retryable infrastructure fault (timeouts, resets, 5xx, rate limiting)
    Transient,
    /// Non-recoverable failure (missing resource, authorization denial)
    Fatal,
    /// Operator input or environment failed a precondition
    Validation,
    /// The durable switchover record could not be parsed
    StateCorruption,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
            Self::Validation => write!(f, "validation"),
            Self::StateCorruption => write!(f, "state-corruption"),
        }
    }
}

/// Main error type for switchover operations
#[derive(Debug, Error)]
pub enum Error {
    /// A retryable call kept failing until the retry budget ran out
    #[error("transient failure in {operation} after {attempts} attempt(s): {message}")]
    Transient {
        /// Operation that failed (e.g. "patch backupschedules/acm-schedule")
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// Last underlying error
        message: String,
    },

    /// Non-recoverable failure
    #[error("fatal error [{context}]: {message}")]
    Fatal {
        /// Cluster context or component where the error occurred
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Precondition or configuration failure detected before mutating anything
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The offending field or flag, if known
        field: Option<String>,
    },

    /// Durable record failed to parse
    #[error("switchover record {} is corrupt: {message}", .path.display())]
    StateCorruption {
        /// Path of the unreadable record
        path: PathBuf,
        /// Parser error
        message: String,
    },

    /// Local filesystem error
    #[error("io error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being processed (if known)
        kind: Option<String>,
    },

    /// A phase handler failed
    #[error("phase {phase} failed{}: {source}", .step.as_ref().map(|s| format!(" at step {s}")).unwrap_or_default())]
    Phase {
        /// Phase that failed
        phase: String,
        /// Step that was in progress, if any
        step: Option<String>,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a transient error after retries were exhausted
    pub fn transient(operation: impl Into<String>, attempts: u32, msg: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            attempts,
            message: msg.into(),
        }
    }

    /// Create a fatal error without specific context
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal {
            context: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a fatal error with context
    pub fn fatal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fatal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field or flag
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a state corruption error
    pub fn state_corruption(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::StateCorruption {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Wrap an io error with the path being accessed
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Attach phase and step context to a handler error
    pub fn in_phase(self, phase: impl Into<String>, step: Option<String>) -> Self {
        Self::Phase {
            phase: phase.into(),
            step,
            source: Box::new(self),
        }
    }

    /// Handling category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transient { .. } => ErrorKind::Transient,
            Error::Fatal { .. } => ErrorKind::Fatal,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::StateCorruption { .. } => ErrorKind::StateCorruption,
            Error::Io { .. } => ErrorKind::Fatal,
            Error::Serialization { .. } => ErrorKind::Fatal,
            Error::Phase { source, .. } => source.kind(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Only transient infrastructure faults are. The client has already spent
    /// its retry budget by the time one surfaces, so callers above the client
    /// use this for reporting rather than for another retry loop.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Get the phase and step if this error came out of a phase handler
    pub fn phase_context(&self) -> Option<(&str, Option<&str>)> {
        match self {
            Error::Phase { phase, step, .. } => Some((phase, step.as_deref())),
            _ => None,
        }
    }
}
