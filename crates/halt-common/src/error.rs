//! Unified error types for the halt workspace.
//!
//! Every variant maps onto one of four caller-visible kinds through
//! [`HaltError::kind`]. Internal detail stays in the message and the
//! source chain; callers branch on the kind.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Caller-visible classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request conflicts with the current state of the container.
    Conflict,
    /// The container, task, or process does not exist.
    NotFound,
    /// The request carried an unusable parameter.
    InvalidParameter,
    /// An internal or system-level operation failed.
    System,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict => write!(f, "conflict"),
            Self::NotFound => write!(f, "not found"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum HaltError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The operation conflicts with the container's current state.
    #[error("{message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// The container has no running task.
    #[error("container {id} is not running")]
    NotRunning {
        /// Container identifier.
        id: String,
    },

    /// A parameter could not be parsed or is unsupported on this platform.
    #[error("invalid parameter: {message}")]
    InvalidParameter {
        /// Description of the rejected parameter.
        message: String,
    },

    /// The process targeted by a signal no longer exists.
    #[error("cannot kill process (pid={pid}) with signal {signal}: no such process")]
    NoSuchProcess {
        /// Process id the signal was addressed to.
        pid: u32,
        /// Numeric signal value.
        signal: i32,
    },

    /// A kill was delivered but the container never reported an exit.
    #[error("tried to kill container {id}, but did not receive an exit event")]
    NoExitEvent {
        /// Container identifier.
        id: String,
    },

    /// An unbounded wait was interrupted by the caller.
    #[error("{operation} was cancelled")]
    Cancelled {
        /// Operation that was interrupted.
        operation: String,
    },

    /// A system-level operation failed.
    #[error("{message}")]
    System {
        /// Description including context.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<Box<HaltError>>,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl HaltError {
    /// Returns the caller-visible kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } | Self::NotRunning { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } | Self::NoSuchProcess { .. } => ErrorKind::NotFound,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::NotFound
            }
            Self::Io { .. }
            | Self::Config { .. }
            | Self::NoExitEvent { .. }
            | Self::Cancelled { .. }
            | Self::System { .. }
            | Self::Serialization { .. } => ErrorKind::System,
        }
    }

    /// Returns `true` when the error reports an absent resource.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates an invalid-parameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Creates a container not-found error.
    pub fn container_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "container",
            id: id.into(),
        }
    }

    /// Wraps `source` as a system error, prefixing `context`.
    pub fn system(context: impl fmt::Display, source: Self) -> Self {
        Self::System {
            message: format!("{context}: {source}"),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a system error without an underlying cause.
    pub fn system_msg(message: impl Into<String>) -> Self {
        Self::System {
            message: message.into(),
            source: None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HaltError>;
