//! Error types for the avpipe buffer engine.
//!
//! Every fallible operation in the workspace returns [`Error`]. Clients that
//! only need to branch on the class of a failure (for example inside a
//! callback) use the flat [`ErrorKind`] obtained through [`Error::kind`].

use thiserror::Error;

/// Main error type for buffer pools, worker tasks and codec pipelines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed argument: bad index, wrong owner on release, bad format value.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Operation is illegal in the current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation is well-formed but not allowed on this object right now.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Allocation failed (pool growth, thread spawn, engine session).
    #[error("Out of memory: {0}")]
    NoMemory(String),

    /// Engine needs more input before it can make progress.
    #[error("Not enough data")]
    NotEnoughData,

    /// End of stream reached.
    #[error("End of stream")]
    EndOfStream,

    /// Engine cannot honor the requested format or feature.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The pool was closed while waiting or before the call.
    #[error("Buffer pool closed")]
    Closed,

    /// No slot became available within the allowed wait.
    #[error("Operation would block")]
    WouldBlock,

    /// Engine-specific failure.
    #[error("Engine error {code}: {message}")]
    Engine { code: i32, message: String },
}

/// Flat error classification delivered to client callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    InvalidValue,
    InvalidState,
    InvalidOperation,
    NoMemory,
    NotEnoughData,
    EndOfStream,
    Unsupported,
    Unknown,
}

impl ErrorKind {
    /// Stable numeric code for this kind. `0` is never returned.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidValue => -1,
            ErrorKind::InvalidState => -2,
            ErrorKind::InvalidOperation => -3,
            ErrorKind::NoMemory => -4,
            ErrorKind::NotEnoughData => -5,
            ErrorKind::EndOfStream => -6,
            ErrorKind::Unsupported => -7,
            ErrorKind::Unknown => -100,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidValue => "invalid value",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::InvalidOperation => "invalid operation",
            ErrorKind::NoMemory => "no memory",
            ErrorKind::NotEnoughData => "not enough data",
            ErrorKind::EndOfStream => "end of stream",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Result type alias using the avpipe Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid value error.
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Error::InvalidValue(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }

    /// Create an allocation failure.
    pub fn no_memory(msg: impl Into<String>) -> Self {
        Error::NoMemory(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create an engine error with a backend-specific code.
    pub fn engine(code: i32, msg: impl Into<String>) -> Self {
        Error::Engine {
            code,
            message: msg.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidValue(_) => ErrorKind::InvalidValue,
            Error::InvalidState(_) | Error::Closed => ErrorKind::InvalidState,
            Error::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Error::NoMemory(_) => ErrorKind::NoMemory,
            Error::NotEnoughData | Error::WouldBlock => ErrorKind::NotEnoughData,
            Error::EndOfStream => ErrorKind::EndOfStream,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Engine { .. } => ErrorKind::Unknown,
        }
    }

    /// Numeric code passed to `on_error`. Engine errors keep their own code.
    pub fn code(&self) -> i32 {
        match self {
            Error::Engine { code, .. } if *code != 0 => *code,
            other => other.kind().code(),
        }
    }

    /// Check if the caller should simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NotEnoughData | Error::WouldBlock)
    }

    /// Check if this is an end of stream condition.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }

    /// Check if this error, raised from a worker, must move the pipeline to
    /// its error state.
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable() && !self.is_end_of_stream()
    }
}
