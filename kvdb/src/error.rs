//! Crate-wide error type.
//!
//! Mirrors the error kinds laid out for the control plane: callers get a
//! structured kind they can match on (`STATE`, `RESOURCE`, ...) plus a
//! human-readable message, rather than a grab-bag of `anyhow::Error`.

use std::fmt;

/// Coarse error classification. Corresponds 1:1 to the kinds named in the
/// design: `IO`, `RESOURCE`, `STATE`, `INVALID_INPUT`, `HEALTH`, `RETRY`,
/// `NOT_FOUND`, `ALREADY_EXISTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Resource,
    State,
    InvalidInput,
    Health,
    Retry,
    NotFound,
    AlreadyExists,
    /// Admission was refused outright (e.g. the live cursor cap).
    Canceled,
    /// Escalated from `Retry` after the internal retry budget is exhausted.
    NonRecoverable,
    /// A cursor latched a fatal error and is serving it back until destroy.
    Stale,
    /// A contract violation that should never happen in a correct caller.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Io => "IO",
            ErrorKind::Resource => "RESOURCE",
            ErrorKind::State => "STATE",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::Health => "HEALTH",
            ErrorKind::Retry => "RETRY",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::Canceled => "CANCELED",
            ErrorKind::NonRecoverable => "NON_RECOVERABLE",
            ErrorKind::Stale => "ESTALE",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Error { kind, msg: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, msg)
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::State, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, msg)
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, msg)
    }

    pub fn canceled(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, msg)
    }

    pub fn health(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Health, msg)
    }

    pub fn stale() -> Self {
        Self::new(ErrorKind::Stale, "cursor view has been reclaimed")
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    pub fn non_recoverable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NonRecoverable, msg)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::new(ErrorKind::Internal, format!("lock poisoned: {e}"))
    }
}

pub type CResult<T> = Result<T, Error>;
