//! Executor failure types
//!
//! `ExecutorError` is the sole channel by which an executor reports an
//! already-classified failure to the core. Raw failures carry a dotted
//! `FailureKind` instead and are classified by the `ErrorRegistry`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of an executor failure, driving the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// Retried with backoff up to a bound, then escalated to manual
    Transient,
    /// Never auto-retried; requires operator update + resume
    NonTransient,
    /// Terminal but routable: the DAG's error-handling edge runs
    Error,
    /// Fatal: cascades to whole-job failure
    Failed,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorType::Transient => "TRANSIENT",
            ErrorType::NonTransient => "NON_TRANSIENT",
            ErrorType::Error => "ERROR",
            ErrorType::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A classified executor failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{error_type} [{code}] {message}")]
pub struct ExecutorError {
    /// Classification driving the retry policy
    pub error_type: ErrorType,

    /// Stable error code for operators and tests
    pub code: String,

    /// Human-readable message
    pub message: String,
}

impl ExecutorError {
    pub fn new(
        error_type: ErrorType,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_type,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorType::Transient, code, message)
    }

    pub fn non_transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorType::NonTransient, code, message)
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorType::Error, code, message)
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorType::Failed, code, message)
    }
}

/// Dotted failure-kind path, e.g. `io.connection.reset`
///
/// Kinds form a hierarchy through their dot-separated segments: the kind
/// `io.connection.reset` is a descendant of `io.connection` and of `io`.
/// The classifier's ancestor matchers use this in place of runtime class
/// hierarchies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureKind(String);

impl FailureKind {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, used as the default error code
    pub fn simple_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// True when `ancestor` is this kind or a dotted prefix of it
    pub fn is_descendant_of(&self, ancestor: &FailureKind) -> bool {
        self.0 == ancestor.0
            || (self.0.len() > ancestor.0.len()
                && self.0.starts_with(&ancestor.0)
                && self.0.as_bytes()[ancestor.0.len()] == b'.')
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FailureKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An unclassified failure raised inside an executor hook
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct Failure {
    /// Dotted kind path matched against the error registry
    pub kind: FailureKind,

    /// Human-readable message
    pub message: String,
}

impl Failure {
    pub fn new(kind: impl Into<FailureKind>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Wrap an I/O error under the `io.*` kind hierarchy
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::NotFound => "io.not_found",
            ErrorKind::PermissionDenied => "io.permission_denied",
            ErrorKind::ConnectionRefused => "io.connection.refused",
            ErrorKind::ConnectionReset => "io.connection.reset",
            ErrorKind::ConnectionAborted => "io.connection.aborted",
            ErrorKind::TimedOut => "io.timeout",
            ErrorKind::BrokenPipe => "io.connection.broken_pipe",
            _ => "io.other",
        };
        Self::new(kind, err.to_string())
    }
}

/// Either an already-classified error or a raw failure awaiting the
/// classifier — the only error surface of the executor hooks
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorFault {
    #[error(transparent)]
    Typed(ExecutorError),

    #[error(transparent)]
    Raw(Failure),
}

impl From<ExecutorError> for ExecutorFault {
    fn from(err: ExecutorError) -> Self {
        ExecutorFault::Typed(err)
    }
}

impl From<Failure> for ExecutorFault {
    fn from(failure: Failure) -> Self {
        ExecutorFault::Raw(failure)
    }
}

/// Result type for executor hooks
pub type Result<T> = std::result::Result<T, ExecutorFault>;
