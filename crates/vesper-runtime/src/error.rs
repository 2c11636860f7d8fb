//! Runtime error types.
use std::fmt;

/// An error raised while executing compiled code or calling a callable.
/// Aborts only the current call chain; the host sees it as a value.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeError {
    /// Argument count did not match the callee's parameter count.
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    /// The abstract cost budget was exhausted.
    CostLimit(u64),
    /// Too many nested calls.
    StackOverflow,
    /// General runtime error with the source line it was raised at
    /// (0 = unknown, e.g. raised inside a host function).
    Runtime { message: String, line: u32 },
}

impl RuntimeError {
    /// A general error with no line attribution yet.
    pub fn msg(message: impl Into<String>) -> Self {
        RuntimeError::Runtime {
            message: message.into(),
            line: 0,
        }
    }

    /// Attach a line to a general error that does not have one.
    pub fn with_line(self, line: u32) -> Self {
        match self {
            RuntimeError::Runtime { message, line: 0 } => RuntimeError::Runtime { message, line },
            other => other,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Arity {
                name,
                expected,
                got,
            } => write!(f, "{name}: expected {expected} args, got {got}"),
            RuntimeError::CostLimit(limit) => write!(f, "cost limit of {limit} exceeded"),
            RuntimeError::StackOverflow => write!(f, "call stack overflow"),
            RuntimeError::Runtime { message, line: 0 } => write!(f, "{message}"),
            RuntimeError::Runtime { message, line } => write!(f, "[line {line}] {message}"),
        }
    }
}

impl std::error::Error for RuntimeError {}
