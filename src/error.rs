//! Error Model
//!
//! Two error layers coexist:
//!
//! - [`ErrorCode`] / error *values*: inside evaluation, errors are ordinary
//!   values (`Value::Error`) that short-circuit operator and effect calls and
//!   surface at the result node. `try` is the only construct that observes
//!   them and routes control.
//! - [`SpiralError`]: host-level conditions raised by the registries, the
//!   step budget, and the scheduler. Callers at the evaluation boundary
//!   convert these into error values with the matching [`ErrorCode`].
//!
//! Validation failures are reported as [`Diagnostic`] lists carrying a
//! JSON-pointer-style path and a message.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Enumerated error kinds carried by error values.
///
/// The set is closed: validation produces the `Validation*` family, runtime
/// evaluation produces the rest. Host-raised conditions (step-limit
/// exhaustion, scheduler ceiling, cancellation) are mapped onto the same
/// kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    TypeError,
    ArityError,
    DomainError,
    DivideByZero,
    UnknownOperator,
    UnknownDefinition,
    UnboundIdentifier,
    NonTermination,
    TimeoutError,
    SelectTimeout,
    ChannelClosed,
    // Validation family
    ValidationError,
    MissingRequiredField,
    InvalidIdFormat,
    InvalidTypeFormat,
    InvalidExprFormat,
    DuplicateNodeId,
    InvalidResultReference,
    CyclicReference,
}

impl ErrorCode {
    /// Stable wire name for the code (matches the serde rendering).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::TypeError => "TypeError",
            ErrorCode::ArityError => "ArityError",
            ErrorCode::DomainError => "DomainError",
            ErrorCode::DivideByZero => "DivideByZero",
            ErrorCode::UnknownOperator => "UnknownOperator",
            ErrorCode::UnknownDefinition => "UnknownDefinition",
            ErrorCode::UnboundIdentifier => "UnboundIdentifier",
            ErrorCode::NonTermination => "NonTermination",
            ErrorCode::TimeoutError => "TimeoutError",
            ErrorCode::SelectTimeout => "SelectTimeout",
            ErrorCode::ChannelClosed => "ChannelClosed",
            ErrorCode::ValidationError => "ValidationError",
            ErrorCode::MissingRequiredField => "MissingRequiredField",
            ErrorCode::InvalidIdFormat => "InvalidIdFormat",
            ErrorCode::InvalidTypeFormat => "InvalidTypeFormat",
            ErrorCode::InvalidExprFormat => "InvalidExprFormat",
            ErrorCode::DuplicateNodeId => "DuplicateNodeId",
            ErrorCode::InvalidResultReference => "InvalidResultReference",
            ErrorCode::CyclicReference => "CyclicReference",
        }
    }

    /// Fatal codes terminate the session; everything else is recoverable
    /// via `try` or an `await`/`select` fallback.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorCode::NonTermination)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host-level error raised outside the error-as-value path.
#[derive(Error, Debug, Clone)]
pub enum SpiralError {
    /// Step budget or scheduler ceiling exhausted
    #[error("non-termination: exceeded {limit} steps")]
    NonTermination { limit: u64 },

    /// Operator/effect arity mismatch
    #[error("arity mismatch for '{name}': expected {expected}, got {actual}")]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// Structural type mismatch at an operator call site
    #[error("type mismatch for '{name}' parameter {index}: expected {expected}, got {actual}")]
    ParamType {
        name: String,
        index: usize,
        expected: String,
        actual: String,
    },

    /// Operator not present in the registry
    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    /// Effect not present in the registry
    #[error("unknown effect: {0}")]
    UnknownEffect(String),

    /// Definition not present in the document
    #[error("unknown definition: {0}")]
    UnknownDefinition(String),

    /// Duplicate registration in an operator or effect registry
    #[error("duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// Operand extraction failed inside a native implementation
    #[error("type error: {0}")]
    Type(String),

    /// Division or modulo by zero
    #[error("division by zero")]
    DivideByZero,

    /// Domain violation inside a native implementation
    #[error("domain error: {0}")]
    Domain(String),

    /// A PIR form was evaluated without an async session
    #[error("async form '{0}' evaluated outside an async session")]
    NoAsyncContext(String),

    /// Awaiting something that never completes
    #[error("timeout after {0} ms")]
    Timeout(u64),
}

impl SpiralError {
    /// The error-value code this host error maps onto.
    pub fn code(&self) -> ErrorCode {
        match self {
            SpiralError::NonTermination { .. } => ErrorCode::NonTermination,
            SpiralError::Arity { .. } => ErrorCode::ArityError,
            SpiralError::ParamType { .. } | SpiralError::Type(_) => ErrorCode::TypeError,
            SpiralError::UnknownOperator(_) | SpiralError::UnknownEffect(_) => {
                ErrorCode::UnknownOperator
            }
            SpiralError::UnknownDefinition(_) => ErrorCode::UnknownDefinition,
            SpiralError::DuplicateRegistration(_) | SpiralError::Domain(_) => {
                ErrorCode::DomainError
            }
            SpiralError::DivideByZero => ErrorCode::DivideByZero,
            SpiralError::NoAsyncContext(_) => ErrorCode::DomainError,
            SpiralError::Timeout(_) => ErrorCode::TimeoutError,
        }
    }
}

/// One validation finding: a JSON-pointer-style path plus a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Path into the document tree, e.g. `/nodes/3/expr/cond`
    pub path: String,
    /// Human-readable description of the violation
    pub message: String,
    /// The validation error kind
    pub code: ErrorCode,
}

impl Diagnostic {
    pub fn new(path: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Diagnostic {
            path: path.into(),
            message: message.into(),
            code,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_names() {
        assert_eq!(ErrorCode::TypeError.as_str(), "TypeError");
        assert_eq!(ErrorCode::DivideByZero.as_str(), "DivideByZero");
        assert_eq!(ErrorCode::CyclicReference.as_str(), "CyclicReference");
    }

    #[test]
    fn test_fatality() {
        assert!(ErrorCode::NonTermination.is_fatal());
        assert!(!ErrorCode::TypeError.is_fatal());
        assert!(!ErrorCode::SelectTimeout.is_fatal());
    }

    #[test]
    fn test_host_error_mapping() {
        let err = SpiralError::Arity {
            name: "core:add".to_string(),
            expected: 2,
            actual: 3,
        };
        assert_eq!(err.code(), ErrorCode::ArityError);
        assert_eq!(SpiralError::DivideByZero.code(), ErrorCode::DivideByZero);
        assert_eq!(
            SpiralError::NonTermination { limit: 10 }.code(),
            ErrorCode::NonTermination
        );
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::new("/nodes/0/id", ErrorCode::InvalidIdFormat, "bad id '1x'");
        assert_eq!(d.to_string(), "/nodes/0/id: bad id '1x'");
    }
}
