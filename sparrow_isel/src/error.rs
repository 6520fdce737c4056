//! Error types for the function-level driver.
//!
//! Per-instruction failure is an ordinary `false`/`None` (a general selector
//! outside this crate is expected as the backstop); these errors exist for
//! the driver surface, where a whole function cannot be completed.

use sparrow_ir::{InstId, Span};
use thiserror::Error;

/// The result type of the driver surface.
pub type SelectResult<T> = Result<T, SelectError>;

/// A failure that stops fast-path selection of a function.
#[derive(Error, Debug, Clone)]
pub enum SelectError {
    /// No generic routine or target hook could select the instruction.
    #[error("unsupported instruction {inst:?}, general selection required")]
    UnsupportedInst {
        /// The instruction that defeated the fast path.
        inst: InstId,
        /// Its source range.
        span: Span,
    },

    /// The formal argument list cannot be lowered on the fast path.
    #[error("formal arguments not lowerable on the fast path")]
    ArgLowering,

    /// The input violated an IR structural rule.
    #[error("malformed IR: {message}")]
    MalformedIr {
        /// What was violated.
        message: String,
    },
}

impl SelectError {
    /// Create an unsupported-instruction error.
    #[must_use]
    pub fn unsupported(inst: InstId, span: Span) -> Self {
        Self::UnsupportedInst { inst, span }
    }

    /// Create a malformed-IR error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedIr {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_display() {
        let err = SelectError::unsupported(InstId::new(5), Span::new(2, 9));
        assert_eq!(
            err.to_string(),
            "unsupported instruction inst5, general selection required"
        );
    }

    #[test]
    fn test_malformed_display() {
        let err = SelectError::malformed("phi after non-phi");
        assert_eq!(err.to_string(), "malformed IR: phi after non-phi");
    }

    #[test]
    fn test_error_is_clone() {
        let original = SelectError::ArgLowering;
        let cloned = original.clone();
        assert!(matches!(cloned, SelectError::ArgLowering));
    }
}
