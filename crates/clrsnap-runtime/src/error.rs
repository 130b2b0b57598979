//! Debugger errors.

#![allow(missing_docs)]

use smol_str::SmolStr;
use thiserror::Error;

/// Errors surfaced by the debugger core.
///
/// Every error is attached to the smallest unit that failed: a variable, a
/// stack frame, or a breakpoint. Only [`DebugError::Internal`] and
/// [`DebugError::Shutdown`] abort a whole snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebugError {
    /// Breakpoint could not be bound to an IL offset.
    #[error("unresolved breakpoint: {0}")]
    Resolution(SmolStr),

    /// Static type error in a condition expression.
    #[error("type error: {0}")]
    Type(SmolStr),

    /// Valid C# that this subset does not handle.
    #[error("not implemented: {0}")]
    NotImplemented(SmolStr),

    /// Undefined variable or name in an expression.
    #[error("undefined name '{0}'")]
    UndefinedName(SmolStr),

    /// Undefined field or property on a type.
    #[error("undefined member '{member}' on '{type_name}'")]
    UndefinedMember { type_name: SmolStr, member: SmolStr },

    /// No method overload matched, or the match was ambiguous.
    #[error("cannot resolve call to '{0}'")]
    MethodResolution(SmolStr),

    /// Null reference access.
    #[error("null reference")]
    NullReference,

    /// Reference chain exceeded the dereference bound.
    #[error("reference depth limit exceeded")]
    ReferenceDepth,

    /// Array index out of range.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: u64 },

    /// Runtime cast failure.
    #[error("invalid cast to '{0}'")]
    InvalidCast(SmolStr),

    /// Integral division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Integral arithmetic overflow.
    #[error("arithmetic overflow")]
    Overflow,

    /// The underlying runtime debug API failed.
    #[error("runtime error: {0}")]
    Runtime(SmolStr),

    /// A getter or method call threw in the debuggee.
    #[error("evaluation threw exception{}", fmt_detail(.0))]
    EvalException(SmolStr),

    /// A getter or method call did not complete within budget.
    #[error("evaluation timed out")]
    EvalTimeout,

    /// A function evaluation was aborted before completion.
    #[error("evaluation aborted")]
    EvalAborted,

    /// Property evaluation is disabled by configuration.
    #[error("property evaluation is disabled")]
    PropertyEvalDisabled,

    /// Allocation failed in the debuggee or the agent.
    #[error("out of memory")]
    OutOfMemory,

    /// Inconsistency the agent cannot recover from locally.
    #[error("internal error: {0}")]
    Internal(SmolStr),

    /// The agent is shutting down.
    #[error("shutting down")]
    Shutdown,
}

fn fmt_detail(detail: &SmolStr) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {detail}")
    }
}

impl DebugError {
    /// Errors that abort a whole snapshot instead of a single node.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, DebugError::Internal(_) | DebugError::Shutdown)
    }

    /// Shorthand for a runtime-surface failure.
    pub fn runtime(message: impl Into<SmolStr>) -> Self {
        DebugError::Runtime(message.into())
    }

    /// Shorthand for an internal inconsistency.
    pub fn internal(message: impl Into<SmolStr>) -> Self {
        DebugError::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_internal_and_shutdown_are_fatal() {
        assert!(DebugError::internal("bad state").is_fatal());
        assert!(DebugError::Shutdown.is_fatal());
        assert!(!DebugError::NullReference.is_fatal());
        assert!(!DebugError::EvalTimeout.is_fatal());
    }

    #[test]
    fn eval_exception_formats_detail() {
        let err = DebugError::EvalException("System.DivideByZeroException".into());
        assert_eq!(
            err.to_string(),
            "evaluation threw exception: System.DivideByZeroException"
        );
        let bare = DebugError::EvalException("".into());
        assert_eq!(bare.to_string(), "evaluation threw exception");
    }
}
