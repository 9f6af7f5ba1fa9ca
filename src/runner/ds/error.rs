//! Error type shared by the runtime, the closure engine and the built-in library.

use thiserror::Error;

/// Exact message raised when a yield would cross a nested native call.
pub const YIELD_ACROSS_BOUNDARY: &str = "attempt to yield across metamethod/C-call boundary";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// A script-visible type mismatch, e.g. calling a number.
    #[error("{0}")]
    Type(String),

    /// Bad argument passed to a library function.
    #[error("invalid argument #{index} to '{function}' ({message})")]
    Argument {
        function: String,
        index: usize,
        message: String,
    },

    /// The patch target does not have room for the hook's upvalues.
    #[error("{function}: hook has {needed} upvalue(s) but the target only has room for {available}")]
    UpvalueCapacity {
        function: String,
        needed: usize,
        available: usize,
    },

    #[error("{0}: unsupported combination of closure representations")]
    UnsupportedCombination(String),

    /// A wrapper table entry points at a unit that no longer exists, or a
    /// table invariant was otherwise broken.
    #[error("internal consistency failure: {0}")]
    InternalConsistency(String),

    #[error("{0}: allocation failed")]
    AllocationFailure(String),

    #[error("{0}")]
    Compile(String),

    /// Raised by scripts through `error(...)` or by the interpreter.
    #[error("{0}")]
    Script(String),

    #[error("attempt to yield across metamethod/C-call boundary")]
    YieldAcrossBoundary,

    #[error("cannot {action} a {state} execution context")]
    ContextState {
        action: &'static str,
        state: &'static str,
    },
}

impl RuntimeError {
    pub fn bad_argument(function: &str, index: usize, expected: &str, got: &str) -> Self {
        RuntimeError::Argument {
            function: function.to_string(),
            index,
            message: format!("{} expected, got {}", expected, got),
        }
    }

    /// True when this error carries the yield-across-boundary message, no
    /// matter which variant produced it.
    pub fn is_yield_across_boundary(&self) -> bool {
        match self {
            RuntimeError::YieldAcrossBoundary => true,
            RuntimeError::Script(msg) => msg == YIELD_ACROSS_BOUNDARY,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yield_message_is_exact() {
        assert_eq!(
            RuntimeError::YieldAcrossBoundary.to_string(),
            YIELD_ACROSS_BOUNDARY
        );
        assert!(RuntimeError::Script(YIELD_ACROSS_BOUNDARY.to_string()).is_yield_across_boundary());
        assert!(!RuntimeError::Script("boom".to_string()).is_yield_across_boundary());
    }

    #[test]
    fn argument_error_formats_like_a_library_error() {
        let err = RuntimeError::bad_argument("hookfunction", 2, "function", "nil");
        assert_eq!(
            err.to_string(),
            "invalid argument #2 to 'hookfunction' (function expected, got nil)"
        );
    }
}
