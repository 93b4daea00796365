//! Error types for the scripting crate

use mush_core::MushError;

/// Script-specific error types
///
/// Language-level failures (unknown functions, bad arguments, limits) are
/// reported in-band as `#-1` values; these errors are for callers that
/// asked to be told loudly.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// Strict-mode parse failure
    #[error("Syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// Lock text that does not parse or names an unknown atom
    #[error("Invalid lock: {0}")]
    InvalidLock(String),

    /// Evaluation cancelled by its caller
    #[error("Evaluation cancelled")]
    Cancelled,

    /// A collaborator could not satisfy a request
    #[error("Collaborator failure: {0}")]
    Collaborator(String),
}

impl From<ScriptError> for MushError {
    fn from(err: ScriptError) -> Self {
        MushError::Script(err.to_string())
    }
}

impl From<MushError> for ScriptError {
    fn from(err: MushError) -> Self {
        ScriptError::Collaborator(err.to_string())
    }
}

/// Result type for scripting operations
pub type Result<T> = std::result::Result<T, ScriptError>;

/// The ceiling that stopped an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    Depth,
    Recursion,
    Invocation,
    CallLimit,
}

impl LimitKind {
    /// The terminal value reported to the player
    pub fn message(&self) -> &'static str {
        match self {
            LimitKind::Depth => "#-1 MAXIMUM STACK DEPTH EXCEEDED",
            LimitKind::Recursion => "#-1 FUNCTION RECURSION LIMIT EXCEEDED",
            LimitKind::Invocation => "#-1 FUNCTION INVOCATION LIMIT EXCEEDED",
            LimitKind::CallLimit => "#-1 CALL LIMIT EXCEEDED",
        }
    }
}

/// Non-local exit unwinding every frame of an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    Limit(LimitKind),
    Cancelled,
}
