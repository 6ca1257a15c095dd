use thiserror::Error;

/// Structural inconsistencies in the program, indicating a front-end or
/// prior-pass defect. These abort the compile; anything merely
/// unoptimizable is skipped silently instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptError {
    #[error("call to undefined function `{callee}` in `{caller}`")]
    UnknownCallee { caller: String, callee: String },

    #[error("call to `{callee}` in `{caller}` passes {got} arguments, expected {expected}")]
    ArityMismatch {
        caller: String,
        callee: String,
        expected: usize,
        got: usize,
    },
}
