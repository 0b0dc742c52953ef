use thiserror::Error;

/// The outcome of interpreting a source unit. Diagnostics are printed by the
/// reporter as they occur; these variants carry what the caller needs for
/// exit-code mapping and tests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// One or more compile errors were reported; execution never started.
    #[error("compile error")]
    Compile,

    /// A runtime fault stopped execution; the stack has been reset.
    #[error("{0}")]
    Runtime(String),

    /// The preflight run refused the program.
    #[error("preflight aborted: {0}")]
    Preflight(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A fault raised while executing an instruction or a native function. The
/// VM routes the message through the error reporter together with the
/// faulting line and the call-frame trace.
#[derive(Debug, Clone)]
pub struct RuntimeFault {
    pub message: String,
}

impl RuntimeFault {
    pub fn new(message: impl Into<String>) -> RuntimeFault {
        RuntimeFault {
            message: message.into(),
        }
    }
}
