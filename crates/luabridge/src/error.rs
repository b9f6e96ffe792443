//! Error types for the bridge

use crate::vm::VmError;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure class, used by callers that only care about the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad constructor options or bad argument types at the boundary
    Configuration,
    /// Source text failed to parse
    Syntax,
    /// Script raised, or a value was called/indexed the wrong way
    Runtime,
    /// Bridge invariant violated (handle used after teardown, corrupt registry)
    Resource,
}

/// Bridge error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration option or option value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A host value of the wrong shape was passed across the boundary
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// Lexical or syntactic error reported by the VM
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// Error raised while running script code, or an invalid call/index
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Internal invariant violated; not recoverable
    #[error("Resource error: {0}")]
    Resource(String),

    /// Reading a source file failed
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) | Error::TypeMismatch { .. } | Error::Io(_) => {
                ErrorKind::Configuration
            }
            Error::Syntax(_) => ErrorKind::Syntax,
            Error::Runtime(_) => ErrorKind::Runtime,
            Error::Resource(_) => ErrorKind::Resource,
        }
    }

    pub(crate) fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub(crate) fn state_closed() -> Self {
        Error::Resource("owning Lua state has been closed".to_string())
    }
}

impl From<VmError> for Error {
    fn from(err: VmError) -> Self {
        match err {
            VmError::Syntax(msg) => Error::Syntax(msg),
            VmError::Runtime(msg) => Error::Runtime(msg),
            VmError::Memory(msg) => Error::Resource(msg),
        }
    }
}
