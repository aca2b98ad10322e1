//! Binding-level errors
//!
//! These are failures of the binding layer itself. Failures reported by the
//! foreign runtime (nonzero status, null object) are passed through as plain
//! values and never become a `BindingError`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, BindingError>;

#[derive(Error, Debug)]
pub enum BindingError {
    /// An argument could not be decoded with the interpreter's locale
    #[error("failed to decode argument {index} ('{argument}') with the interpreter locale")]
    Encoding { index: usize, argument: String },

    /// Text destined for a C string contains a NUL byte
    #[error("{what} contains an interior NUL byte at offset {position}")]
    InteriorNul { what: &'static str, position: usize },

    /// A file could not be opened for the runtime
    #[error("failed to open '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A foreign object is not convertible to the requested host type
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },

    /// A foreign call returned null where an object was required
    #[error("foreign call failed: {operation}")]
    ForeignCall { operation: String },

    #[error("the interpreter runtime is not initialized")]
    NotInitialized,

    #[error("an interpreter runtime is already active in this process")]
    AlreadyInitialized,

    #[error("argument list must contain at least the program name")]
    EmptyArguments,

    #[error("configuration error: {0}")]
    Config(String),
}

impl BindingError {
    /// Build an `InteriorNul` error from a failed `CString` conversion
    pub(crate) fn interior_nul(what: &'static str, err: &std::ffi::NulError) -> Self {
        Self::InteriorNul {
            what,
            position: err.nul_position(),
        }
    }

    /// Whether the error came from the filesystem rather than text conversion
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

impl From<toml::de::Error> for BindingError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
