//! Error types for session binding and resolution.
//!
//! Uses `thiserror` for ergonomic error definitions.  Every resolution
//! failure is terminal: the session never retries and never returns a
//! partial result.

use thiserror::Error;

/// Errors raised by a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // --- Resolution ---
    #[error("couldn't find a value named '{key}'")]
    MissingNamedValue { key: String },

    #[error(
        "incompatible types: the value named '{key}' requires an instance of {required}, but got an instance of {actual}"
    )]
    TypeMismatch {
        key: String,
        required: String,
        actual: String,
    },

    #[error("couldn't find an instance of {required}")]
    NotFound { required: String },

    #[error("more than one instance of {required} was found [{}]", quoted(.keys))]
    AmbiguousResolution { required: String, keys: Vec<String> },

    // --- Insertion ---
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("key '{key}' is reserved for the session itself")]
    ReservedKey { key: String },

    #[error("the session has been dropped")]
    SessionClosed,

    // --- Typed access ---
    #[error("value of type {actual} cannot be taken as {required}")]
    Downcast { required: String, actual: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

fn quoted(keys: &[String]) -> String {
    keys.iter()
        .map(|k| format!("'{k}'"))
        .collect::<Vec<_>>()
        .join(", ")
}
