/// Error types for storage, browser calls and the operations built on them
use thiserror::Error;

/// Failure of the persistence medium
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or rejected the call.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A stored value does not decode into its record type.
    #[error("corrupt record at {key}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure of a call into the live browser
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("{call} failed: {message}")]
    Api { call: &'static str, message: String },

    #[error("could not decode result of {call}: {message}")]
    Decode { call: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
