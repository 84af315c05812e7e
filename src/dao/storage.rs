use std::error::Error;

use thiserror::Error;

/// Result alias for party store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Failure of a party store, whichever backend is behind it.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected or could not complete the call.
    #[error("party store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The store was switched off and refuses every call.
    #[error("party store `{backend}` is offline")]
    Offline { backend: &'static str },
}

impl StorageError {
    /// Wrap a backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
