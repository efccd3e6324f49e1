//! Error types for worklock.

use thiserror::Error;

/// Boxed cause carried by [`Error::StoreUnavailable`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    /// The backing store could not be reached or rejected an operation.
    /// Never retried by the locker.
    #[error("{backend} store unavailable: {source}")]
    StoreUnavailable {
        backend: &'static str,
        source: BoxError,
    },

    #[error("item cannot be used as a store key: {0}")]
    KeyEncoding(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a backend failure.
    pub fn store(backend: &'static str, source: impl Into<BoxError>) -> Self {
        Self::StoreUnavailable {
            backend,
            source: source.into(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::store("sqlite", e)
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Self::store("postgres", e)
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::store("postgres", e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
