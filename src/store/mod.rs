//! Lease stores.
//!
//! The locker only needs a shared map from string keys to byte values. Every
//! backend presents the same [`Store`] contract; each call is one atomic
//! operation on the backend, and nothing spans several keys.

pub mod key;
pub mod memory;
pub mod postgres;
pub mod sqlite;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, Result};

pub use key::ItemKey;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use sqlite::SqliteStore;

/// Location used when no store is configured.
pub const DEFAULT_STORE_PATH: &str = "/tmp/worklock.db";

/// Uniform map interface over every backend.
///
/// Calls may block on disk or network I/O. Backend failures surface as
/// [`Error::StoreUnavailable`] and are never retried here.
pub trait Store: Send + Sync {
    fn contains(&self, key: &str) -> Result<bool>;

    /// `None` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    fn keys(&self) -> Result<Vec<String>>;

    fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn contains(&self, key: &str) -> Result<bool> {
        (**self).contains(key)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        (**self).keys()
    }

    fn len(&self) -> Result<usize> {
        (**self).len()
    }
}

impl<S: Store + ?Sized> Store for &S {
    fn contains(&self, key: &str) -> Result<bool> {
        (**self).contains(key)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        (**self).keys()
    }

    fn len(&self) -> Result<usize> {
        (**self).len()
    }
}

/// Where the leases live. Parsed once, then opened into one [`AnyStore`].
///
/// Recognized forms:
/// - `memory:` (also `memory` and `memory://`)
/// - `sqlite::memory:`
/// - `sqlite://<path>`, or a bare filesystem path (no scheme)
/// - `postgres://...` / `postgresql://...`
#[derive(Debug)]
pub enum StoreUrl {
    Memory,
    SqliteMemory,
    Sqlite(PathBuf),
    /// Kept secret: the URL usually carries a password.
    Postgres(SecretString),
}

impl Default for StoreUrl {
    fn default() -> Self {
        Self::Sqlite(PathBuf::from(DEFAULT_STORE_PATH))
    }
}

impl FromStr for StoreUrl {
    type Err = Error;

    fn from_str(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::Config("store URL is empty".to_string()));
        }

        match url {
            "memory" | "memory:" | "memory://" => return Ok(Self::Memory),
            "sqlite::memory:" | "sqlite://:memory:" => return Ok(Self::SqliteMemory),
            _ => {}
        }

        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(Self::Postgres(SecretString::from(url.to_string())));
        }
        if let Some(path) = url.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(Error::Config("sqlite URL has no path".to_string()));
            }
            return Ok(Self::Sqlite(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = url.split_once("://") {
            return Err(Error::Config(format!("unsupported store scheme: {scheme}")));
        }

        Ok(Self::Sqlite(PathBuf::from(url)))
    }
}

impl StoreUrl {
    pub fn open(&self) -> Result<AnyStore> {
        let store = match self {
            Self::Memory => AnyStore::Memory(MemoryStore::new()),
            Self::SqliteMemory => AnyStore::Sqlite(SqliteStore::in_memory()?),
            Self::Sqlite(path) => AnyStore::Sqlite(SqliteStore::open(path)?),
            Self::Postgres(url) => AnyStore::Postgres(PgStore::connect(url.expose_secret())?),
        };
        tracing::debug!(backend = store.backend(), "store opened");
        Ok(store)
    }
}

/// One concrete backend, chosen at construction time.
#[derive(Debug)]
pub enum AnyStore {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
    Postgres(PgStore),
}

impl AnyStore {
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Sqlite(_) => "sqlite",
            Self::Postgres(_) => "postgres",
        }
    }

    fn inner(&self) -> &dyn Store {
        match self {
            Self::Memory(s) => s,
            Self::Sqlite(s) => s,
            Self::Postgres(s) => s,
        }
    }
}

impl Store for AnyStore {
    fn contains(&self, key: &str) -> Result<bool> {
        self.inner().contains(key)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner().get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner().set(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner().delete(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.inner().keys()
    }

    fn len(&self) -> Result<usize> {
        self.inner().len()
    }
}
