//! Postgres store: the networked map shared by workers on many hosts.
//!
//! The locker is blocking, so the adapter owns a small tokio runtime and
//! drives sqlx through it. Do not call it from inside another async runtime.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::runtime::Runtime;

use super::Store;
use crate::error::{Error, Result};

/// Store backed by the `content` table. Owns the runtime and the pool.
pub struct PgStore {
    runtime: Runtime,
    pool: PgPool,
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore").finish_non_exhaustive()
    }
}

impl PgStore {
    /// Connect, then create the `content` table if it is missing.
    pub fn connect(url: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("worklock-pg")
            .enable_all()
            .build()
            .map_err(|e| Error::store("postgres", e))?;

        let pool = runtime.block_on(PgPoolOptions::new().max_connections(4).connect(url))?;
        let store = Self { runtime, pool };
        store.migrate()?;
        Ok(store)
    }

    /// Run all pending migrations.
    pub fn migrate(&self) -> Result<()> {
        self.runtime
            .block_on(sqlx::migrate!("./migrations").run(&self.pool))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub fn health_check(&self) -> Result<()> {
        self.runtime
            .block_on(sqlx::query("SELECT 1").execute(&self.pool))?;
        Ok(())
    }
}

impl Store for PgStore {
    fn contains(&self, key: &str) -> Result<bool> {
        let found: Option<i32> = self.runtime.block_on(
            sqlx::query_scalar("SELECT 1 FROM content WHERE id = $1")
                .bind(key)
                .fetch_optional(&self.pool),
        )?;
        Ok(found.is_some())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blob: Option<Vec<u8>> = self.runtime.block_on(
            sqlx::query_scalar("SELECT blob FROM content WHERE id = $1")
                .bind(key)
                .fetch_optional(&self.pool),
        )?;
        Ok(blob)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.runtime.block_on(
            sqlx::query(
                "INSERT INTO content (id, blob) VALUES ($1, $2)
                 ON CONFLICT (id) DO UPDATE SET blob = EXCLUDED.blob",
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool),
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.runtime.block_on(
            sqlx::query("DELETE FROM content WHERE id = $1")
                .bind(key)
                .execute(&self.pool),
        )?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let keys: Vec<String> = self.runtime.block_on(
            sqlx::query_scalar("SELECT id FROM content ORDER BY seq ASC").fetch_all(&self.pool),
        )?;
        Ok(keys)
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self.runtime.block_on(
            sqlx::query_scalar("SELECT COUNT(*) FROM content").fetch_one(&self.pool),
        )?;
        Ok(count as usize)
    }
}
