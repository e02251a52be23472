//! `SQLite` backend: one database file per mailbox.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::store::{Backend, Store, validate_name};
use crate::Result;

/// Opens `SQLite` stores inside a cache directory.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    dir: PathBuf,
}

impl SqliteBackend {
    /// Creates a backend storing files under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Uses the platform cache directory (`~/.cache/neomutt/hcache` on Linux).
    #[must_use]
    pub fn with_default_dir() -> Option<Self> {
        dirs::cache_dir().map(|d| Self::new(d.join("neomutt").join("hcache")))
    }

    /// The directory holding the cache files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Opens a private in-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Box<dyn Store>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Box::new(SqliteStore::initialize(pool).await?))
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn open(&self, name: &str) -> Result<Box<dyn Store>> {
        validate_name(name)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(name);
        // Cache names are percent-encoded URLs, so the path can't go through a
        // `sqlite:` URL without being decoded again.
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        tracing::debug!(path = %path.display(), "opened header cache");
        Ok(Box::new(SqliteStore::initialize(pool).await?))
    }
}

struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    async fn initialize(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            )
            ",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn fetch_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    async fn store_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO entries (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM entries").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_fetch() {
        let store = SqliteBackend::in_memory().await.unwrap();
        store.store_raw("/UIDNEXT", &7u32.to_le_bytes()).await.unwrap();
        let value = store.fetch_raw("/UIDNEXT").await.unwrap().unwrap();
        assert_eq!(value, 7u32.to_le_bytes());
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = SqliteBackend::in_memory().await.unwrap();
        store.store_raw("/1", b"old").await.unwrap();
        store.store_raw("/1", b"new").await.unwrap();
        assert_eq!(store.fetch_raw("/1").await.unwrap().unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let store = SqliteBackend::in_memory().await.unwrap();
        store.store_raw("/1", b"a").await.unwrap();
        store.store_raw("/2", b"b").await.unwrap();
        store.delete("/1").await.unwrap();
        assert!(store.fetch_raw("/1").await.unwrap().is_none());
        store.clear().await.unwrap();
        assert!(store.fetch_raw("/2").await.unwrap().is_none());
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_rejects_bad_name() {
        let backend = SqliteBackend::new(std::env::temp_dir());
        assert!(backend.open("../escape").await.is_err());
    }
}
