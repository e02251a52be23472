//! Typed, UIDVALIDITY-scoped view over a [`Store`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::store::Store;
use crate::{Error, Result};

#[derive(Serialize)]
struct ScopedRef<'a, T> {
    uidvalidity: u32,
    value: &'a T,
}

#[derive(Deserialize)]
struct Scoped<T> {
    uidvalidity: u32,
    value: T,
}

/// Header cache for one mailbox.
pub struct HeaderCache {
    store: Box<dyn Store>,
}

impl HeaderCache {
    /// UIDVALIDITY of the cached entries (`u32`).
    pub const UIDVALIDITY: &'static str = "/UIDVALIDITY";
    /// UIDNEXT at the time of the last download (`u32`).
    pub const UIDNEXT: &'static str = "/UIDNEXT";
    /// HIGHESTMODSEQ at the time of the last download (`u64`).
    pub const MODSEQ: &'static str = "/MODSEQ";
    /// UIDs known to the client, as a compressed seqset (ASCII).
    pub const UIDSEQSET: &'static str = "/UIDSEQSET";

    /// Wraps an opened store.
    #[must_use]
    pub fn new(store: Box<dyn Store>) -> Self {
        Self { store }
    }

    /// Key for a message's headers.
    #[must_use]
    pub fn uid_key(uid: u32) -> String {
        format!("/{uid}")
    }

    /// Fetches a value stored under `uidvalidity`.
    ///
    /// An entry written under a different UIDVALIDITY, or one that no longer
    /// deserializes, is reported as a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn fetch<T: DeserializeOwned>(&self, key: &str, uidvalidity: u32) -> Result<Option<T>> {
        let Some(raw) = self.store.fetch_raw(key).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<Scoped<T>>(&raw) {
            Ok(entry) if entry.uidvalidity == uidvalidity => Ok(Some(entry.value)),
            Ok(entry) => {
                tracing::trace!(key, stored = entry.uidvalidity, uidvalidity, "hcache scope miss");
                Ok(None)
            }
            Err(e) => {
                tracing::debug!(key, error = %e, "discarding unreadable hcache entry");
                Ok(None)
            }
        }
    }

    /// Stores a value under `uidvalidity`, replacing any older entry.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the backend fails.
    pub async fn store<T: Serialize>(&self, key: &str, uidvalidity: u32, value: &T) -> Result<()> {
        let raw = serde_json::to_vec(&ScopedRef { uidvalidity, value })?;
        self.store.store_raw(key, &raw).await
    }

    /// Removes an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(key).await
    }

    /// Removes every entry, bookkeeping keys included.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    /// Reads an unscoped entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn fetch_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.store.fetch_raw(key).await
    }

    /// Writes an unscoped entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn store_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        self.store.store_raw(key, value).await
    }

    /// Reads a little-endian `u32` entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupt`] if the entry isn't four bytes long.
    pub async fn fetch_u32(&self, key: &str) -> Result<Option<u32>> {
        let Some(raw) = self.store.fetch_raw(key).await? else {
            return Ok(None);
        };
        let bytes: [u8; 4] = raw.as_slice().try_into().map_err(|_| Error::Corrupt {
            key: key.to_string(),
            expected: 4,
            found: raw.len(),
        })?;
        Ok(Some(u32::from_le_bytes(bytes)))
    }

    /// Writes a little-endian `u32` entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn store_u32(&self, key: &str, value: u32) -> Result<()> {
        self.store.store_raw(key, &value.to_le_bytes()).await
    }

    /// Reads a little-endian `u64` entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupt`] if the entry isn't eight bytes long.
    pub async fn fetch_u64(&self, key: &str) -> Result<Option<u64>> {
        let Some(raw) = self.store.fetch_raw(key).await? else {
            return Ok(None);
        };
        let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| Error::Corrupt {
            key: key.to_string(),
            expected: 8,
            found: raw.len(),
        })?;
        Ok(Some(u64::from_le_bytes(bytes)))
    }

    /// Writes a little-endian `u64` entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn store_u64(&self, key: &str, value: u64) -> Result<()> {
        self.store.store_raw(key, &value.to_le_bytes()).await
    }

    /// Closes the underlying store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to flush.
    pub async fn close(self) -> Result<()> {
        self.store.close().await
    }
}

impl std::fmt::Debug for HeaderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::unreadable_literal)]
mod tests {
    use super::*;
    use crate::{Backend, MemoryBackend, SqliteBackend};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Hdr {
        uid: u32,
        subject: String,
    }

    fn hdr(uid: u32) -> Hdr {
        Hdr {
            uid,
            subject: format!("message {uid}"),
        }
    }

    #[tokio::test]
    async fn test_scope_mismatch_is_miss() {
        let cache = HeaderCache::new(MemoryBackend::new().open("x.hcache").await.unwrap());
        cache.store("/5", 100, &hdr(5)).await.unwrap();

        assert_eq!(cache.fetch::<Hdr>("/5", 100).await.unwrap(), Some(hdr(5)));
        assert_eq!(cache.fetch::<Hdr>("/5", 101).await.unwrap(), None);

        cache.store("/5", 101, &hdr(5)).await.unwrap();
        assert_eq!(cache.fetch::<Hdr>("/5", 101).await.unwrap(), Some(hdr(5)));
        assert_eq!(cache.fetch::<Hdr>("/5", 100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbage_is_miss() {
        let cache = HeaderCache::new(MemoryBackend::new().open("x.hcache").await.unwrap());
        cache.store_raw("/9", b"not json").await.unwrap();
        assert_eq!(cache.fetch::<Hdr>("/9", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bookkeeping_entries() {
        let cache = HeaderCache::new(SqliteBackend::in_memory().await.unwrap());
        cache.store_u32(HeaderCache::UIDVALIDITY, 1234567890).await.unwrap();
        cache.store_u64(HeaderCache::MODSEQ, 90000000000).await.unwrap();
        cache.store_raw(HeaderCache::UIDSEQSET, b"1:5,9").await.unwrap();

        assert_eq!(cache.fetch_u32(HeaderCache::UIDVALIDITY).await.unwrap(), Some(1234567890));
        assert_eq!(cache.fetch_u64(HeaderCache::MODSEQ).await.unwrap(), Some(90000000000));
        assert_eq!(cache.fetch_u32(HeaderCache::UIDNEXT).await.unwrap(), None);
        assert_eq!(
            cache.fetch_raw(HeaderCache::UIDSEQSET).await.unwrap().as_deref(),
            Some(&b"1:5,9"[..])
        );
    }

    #[tokio::test]
    async fn test_wrong_width_is_corrupt() {
        let cache = HeaderCache::new(MemoryBackend::new().open("x.hcache").await.unwrap());
        cache.store_raw(HeaderCache::UIDNEXT, b"abc").await.unwrap();
        assert!(matches!(
            cache.fetch_u32(HeaderCache::UIDNEXT).await,
            Err(Error::Corrupt { expected: 4, found: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let cache = HeaderCache::new(MemoryBackend::new().open("x.hcache").await.unwrap());
        cache.store_u32(HeaderCache::UIDVALIDITY, 1).await.unwrap();
        cache.store(&HeaderCache::uid_key(3), 1, &hdr(3)).await.unwrap();
        cache.clear().await.unwrap();
        assert_eq!(cache.fetch_u32(HeaderCache::UIDVALIDITY).await.unwrap(), None);
        assert_eq!(cache.fetch::<Hdr>("/3", 1).await.unwrap(), None);
    }
}
