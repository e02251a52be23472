//! In-memory backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::store::{Backend, Store, validate_name};
use crate::Result;

type Files = HashMap<String, HashMap<String, Vec<u8>>>;

/// Keeps every store in process memory.
///
/// Stores opened under the same name share their contents for as long as
/// the backend (or any clone of it) lives, so closing and reopening a
/// mailbox sees the earlier entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    files: Arc<Mutex<Files>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in the named store, or `None` if it was never opened.
    pub async fn entry_count(&self, name: &str) -> Option<usize> {
        self.files.lock().await.get(name).map(HashMap::len)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, name: &str) -> Result<Box<dyn Store>> {
        validate_name(name)?;
        self.files.lock().await.entry(name.to_string()).or_default();
        Ok(Box::new(MemoryStore {
            name: name.to_string(),
            files: Arc::clone(&self.files),
        }))
    }
}

struct MemoryStore {
    name: String,
    files: Arc<Mutex<Files>>,
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let files = self.files.lock().await;
        Ok(files.get(&self.name).and_then(|f| f.get(key)).cloned())
    }

    async fn store_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        self.files
            .lock()
            .await
            .entry(self.name.clone())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if let Some(file) = self.files.lock().await.get_mut(&self.name) {
            file.remove(key);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        if let Some(file) = self.files.lock().await.get_mut(&self.name) {
            file.clear();
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reopen_sees_entries() {
        let backend = MemoryBackend::new();
        let store = backend.open("box.hcache").await.unwrap();
        store.store_raw("/1", b"one").await.unwrap();
        store.close().await.unwrap();

        let store = backend.open("box.hcache").await.unwrap();
        assert_eq!(store.fetch_raw("/1").await.unwrap().as_deref(), Some(&b"one"[..]));
        assert_eq!(backend.entry_count("box.hcache").await, Some(1));
    }

    #[tokio::test]
    async fn test_stores_are_separate() {
        let backend = MemoryBackend::new();
        let a = backend.open("a.hcache").await.unwrap();
        let b = backend.open("b.hcache").await.unwrap();
        a.store_raw("/1", b"a").await.unwrap();
        assert!(b.fetch_raw("/1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let backend = MemoryBackend::new();
        let store = backend.open("box.hcache").await.unwrap();
        store.store_raw("/1", b"x").await.unwrap();
        store.store_raw("/2", b"y").await.unwrap();
        store.delete("/1").await.unwrap();
        store.delete("/missing").await.unwrap();
        assert!(store.fetch_raw("/1").await.unwrap().is_none());
        store.clear().await.unwrap();
        assert!(store.fetch_raw("/2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let backend = MemoryBackend::new();
        assert!(backend.open("..").await.is_err());
    }
}
