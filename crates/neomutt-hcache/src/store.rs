//! Key/value storage seam.

use async_trait::async_trait;

use crate::{Error, Result};

/// One opened cache file.
///
/// Keys are short ASCII strings (`/UIDVALIDITY`, `/42`); values are
/// opaque bytes. Implementations must be usable from any task, but a
/// single store is only ever driven by one IMAP engine at a time.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads the value stored under `key`.
    async fn fetch_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes `value` under `key`, replacing any previous value.
    async fn store_raw(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every entry.
    async fn clear(&self) -> Result<()>;

    /// Releases the store. Pending writes are flushed first.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens stores by name.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Opens (creating if needed) the store called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if the name fails
    /// [`validate_name`], or a backend error if the store can't be opened.
    async fn open(&self, name: &str) -> Result<Box<dyn Store>>;
}

/// Rejects names that could escape the cache directory.
///
/// # Errors
///
/// Returns [`Error::InvalidName`] for empty names, names containing a path
/// separator or NUL, and the `.`/`..` components.
pub fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("imap%3A%2F%2Fhost%2FINBOX.hcache").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("/abs").is_err());
        assert!(validate_name("a\\b").is_err());
    }
}
