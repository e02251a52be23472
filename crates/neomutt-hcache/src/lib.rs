//! # neomutt-hcache
//!
//! Header cache for the IMAP engine.
//!
//! Each selected mailbox gets its own key/value store. Per-message
//! headers are kept under their UID and tagged with the UIDVALIDITY they
//! were fetched under, so a server-side renumbering silently turns old
//! entries into cache misses.
//!
//! This crate provides:
//! - [`Store`] and [`Backend`], the key/value seam
//! - [`HeaderCache`], the typed, UIDVALIDITY-scoped wrapper
//! - [`MemoryBackend`] for tests and cache-less sessions
//! - [`SqliteBackend`], one `SQLite` file per mailbox
//!
//! ## Example
//!
//! ```no_run
//! use neomutt_hcache::{Backend, HeaderCache, MemoryBackend};
//!
//! # async fn example() -> neomutt_hcache::Result<()> {
//! let backend = MemoryBackend::new();
//! let cache = HeaderCache::new(backend.open("imap%3A%2F%2Fhost%2FINBOX.hcache").await?);
//!
//! cache.store_u32(HeaderCache::UIDVALIDITY, 42).await?;
//! cache.store("/7", 42, &"Subject: hi".to_string()).await?;
//!
//! let hit: Option<String> = cache.fetch("/7", 42).await?;
//! assert!(hit.is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cache;
mod error;
mod memory;
mod sqlite;
mod store;

pub use cache::HeaderCache;
pub use error::{Error, Result};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use store::{Backend, Store, validate_name};
