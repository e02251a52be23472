//! Message bodies and the body cache.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::command::{CommandState, ExecFlags};
use crate::engine::ImapAccount;
use crate::parser::{FetchItem, UntaggedResponse};
use crate::path::cache_path;
use crate::types::Capabilities;
use crate::{Error, Result};

/// Storage for downloaded message bodies.
///
/// Entries are grouped by mailbox (the cache path of the folder) and keyed
/// `"{uidvalidity}-{uid}"`.
#[async_trait]
pub trait BodyCache: Send + Sync {
    /// Returns a cached message.
    async fn get(&self, mailbox: &str, id: &str) -> Option<Vec<u8>>;

    /// Stores a message.
    ///
    /// # Errors
    ///
    /// Fails if the entry can't be written.
    async fn put(&self, mailbox: &str, id: &str, data: &[u8]) -> Result<()>;

    /// Removes a message.
    ///
    /// # Errors
    ///
    /// Fails if the entry can't be removed.
    async fn delete(&self, mailbox: &str, id: &str) -> Result<()>;

    /// Ids held for `mailbox`.
    async fn list(&self, mailbox: &str) -> Vec<String>;
}

/// A body cache that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryBodyCache {
    entries: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryBodyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BodyCache for MemoryBodyCache {
    async fn get(&self, mailbox: &str, id: &str) -> Option<Vec<u8>> {
        self.entries.lock().await.get(mailbox)?.get(id).cloned()
    }

    async fn put(&self, mailbox: &str, id: &str, data: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .await
            .entry(mailbox.to_string())
            .or_default()
            .insert(id.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, mailbox: &str, id: &str) -> Result<()> {
        if let Some(folder) = self.entries.lock().await.get_mut(mailbox) {
            folder.remove(id);
        }
        Ok(())
    }

    async fn list(&self, mailbox: &str) -> Vec<String> {
        self.entries
            .lock()
            .await
            .get(mailbox)
            .map(|folder| folder.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn body_id(uidvalidity: u32, uid: u32) -> String {
    format!("{uidvalidity}-{uid}")
}

impl ImapAccount {
    /// Cache folder and UIDVALIDITY of the selected mailbox.
    fn body_cache_scope(&self) -> Result<(String, u32)> {
        let mbox = self
            .mailbox
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no mailbox selected".to_string()))?;
        let folder = cache_path(self.delim.unwrap_or('/'), &mbox.name);
        Ok((folder, mbox.status.uidvalidity))
    }

    /// Downloads the full message `uid`, going through the body cache.
    ///
    /// Flag changes the server reports alongside the body (such as `\Seen`
    /// when peeking is off) are applied to the message as usual.
    ///
    /// # Errors
    ///
    /// Fails if no mailbox is selected, the message is unknown, the server
    /// refuses the FETCH, or the response carries no body.
    pub async fn fetch_message(&mut self, uid: u32) -> Result<Vec<u8>> {
        let (folder, uidvalidity) = self.body_cache_scope()?;
        if self.mailbox.as_ref().and_then(|m| m.email(uid)).is_none() {
            return Err(Error::InvalidState(format!("no message with UID {uid}")));
        }

        let id = body_id(uidvalidity, uid);
        let cache = self.collab.body_cache.clone();
        if let Some(cache) = &cache
            && let Some(data) = cache.get(&folder, &id).await
        {
            debug!(uid, "message served from body cache");
            return Ok(data);
        }

        let item = if !self.capabilities.contains(Capabilities::IMAP4REV1) {
            "RFC822"
        } else if self.options.peek {
            "BODY.PEEK[]"
        } else {
            "BODY[]"
        };
        self.start(Some(&format!("UID FETCH {uid} {item}")), ExecFlags::empty())
            .await?;

        let mut body = None;
        loop {
            let state = self.step().await?;
            if let Some(UntaggedResponse::Fetch { items, .. }) = self.take_response() {
                for item in items {
                    match item {
                        FetchItem::Uid(fetched) if fetched != uid => {
                            warn!(uid, fetched, "the message index is incorrect, try reopening the mailbox");
                        }
                        FetchItem::Body {
                            section: None,
                            data: Some(data),
                            ..
                        } => body = Some(data),
                        _ => {}
                    }
                }
            }
            match state {
                CommandState::Continue => {}
                CommandState::Ok => break,
                state => return Err(self.failure(state)),
            }
        }

        let Some(body) = body.filter(|b| !b.is_empty()) else {
            return Err(Error::Bad(format!("server returned no body for UID {uid}")));
        };
        if let Some(cache) = &cache
            && let Err(e) = cache.put(&folder, &id, &body).await
        {
            debug!(uid, error = %e, "failed to add message to cache");
        }
        Ok(body)
    }

    /// Drops the cached body of `uid`.
    pub(crate) async fn cache_del(&mut self, uid: u32) {
        let (Some(cache), Ok((folder, uidvalidity))) = (&self.collab.body_cache, self.body_cache_scope()) else {
            return;
        };
        if let Err(e) = cache.delete(&folder, &body_id(uidvalidity, uid)).await {
            debug!(uid, error = %e, "failed to drop cached body");
        }
    }

    /// Removes cached bodies from an old UIDVALIDITY or of messages that
    /// are gone.
    pub(crate) async fn cache_clean(&mut self) {
        let (Some(cache), Ok((folder, uidvalidity))) = (&self.collab.body_cache, self.body_cache_scope()) else {
            return;
        };
        let Some(mbox) = self.mailbox.as_ref() else {
            return;
        };
        for id in cache.list(&folder).await {
            let Some((uv, uid)) = id
                .split_once('-')
                .and_then(|(uv, uid)| Some((uv.parse::<u32>().ok()?, uid.parse::<u32>().ok()?)))
            else {
                continue;
            };
            if uv != uidvalidity || mbox.email(uid).is_none() {
                debug!(%id, "pruning body cache");
                if let Err(e) = cache.delete(&folder, &id).await {
                    debug!(%id, error = %e, "failed to prune body cache");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::sync::Arc;

    use tokio_test::io::Builder;

    use super::*;
    use crate::engine::tests::{account_with, select_with};
    use crate::engine::{AccountState, Collaborators};

    fn with_cache(account: ImapAccount, cache: Arc<MemoryBodyCache>) -> ImapAccount {
        account.with_collaborators(Collaborators {
            body_cache: Some(cache),
            ..Collaborators::default()
        })
    }

    #[tokio::test]
    async fn test_fetch_stores_in_cache() {
        let mock = Builder::new()
            .write(b"a0001 UID FETCH 7 BODY.PEEK[]\r\n")
            .read(b"* 1 FETCH (UID 7 BODY[] {11}\r\nSubject: x\n)\r\n")
            .read(b"a0001 OK FETCH completed\r\n")
            .build();
        let cache = Arc::new(MemoryBodyCache::new());
        let mut account = with_cache(account_with(mock, AccountState::Selected), cache.clone());
        account.capabilities = Capabilities::IMAP4REV1;
        select_with(&mut account, &[7]);
        account.mailbox_mut().unwrap().status.uidvalidity = 42;

        let body = account.fetch_message(7).await.unwrap();
        assert_eq!(body, b"Subject: x\n");
        assert_eq!(cache.get("INBOX", "42-7").await.unwrap(), body);

        // second read never touches the connection
        assert_eq!(account.fetch_message(7).await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_fetch_without_peek_updates_flags() {
        let options = crate::config::ImapOptions::builder()
            .peek(false)
            .poll_timeout(std::time::Duration::ZERO)
            .build()
            .unwrap();
        let mock = Builder::new()
            .write(b"a0001 UID FETCH 7 BODY[]\r\n")
            .read(b"* 1 FETCH (UID 7 FLAGS (\\Seen) BODY[] {4}\r\nbody)\r\n")
            .read(b"a0001 OK FETCH completed\r\n")
            .build();
        let mut account = crate::engine::tests::account_with_options(mock, options, AccountState::Selected);
        account.capabilities = Capabilities::IMAP4REV1;
        select_with(&mut account, &[7]);

        assert_eq!(account.fetch_message(7).await.unwrap(), b"body");
        assert!(account.mailbox().unwrap().email(7).unwrap().flags.read);
    }

    #[tokio::test]
    async fn test_fetch_rfc822_on_old_servers() {
        let mock = Builder::new()
            .write(b"a0001 UID FETCH 3 RFC822\r\n")
            .read(b"* 1 FETCH (UID 3 RFC822 {2}\r\nhi)\r\n")
            .read(b"a0001 OK done\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        account.capabilities = Capabilities::IMAP4;
        select_with(&mut account, &[3]);
        assert_eq!(account.fetch_message(3).await.unwrap(), b"hi");
    }

    #[tokio::test]
    async fn test_fetch_unknown_uid() {
        let mock = Builder::new().build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[3]);
        assert!(matches!(account.fetch_message(4).await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_cache_clean() {
        let mock = Builder::new().build();
        let cache = Arc::new(MemoryBodyCache::new());
        cache.put("INBOX", "42-1", b"a").await.unwrap();
        cache.put("INBOX", "42-9", b"b").await.unwrap();
        cache.put("INBOX", "41-1", b"c").await.unwrap();
        let mut account = with_cache(account_with(mock, AccountState::Selected), cache.clone());
        select_with(&mut account, &[1, 2]);
        account.mailbox_mut().unwrap().status.uidvalidity = 42;

        account.cache_clean().await;
        assert_eq!(cache.list("INBOX").await, vec!["42-1".to_string()]);
    }
}
