//! Mailbox management: listing, status, subscriptions and the like.

use std::cmp::Ordering;

use tracing::{debug, info};

use super::MailboxStatus;
use crate::command::ExecFlags;
use crate::engine::{AccountState, ImapAccount};
use crate::path::{common_prefix, munge, mxcmp};
use crate::types::{Capabilities, ListEntry};
use crate::{Error, Result};

/// A folder as shown in a folder browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseEntry {
    /// Full server name.
    pub name: String,
    /// Name relative to the browsed folder, with a trailing delimiter if
    /// the folder can have children.
    pub desc: String,
    /// Hierarchy delimiter.
    pub delim: Option<char>,
    /// Can be selected.
    pub selectable: bool,
    /// Can have children.
    pub inferiors: bool,
}

impl ImapAccount {
    fn require_login(&self) -> Result<()> {
        if self.is_fatal() {
            return Err(Error::Fatal);
        }
        if self.state < AccountState::Authenticated {
            return Err(Error::InvalidState("not logged in".to_string()));
        }
        Ok(())
    }

    /// Runs a LIST-style command and collects the entries it returned.
    async fn collect_list(&mut self, cmd: &str) -> Result<Vec<ListEntry>> {
        self.cmdresult = Some(Vec::new());
        let result = self.exec(Some(cmd), ExecFlags::empty()).await;
        let entries = self.cmdresult.take().unwrap_or_default();
        result.map(|()| entries)
    }

    /// The listing verb: `LIST`, or subscribed folders only with
    /// `imap_list_subscribed`.
    fn list_command(&self) -> &'static str {
        if !self.options.list_subscribed {
            "LIST"
        } else if self.capabilities.contains(Capabilities::LIST_EXTENDED) {
            "LIST (SUBSCRIBED RECURSIVEMATCH)"
        } else {
            "LSUB"
        }
    }

    /// `LIST reference pattern`.
    ///
    /// # Errors
    ///
    /// Fails if the server refuses the command or the connection breaks.
    pub async fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListEntry>> {
        self.require_login()?;
        let cmd = format!("LIST {} {}", munge(self.unicode, reference), munge(self.unicode, pattern));
        self.collect_list(&cmd).await
    }

    /// `LSUB reference pattern`.
    ///
    /// # Errors
    ///
    /// Fails if the server refuses the command or the connection breaks.
    pub async fn lsub(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListEntry>> {
        self.require_login()?;
        let cmd = format!("LSUB {} {}", munge(self.unicode, reference), munge(self.unicode, pattern));
        self.collect_list(&cmd).await
    }

    /// Lists the children of `folder` (the top level if empty).
    ///
    /// At the top level INBOX is always included.
    ///
    /// # Errors
    ///
    /// Fails if the server refuses the listing or the connection breaks.
    pub async fn browse(&mut self, folder: &str) -> Result<Vec<BrowseEntry>> {
        self.require_login()?;
        let verb = self.list_command();
        let mut prefix = if folder.is_empty() {
            String::new()
        } else {
            self.canonical_name(folder)
        };

        if !prefix.is_empty() {
            let cmd = format!("{verb} \"\" {}", munge(self.unicode, &prefix));
            let found = self.collect_list(&cmd).await?;
            let delim = found
                .iter()
                .find(|e| mxcmp(&self.options.delim_chars, &e.name, &prefix) == Ordering::Equal)
                .and_then(|e| e.delim)
                .or(self.delim);
            if let Some(delim) = delim
                && !prefix.ends_with(delim)
            {
                prefix.push(delim);
            }
        }

        debug!(%prefix, "browsing");
        let cmd = format!("{verb} \"\" {}", munge(self.unicode, &format!("{prefix}%")));
        let mut found = self.collect_list(&cmd).await?;
        if prefix.is_empty() && !found.iter().any(|e| e.name.eq_ignore_ascii_case("INBOX")) {
            found.extend(self.collect_list("LIST \"\" \"INBOX\"").await?);
        }

        let entries = found
            .into_iter()
            .filter(|e| !e.name.is_empty() && e.name != prefix)
            .map(|e| {
                let mut desc = e.name.strip_prefix(&prefix).unwrap_or(&e.name).to_string();
                if !e.noinferiors
                    && let Some(delim) = e.delim
                {
                    desc.push(delim);
                }
                BrowseEntry {
                    desc,
                    delim: e.delim,
                    selectable: !e.noselect,
                    inferiors: !e.noinferiors,
                    name: e.name,
                }
            })
            .collect();
        Ok(entries)
    }

    /// Asks for the counters of `path`.
    ///
    /// With `queue` the STATUS is only queued and its answer lands in
    /// [`ImapAccount::mailbox_status`] once the queue is flushed. The
    /// selected mailbox is never asked; its own counters are returned.
    ///
    /// # Errors
    ///
    /// Fails if the server has no STATUS command or refuses it.
    pub async fn status(&mut self, path: &str, queue: bool) -> Result<Option<MailboxStatus>> {
        self.require_login()?;
        let name = self.canonical_name(path);
        if let Some(mbox) = self.mailbox.as_ref()
            && mxcmp(&self.options.delim_chars, &mbox.name, &name) == Ordering::Equal
        {
            let mut status = mbox.status;
            status.messages = u32::try_from(mbox.message_count()).unwrap_or(u32::MAX);
            return Ok(Some(status));
        }

        let uidvalidity = if self.capabilities.contains(Capabilities::IMAP4REV1) {
            "UIDVALIDITY"
        } else if self.capabilities.contains(Capabilities::STATUS) {
            "UID-VALIDITY"
        } else {
            debug!("server doesn't support STATUS");
            return Err(Error::InvalidState("server does not support STATUS".to_string()));
        };
        let cmd = format!(
            "STATUS {} (UIDNEXT {uidvalidity} UNSEEN RECENT MESSAGES)",
            munge(self.unicode, &name)
        );
        let flags = if queue { ExecFlags::QUEUE } else { ExecFlags::POLL };
        self.exec(Some(&cmd), flags).await?;
        Ok(self.statuses.get(&name).copied())
    }

    /// Subscribes to `path`, or unsubscribes.
    ///
    /// # Errors
    ///
    /// Fails if the server refuses.
    pub async fn subscribe(&mut self, path: &str, subscribe: bool) -> Result<()> {
        self.require_login()?;
        let name = self.canonical_name(path);
        let verb = if subscribe { "SUBSCRIBE" } else { "UNSUBSCRIBE" };
        info!(mailbox = %name, "{}", verb.to_ascii_lowercase());
        self.exec(Some(&format!("{verb} {}", munge(self.unicode, &name))), ExecFlags::empty())
            .await?;

        if self.options.check_subscribed {
            if subscribe {
                if !self.subscribed.contains(&name) {
                    self.subscribed.push(name);
                }
            } else {
                self.subscribed.retain(|s| *s != name);
            }
        }
        Ok(())
    }

    /// Creates `path`.
    ///
    /// # Errors
    ///
    /// Fails if the server refuses.
    pub async fn create_mailbox(&mut self, path: &str) -> Result<()> {
        self.require_login()?;
        let name = self.canonical_name(path);
        info!(mailbox = %name, "creating mailbox");
        self.exec(Some(&format!("CREATE {}", munge(self.unicode, &name))), ExecFlags::empty())
            .await
    }

    /// Renames `from` to `to`.
    ///
    /// # Errors
    ///
    /// Fails if the server refuses.
    pub async fn rename_mailbox(&mut self, from: &str, to: &str) -> Result<()> {
        self.require_login()?;
        let from = self.canonical_name(from);
        let to = self.canonical_name(to);
        info!(%from, %to, "renaming mailbox");
        let cmd = format!("RENAME {} {}", munge(self.unicode, &from), munge(self.unicode, &to));
        self.exec(Some(&cmd), ExecFlags::empty()).await
    }

    /// Deletes `path`.
    ///
    /// # Errors
    ///
    /// Fails if the server refuses.
    pub async fn delete_mailbox(&mut self, path: &str) -> Result<()> {
        self.require_login()?;
        let name = self.canonical_name(path);
        info!(mailbox = %name, "deleting mailbox");
        self.exec(Some(&format!("DELETE {}", munge(self.unicode, &name))), ExecFlags::empty())
            .await
    }

    /// Completes a partial folder name as far as it is unambiguous.
    ///
    /// Folders that can't be selected get the delimiter appended so the
    /// next completion descends into them. Returns `None` if nothing
    /// matches.
    ///
    /// # Errors
    ///
    /// Fails if the listing fails.
    pub async fn complete(&mut self, partial: &str) -> Result<Option<String>> {
        self.require_login()?;
        let verb = if self.options.list_subscribed { "LSUB" } else { "LIST" };
        let cmd = format!("{verb} \"\" {}", munge(self.unicode, &format!("{partial}%")));
        let found = self.collect_list(&cmd).await?;

        let mut completion: Option<String> = None;
        for entry in found {
            let mut name = entry.name;
            if entry.noselect
                && let Some(delim) = entry.delim
            {
                name.push(delim);
            }
            completion = Some(match completion {
                None => name,
                Some(prev) => common_prefix(&prev, &name).to_string(),
            });
        }
        Ok(completion)
    }

    /// `UID SEARCH criteria` on the selected mailbox.
    ///
    /// # Errors
    ///
    /// Fails if no mailbox is selected or the server refuses the search.
    pub async fn search(&mut self, criteria: &str) -> Result<Vec<u32>> {
        if self.state < AccountState::Selected || self.mailbox.is_none() {
            return Err(Error::InvalidState("no mailbox selected".to_string()));
        }
        self.search.clear();
        self.exec(Some(&format!("UID SEARCH {criteria}")), ExecFlags::empty())
            .await?;
        Ok(std::mem::take(&mut self.search))
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
    use std::time::Duration;

    use tokio_test::io::Builder;

    use super::*;
    use crate::config::ImapOptions;
    use crate::engine::tests::{account_with, account_with_options, select_with};

    fn authenticated(mock: tokio_test::io::Mock) -> ImapAccount {
        let mut account = account_with(mock, AccountState::Authenticated);
        account.capabilities = Capabilities::IMAP4REV1;
        account.delim = Some('/');
        account
    }

    #[tokio::test]
    async fn test_list_collects_entries() {
        let mock = Builder::new()
            .write(b"a0001 LIST \"\" \"*\"\r\n")
            .read(b"* LIST (\\HasNoChildren) \"/\" INBOX\r\n")
            .read(b"* LIST (\\Noselect) \"/\" \"Archive\"\r\n")
            .read(b"a0001 OK LIST completed\r\n")
            .build();
        let mut account = authenticated(mock);

        let entries = account.list("", "*").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "INBOX");
        assert!(entries[0].noinferiors);
        assert!(entries[1].noselect);
        assert!(account.cmdresult.is_none());
    }

    #[tokio::test]
    async fn test_list_decodes_names() {
        let mock = Builder::new()
            .write(b"a0001 LSUB \"\" \"*\"\r\n")
            .read(b"* LSUB () \"/\" \"Entw&APw-rfe\"\r\na0001 OK done\r\n")
            .build();
        let mut account = authenticated(mock);
        let entries = account.lsub("", "*").await.unwrap();
        assert_eq!(entries[0].name, "Entw\u{fc}rfe");
    }

    #[tokio::test]
    async fn test_browse_folder() {
        let mock = Builder::new()
            .write(b"a0001 LIST \"\" \"Lists\"\r\n")
            .read(b"* LIST () \"/\" \"Lists\"\r\na0001 OK done\r\n")
            .write(b"a0002 LIST \"\" \"Lists/%\"\r\n")
            .read(b"* LIST (\\HasNoChildren) \"/\" \"Lists/rust\"\r\n")
            .read(b"* LIST () \"/\" \"Lists/go\"\r\na0002 OK done\r\n")
            .build();
        let mut account = authenticated(mock);

        let entries = account.browse("Lists").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].desc, "rust");
        assert!(!entries[0].inferiors);
        assert_eq!(entries[1].desc, "go/");
        assert_eq!(entries[1].name, "Lists/go");
    }

    #[tokio::test]
    async fn test_browse_root_adds_inbox() {
        let mock = Builder::new()
            .write(b"a0001 LIST \"\" \"%\"\r\n")
            .read(b"* LIST (\\HasNoChildren) \"/\" \"Sent\"\r\na0001 OK done\r\n")
            .write(b"a0002 LIST \"\" \"INBOX\"\r\n")
            .read(b"* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\na0002 OK done\r\n")
            .build();
        let mut account = authenticated(mock);

        let names: Vec<String> = account.browse("").await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Sent".to_string(), "INBOX".to_string()]);
    }

    #[tokio::test]
    async fn test_status_poll() {
        let mock = Builder::new()
            .write(b"a0001 STATUS \"Sent\" (UIDNEXT UIDVALIDITY UNSEEN RECENT MESSAGES)\r\n")
            .read(b"* STATUS \"Sent\" (UIDNEXT 12 UIDVALIDITY 3 UNSEEN 1 RECENT 0 MESSAGES 11)\r\n")
            .read(b"a0001 OK STATUS completed\r\n")
            .build();
        let mut account = authenticated(mock);

        let status = account.status("Sent", false).await.unwrap().unwrap();
        assert_eq!(status.messages, 11);
        assert_eq!(status.uid_next, 12);
        assert_eq!(status.uidvalidity, 3);
        assert_eq!(account.mailbox_status("Sent").unwrap().unseen, 1);
    }

    #[tokio::test]
    async fn test_status_legacy_keyword_queued() {
        let mock = Builder::new()
            .write(b"a0001 STATUS \"Sent\" (UIDNEXT UID-VALIDITY UNSEEN RECENT MESSAGES)\r\n")
            .read(b"* STATUS \"Sent\" (UID-VALIDITY 9 MESSAGES 2)\r\na0001 OK done\r\n")
            .build();
        let mut account = authenticated(mock);
        account.capabilities = Capabilities::IMAP4 | Capabilities::STATUS;

        assert!(account.status("Sent", true).await.unwrap().is_none());
        account.flush().await.unwrap();
        let status = account.mailbox_status("Sent").unwrap();
        assert_eq!(status.uidvalidity, 9);
        assert_eq!(status.messages, 2);
    }

    #[tokio::test]
    async fn test_status_of_selected_mailbox_is_local() {
        let mock = Builder::new().build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[1, 2, 3]);
        let status = account.status("inbox", false).await.unwrap().unwrap();
        assert_eq!(status.messages, 3);
    }

    #[tokio::test]
    async fn test_status_unsupported() {
        let mock = Builder::new().build();
        let mut account = authenticated(mock);
        account.capabilities = Capabilities::IMAP4;
        assert!(matches!(account.status("Sent", false).await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_subscribe_tracks_list() {
        let options = ImapOptions::builder()
            .check_subscribed(true)
            .poll_timeout(Duration::ZERO)
            .build()
            .unwrap();
        let mock = Builder::new()
            .write(b"a0001 SUBSCRIBE \"Lists/rust\"\r\n")
            .read(b"a0001 OK done\r\n")
            .write(b"a0002 UNSUBSCRIBE \"Lists/rust\"\r\n")
            .read(b"a0002 OK done\r\n")
            .build();
        let mut account = account_with_options(mock, options, AccountState::Authenticated);
        account.delim = Some('/');

        account.subscribe("Lists/rust", true).await.unwrap();
        assert_eq!(account.subscribed(), ["Lists/rust".to_string()]);
        account.subscribe("Lists/rust", false).await.unwrap();
        assert!(account.subscribed().is_empty());
    }

    #[tokio::test]
    async fn test_create_rename_delete() {
        let mock = Builder::new()
            .write(b"a0001 CREATE \"Projects/new\"\r\n")
            .read(b"a0001 OK done\r\n")
            .write(b"a0002 RENAME \"Projects/new\" \"Projects/old\"\r\n")
            .read(b"a0002 OK done\r\n")
            .write(b"a0003 DELETE \"Projects/old\"\r\n")
            .read(b"a0003 NO [INUSE] mailbox in use\r\n")
            .build();
        let mut account = authenticated(mock);

        account.create_mailbox("Projects/new/").await.unwrap();
        account.rename_mailbox("Projects/new", "Projects//old").await.unwrap();
        let err = account.delete_mailbox("Projects/old").await.unwrap_err();
        assert!(matches!(err, Error::No(_)));
        assert!(!account.is_fatal());
    }

    #[tokio::test]
    async fn test_complete() {
        let mock = Builder::new()
            .write(b"a0001 LIST \"\" \"Li%\"\r\n")
            .read(b"* LIST () \"/\" \"Lists\"\r\n* LIST (\\Noselect) \"/\" \"Library\"\r\na0001 OK done\r\n")
            .write(b"a0002 LIST \"\" \"Arch%\"\r\n")
            .read(b"* LIST (\\Noselect) \"/\" \"Archive\"\r\na0002 OK done\r\n")
            .write(b"a0003 LIST \"\" \"zz%\"\r\n")
            .read(b"a0003 OK done\r\n")
            .build();
        let mut account = authenticated(mock);

        assert_eq!(account.complete("Li").await.unwrap().as_deref(), Some("Li"));
        assert_eq!(account.complete("Arch").await.unwrap().as_deref(), Some("Archive/"));
        assert_eq!(account.complete("zz").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_search() {
        let mock = Builder::new()
            .write(b"a0001 UID SEARCH UNSEEN\r\n")
            .read(b"* SEARCH 4 9\r\na0001 OK done\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[4, 9]);
        assert_eq!(account.search("UNSEEN").await.unwrap(), vec![4, 9]);
    }
}
