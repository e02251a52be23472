//! Opening and closing mailboxes.

use neomutt_hcache::HeaderCache;
use tracing::{debug, info, trace, warn};

use super::{Email, ImapMailbox, ReopenFlags, cache_value};
use crate::command::{CommandState, ExecFlags};
use crate::engine::{AccountState, AccountStatus, ImapAccount};
use crate::parser::UntaggedResponse;
use crate::path::{fix_path, fix_path_with_delim, munge};
use crate::seqset::{SeqsetIterator, compress};
use crate::types::{AclRights, Capabilities, ResponseCode};
use crate::{Error, Result};

impl ImapAccount {
    /// Canonical server name for a user-typed path.
    pub(crate) fn canonical_name(&self, path: &str) -> String {
        let name = match self.delim {
            Some(delim) => fix_path_with_delim(delim, path),
            None => fix_path(&self.options.delim_chars, path),
        };
        if name.is_empty() { "INBOX".to_string() } else { name }
    }

    /// Selects `path`, or examines it if `readonly`.
    ///
    /// Rights are asked for alongside the SELECT when the server does ACL.
    /// The headers of every message are then loaded, from the header
    /// cache where it is still valid.
    ///
    /// # Errors
    ///
    /// Fails if the account is not logged in, the server refuses the
    /// mailbox, or loading the headers fails. The account is left
    /// authenticated with no mailbox.
    pub async fn select(&mut self, path: &str, readonly: bool) -> Result<()> {
        if self.status == AccountStatus::Fatal {
            return Err(Error::Fatal);
        }
        if self.state < AccountState::Authenticated {
            return Err(Error::InvalidState("not logged in".to_string()));
        }

        let name = self.canonical_name(path);
        self.release_mailbox().await;
        info!(mailbox = %name, readonly, "selecting mailbox");

        match self.open_selected(&name, readonly).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.state >= AccountState::Selected {
                    self.state = AccountState::Authenticated;
                }
                if let Some(mbox) = self.mailbox.take()
                    && let Some(hc) = mbox.hcache
                {
                    cache_value("closing header cache", hc.close().await);
                }
                Err(e)
            }
        }
    }

    async fn open_selected(&mut self, name: &str, readonly: bool) -> Result<()> {
        let mut mbox = ImapMailbox::new(name, munge(self.unicode, name));
        mbox.readonly = readonly;
        self.status = AccountStatus::Ok;

        if self.capabilities.contains(Capabilities::ACL) {
            mbox.rights = AclRights::empty();
            let cmd = format!("MYRIGHTS {}", mbox.munged);
            self.mailbox = Some(mbox);
            self.exec(Some(&cmd), ExecFlags::QUEUE).await?;
        } else {
            mbox.rights = AclRights::LOOKUP
                | AclRights::READ
                | AclRights::SEEN
                | AclRights::WRITE
                | AclRights::INSERT
                | AclRights::POST
                | AclRights::CREATE
                | AclRights::DELETE;
            self.mailbox = Some(mbox);
        }

        let hcache = self.open_hcache(name).await;
        let param = match &hcache {
            Some(hc) if self.qresync => self.preload_qresync(hc).await,
            _ => None,
        };
        let preloaded = param.is_some();
        let param = param.unwrap_or_else(|| {
            if self.capabilities.contains(Capabilities::CONDSTORE) && self.options.condstore {
                " (CONDSTORE)".to_string()
            } else {
                String::new()
            }
        });
        self.restore_hcache(hcache);

        if self.options.check_subscribed {
            self.exec(Some("LSUB \"\" \"*\""), ExecFlags::QUEUE).await?;
        }

        let Some(mbox) = self.mailbox.as_ref() else {
            return Err(Error::Fatal);
        };
        let verb = if mbox.readonly { "EXAMINE" } else { "SELECT" };
        let cmd = format!("{verb} {}{param}", mbox.munged);
        self.state = AccountState::Selected;
        self.start(Some(&cmd), ExecFlags::empty()).await?;

        let mut count = 0;
        let state = loop {
            let state = self.step().await?;
            match self.take_response() {
                Some(UntaggedResponse::Exists(n)) => count = n,
                Some(UntaggedResponse::Ok { code: Some(code), .. }) => self.select_code(code),
                _ => {}
            }
            if state != CommandState::Continue {
                break state;
            }
        };
        if state != CommandState::Ok {
            return Err(self.failure(state));
        }

        let acl = self.capabilities.contains(Capabilities::ACL);
        let server_readonly = self.last_code == Some(ResponseCode::ReadOnly);
        let Some(mbox) = self.mailbox.as_mut() else {
            return Err(Error::Fatal);
        };
        if server_readonly && !acl {
            debug!("mailbox is read-only");
            mbox.readonly = true;
        }
        if !mbox.rights.intersects(AclRights::writable()) {
            mbox.readonly = true;
        }
        trace!(flags = ?mbox.flags, permanent = ?mbox.permanent_flags, "mailbox flags");
        mbox.new_mail_count = 0;
        mbox.reopen -= ReopenFlags::NEWMAIL_PENDING;

        if count > 0 || preloaded {
            self.read_headers_with(1, count, true, preloaded).await?;
        } else if let Some(mbox) = self.mailbox.as_mut() {
            mbox.reopen |= ReopenFlags::ALLOW;
        }
        debug!(
            messages = self.mailbox.as_ref().map_or(0, ImapMailbox::message_count),
            "mailbox opened"
        );
        Ok(())
    }

    fn select_code(&mut self, code: ResponseCode) {
        let Some(mbox) = self.mailbox.as_mut() else {
            return;
        };
        match code {
            ResponseCode::PermanentFlags(flags) => mbox.permanent_flags = flags,
            ResponseCode::UidValidity(n) => mbox.status.uidvalidity = n,
            ResponseCode::UidNext(n) => mbox.status.uid_next = n,
            ResponseCode::HighestModSeq(n) => mbox.status.modseq = n,
            ResponseCode::NoModSeq => {
                debug!("mailbox has NOMODSEQ set");
                mbox.status.modseq = 0;
            }
            _ => {}
        }
    }

    /// Opens the header cache for `name`, if there is a backend.
    async fn open_hcache(&mut self, name: &str) -> Option<HeaderCache> {
        let backend = self.collab.header_cache.as_ref()?;
        let file = match self.account.hcache_name(self.delim.unwrap_or('/'), name) {
            Ok(file) => file,
            Err(e) => {
                warn!(mailbox = %name, error = %e, "not caching headers");
                return None;
            }
        };
        cache_value("opening header cache", backend.open(&file).await).map(HeaderCache::new)
    }

    /// Fills the index from the cached UID set so a `SELECT (QRESYNC ...)`
    /// can bring it up to date. Returns the SELECT parameter.
    async fn preload_qresync(&mut self, hc: &HeaderCache) -> Option<String> {
        let uidvalidity = cache_value("reading UIDVALIDITY", hc.fetch_u32(HeaderCache::UIDVALIDITY).await).flatten()?;
        let modseq = cache_value("reading MODSEQ", hc.fetch_u64(HeaderCache::MODSEQ).await).flatten()?;
        let raw = cache_value("reading UIDSEQSET", hc.fetch_raw(HeaderCache::UIDSEQSET).await).flatten()?;
        let seqset = String::from_utf8(raw).ok()?;
        if uidvalidity == 0 || modseq == 0 {
            return None;
        }

        debug!(uidvalidity, modseq, "reading UID set from header cache");
        let mut loaded = Vec::new();
        let mut msn = 1;
        for uid in SeqsetIterator::new(seqset) {
            let Ok(uid) = uid else {
                debug!("corrupt UIDSEQSET in header cache");
                return None;
            };
            if uid == 0 {
                msn += 1;
                continue;
            }
            let key = HeaderCache::uid_key(uid);
            // a missing entry was expunged before the set was written
            if let Some(mut email) = cache_value("reading header", hc.fetch::<Email>(&key, uidvalidity).await).flatten() {
                email.uid = uid;
                email.msn = msn;
                email.changed = false;
                email.server_flags = email.flags.clone();
                loaded.push(email);
                msn += 1;
            }
        }

        let mbox = self.mailbox.as_mut()?;
        mbox.reserve_msn(msn - 1);
        let uids: Vec<u32> = loaded.iter().map(|e| e.uid).collect();
        for email in loaded {
            mbox.insert(email);
        }
        mbox.status.uidvalidity = uidvalidity;
        Some(format!(" (QRESYNC ({uidvalidity} {modseq} {}))", compress(uids)))
    }

    /// Closes the selected mailbox.
    ///
    /// CLOSE is only sent when nothing is marked deleted, so nothing gets
    /// expunged by accident; the next SELECT closes it otherwise.
    ///
    /// # Errors
    ///
    /// Only a broken connection is reported.
    pub async fn close_mailbox(&mut self) -> Result<()> {
        let Some(mbox) = self.mailbox.as_ref() else {
            return Ok(());
        };
        if self.status != AccountStatus::Fatal && self.state >= AccountState::Selected {
            if !mbox.emails().any(|e| e.flags.deleted) {
                self.closing = true;
                if let Err(e) = self.exec(Some("CLOSE"), ExecFlags::empty()).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    debug!(error = %e, "CLOSE failed");
                }
            }
            self.state = AccountState::Authenticated;
        }
        self.release_mailbox().await;
        Ok(())
    }

    /// Forgets the selected mailbox and closes its cache.
    pub(crate) async fn release_mailbox(&mut self) {
        let Some(mbox) = self.mailbox.take() else {
            return;
        };
        debug!(mailbox = %mbox.name, "releasing mailbox");
        if let Some(hc) = mbox.hcache {
            cache_value("closing header cache", hc.close().await);
        }
        self.prev_mailbox = Some(mbox.name);
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

    use neomutt_hcache::{Backend, MemoryBackend};
    use tokio_test::io::Builder;

    use super::*;
    use crate::engine::Collaborators;
    use crate::engine::tests::{account_with, select_with};

    #[tokio::test]
    async fn test_select_loads_headers() {
        let mock = Builder::new()
            .write(b"a0001 SELECT \"INBOX\"\r\n")
            .read(b"* FLAGS (\\Seen \\Deleted)\r\n* OK [PERMANENTFLAGS (\\Seen \\Deleted \\*)] ok\r\n")
            .read(b"* 2 EXISTS\r\n* OK [UIDVALIDITY 42] ok\r\n* OK [UIDNEXT 12] ok\r\n")
            .read(b"a0001 OK [READ-WRITE] SELECT completed\r\n")
            .write(b"a0002 FETCH 1:2 (UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER])\r\n")
            .read(b"* 1 FETCH (UID 10 FLAGS (\\Seen) BODY[HEADER] {2}\r\na\n)\r\n")
            .read(b"* 2 FETCH (UID 11 FLAGS () BODY[HEADER] {2}\r\nb\n)\r\n")
            .read(b"a0002 OK done\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Authenticated);
        account.capabilities = Capabilities::IMAP4REV1;

        account.select("", false).await.unwrap();
        assert_eq!(account.state(), AccountState::Selected);
        let mbox = account.mailbox().unwrap();
        assert_eq!(mbox.name, "INBOX");
        assert_eq!(mbox.uids(), vec![10, 11]);
        assert_eq!(mbox.status.uidvalidity, 42);
        assert_eq!(mbox.status.uid_next, 12);
        assert!(mbox.has_flag("$Junk"));
        assert!(!mbox.readonly);
        assert!(mbox.reopen.contains(ReopenFlags::ALLOW));
    }

    #[tokio::test]
    async fn test_select_with_acl_and_subscriptions() {
        let options = crate::config::ImapOptions::builder()
            .check_subscribed(true)
            .poll_timeout(std::time::Duration::ZERO)
            .build()
            .unwrap();
        let mock = Builder::new()
            .write(b"a0001 MYRIGHTS \"Lists/rust\"\r\na0002 LSUB \"\" \"*\"\r\na0003 SELECT \"Lists/rust\"\r\n")
            .read(b"* MYRIGHTS \"Lists/rust\" lr\r\na0001 OK done\r\n")
            .read(b"* LSUB () \"/\" \"Lists/rust\"\r\na0002 OK done\r\n")
            .read(b"* 0 EXISTS\r\na0003 OK [READ-WRITE] done\r\n")
            .build();
        let mut account = crate::engine::tests::account_with_options(mock, options, AccountState::Authenticated);
        account.capabilities = Capabilities::IMAP4REV1 | Capabilities::ACL;
        account.delim = Some('/');

        account.select("Lists//rust/", false).await.unwrap();
        let mbox = account.mailbox().unwrap();
        assert_eq!(mbox.name, "Lists/rust");
        assert_eq!(mbox.rights, AclRights::LOOKUP | AclRights::READ);
        assert!(mbox.readonly);
        assert_eq!(account.subscribed(), ["Lists/rust".to_string()]);
    }

    #[tokio::test]
    async fn test_examine_and_condstore() {
        let mock = Builder::new()
            .write(b"a0001 EXAMINE \"INBOX\" (CONDSTORE)\r\n")
            .read(b"* 0 EXISTS\r\n* OK [HIGHESTMODSEQ 900] ok\r\na0001 OK [READ-ONLY] done\r\n")
            .build();
        let options = crate::config::ImapOptions::builder()
            .condstore(true)
            .poll_timeout(std::time::Duration::ZERO)
            .build()
            .unwrap();
        let mut account = crate::engine::tests::account_with_options(mock, options, AccountState::Authenticated);
        account.capabilities = Capabilities::IMAP4REV1 | Capabilities::CONDSTORE;

        account.select("INBOX", true).await.unwrap();
        let mbox = account.mailbox().unwrap();
        assert!(mbox.readonly);
        assert_eq!(mbox.status.modseq, 900);
    }

    #[tokio::test]
    async fn test_select_failure_drops_mailbox() {
        let mock = Builder::new()
            .write(b"a0001 SELECT \"Nope\"\r\n")
            .read(b"a0001 NO [NONEXISTENT] no such mailbox\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[1]);

        let err = account.select("Nope", false).await.unwrap_err();
        assert!(matches!(err, Error::No(_)));
        assert!(account.mailbox().is_none());
        assert_eq!(account.state(), AccountState::Authenticated);
        assert!(!account.is_fatal());
    }

    #[tokio::test]
    async fn test_select_requires_login() {
        let mock = Builder::new().build();
        let mut account = account_with(mock, AccountState::Connected);
        assert!(matches!(account.select("INBOX", false).await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_qresync_preload() {
        let backend = MemoryBackend::new();
        let mock = Builder::new()
            .write(b"a0001 SELECT \"INBOX\" (QRESYNC (7 20 1:3))\r\n")
            .read(b"* 2 EXISTS\r\n* OK [UIDVALIDITY 7] ok\r\n* OK [UIDNEXT 4] ok\r\n* OK [HIGHESTMODSEQ 25] ok\r\n")
            .read(b"* VANISHED (EARLIER) 2\r\n* 2 FETCH (UID 3 FLAGS (\\Seen) MODSEQ (25))\r\n")
            .read(b"a0001 OK [READ-WRITE] done\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Authenticated);
        account.capabilities = Capabilities::IMAP4REV1 | Capabilities::CONDSTORE | Capabilities::QRESYNC;
        account.qresync = true;

        let file = account.account.hcache_name('/', "INBOX").unwrap();
        let hc = HeaderCache::new(backend.open(&file).await.unwrap());
        hc.store_u32(HeaderCache::UIDVALIDITY, 7).await.unwrap();
        hc.store_u32(HeaderCache::UIDNEXT, 4).await.unwrap();
        hc.store_u64(HeaderCache::MODSEQ, 20).await.unwrap();
        hc.store_raw(HeaderCache::UIDSEQSET, b"1:3").await.unwrap();
        for uid in 1..=3 {
            hc.store(&HeaderCache::uid_key(uid), 7, &Email::new(uid)).await.unwrap();
        }
        hc.close().await.unwrap();

        let mut account = account.with_collaborators(Collaborators {
            header_cache: Some(Arc::new(backend.clone())),
            ..Collaborators::default()
        });
        account.select("INBOX", false).await.unwrap();

        let mbox = account.mailbox().unwrap();
        assert_eq!(mbox.uids(), vec![1, 3]);
        assert!(mbox.email(3).unwrap().flags.read);

        let hc = mbox.hcache.as_ref().unwrap();
        assert!(hc.fetch::<Email>("/2", 7).await.unwrap().is_none());
        assert!(hc.fetch::<Email>("/3", 7).await.unwrap().unwrap().flags.read);
        assert_eq!(hc.fetch_u64(HeaderCache::MODSEQ).await.unwrap(), Some(25));
        assert_eq!(hc.fetch_raw(HeaderCache::UIDSEQSET).await.unwrap().unwrap(), b"1,3");
    }

    #[tokio::test]
    async fn test_close_sends_close() {
        let mock = Builder::new()
            .write(b"a0001 CLOSE\r\n")
            .read(b"a0001 OK closed\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[1, 2]);

        account.close_mailbox().await.unwrap();
        assert!(account.mailbox().is_none());
        assert_eq!(account.state(), AccountState::Authenticated);
        assert_eq!(account.prev_mailbox.as_deref(), Some("INBOX"));
    }

    #[tokio::test]
    async fn test_close_keeps_deleted_messages() {
        let mock = Builder::new().build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[1, 2]);
        account.mailbox_mut().unwrap().email_mut(2).unwrap().flags.deleted = true;

        account.close_mailbox().await.unwrap();
        assert!(account.mailbox().is_none());
        assert_eq!(account.state(), AccountState::Authenticated);
    }
}
