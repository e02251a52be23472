//! Writing local changes back to the server.

use std::time::Instant;

use neomutt_hcache::HeaderCache;
use tracing::{debug, warn};

use super::{CheckResult, Email, ReopenFlags, cache_value};
use crate::command::ExecFlags;
use crate::engine::{AccountState, ImapAccount};
use crate::seqset::compress_chunked;
use crate::types::{AclRights, Capabilities, MessageFlags};
use crate::{Error, Result};

/// Longest UID set put into a single command.
const MAX_SET_LEN: usize = 900;

/// The flags `sync_mailbox` writes, in the order it writes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncFlag {
    Deleted,
    Flagged,
    Old,
    Seen,
    Answered,
}

impl SyncFlag {
    const ALL: [Self; 5] = [Self::Deleted, Self::Flagged, Self::Old, Self::Seen, Self::Answered];

    const fn name(self) -> &'static str {
        match self {
            Self::Deleted => "\\Deleted",
            Self::Flagged => "\\Flagged",
            Self::Old => "Old",
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
        }
    }

    const fn right(self) -> AclRights {
        match self {
            Self::Deleted => AclRights::DELETE,
            Self::Seen => AclRights::SEEN,
            Self::Flagged | Self::Old | Self::Answered => AclRights::WRITE,
        }
    }

    const fn get(self, flags: &MessageFlags) -> bool {
        match self {
            Self::Deleted => flags.deleted,
            Self::Flagged => flags.flagged,
            Self::Old => flags.old,
            Self::Seen => flags.read,
            Self::Answered => flags.replied,
        }
    }
}

impl ImapAccount {
    /// Cleans up after messages the server expunged.
    pub(crate) async fn expunge_mailbox(&mut self) {
        let hcache = self.take_hcache();
        self.expunge_mailbox_with(hcache.as_ref()).await;
        self.restore_hcache(hcache);
    }

    pub(crate) async fn expunge_mailbox_with(&mut self, hc: Option<&HeaderCache>) {
        let Some(mbox) = self.mailbox.as_mut() else {
            return;
        };
        let gone = std::mem::take(&mut mbox.expunged);
        // sync_mailbox switches messages off while their STORE is in flight
        for email in mbox.uid_hash.values_mut() {
            email.active = true;
        }
        mbox.last_modified = Instant::now();

        for email in gone {
            debug!(uid = email.uid, "expunging message");
            self.cache_del(email.uid).await;
            if let Some(hc) = hc {
                cache_value("dropping header", hc.delete(&HeaderCache::uid_key(email.uid)).await);
            }
        }
    }

    /// Queues `pre SET post` over `uids` (sorted), split so that no command
    /// grows too long. Returns the number of UIDs covered.
    pub(crate) async fn exec_msg_set(&mut self, pre: &str, post: &str, uids: &[u32]) -> Result<usize> {
        for set in compress_chunked(uids, MAX_SET_LEN) {
            let cmd = if post.is_empty() {
                format!("{pre} {set}")
            } else {
                format!("{pre} {set} {post}")
            };
            self.exec(Some(&cmd), ExecFlags::QUEUE).await?;
        }
        Ok(uids.len())
    }

    /// UIDs of live, changed messages whose `flag` differs from the server
    /// and is set locally (cleared, with `invert`).
    fn changed_uids(&self, flag: SyncFlag, invert: bool) -> Vec<u32> {
        let Some(mbox) = self.mailbox.as_ref() else {
            return Vec::new();
        };
        let mut uids: Vec<u32> = mbox
            .emails()
            .filter(|e| e.changed && e.active)
            .filter(|e| {
                let local = flag.get(&e.flags);
                local != flag.get(&e.server_flags) && (invert ^ local)
            })
            .map(|e| e.uid)
            .collect();
        uids.sort_unstable();
        uids
    }

    async fn sync_flag(&mut self, flag: SyncFlag) -> Result<usize> {
        let Some(mbox) = self.mailbox.as_ref() else {
            return Ok(0);
        };
        if !mbox.rights.contains(flag.right()) {
            return Ok(0);
        }
        if flag.right() == AclRights::WRITE && !mbox.has_flag(flag.name()) {
            debug!(flag = flag.name(), "server does not keep this flag");
            return Ok(0);
        }

        let set = self.changed_uids(flag, false);
        let mut count = self
            .exec_msg_set("UID STORE", &format!("+FLAGS.SILENT ({})", flag.name()), &set)
            .await?;
        let unset = self.changed_uids(flag, true);
        count += self
            .exec_msg_set("UID STORE", &format!("-FLAGS.SILENT ({})", flag.name()), &unset)
            .await?;
        Ok(count)
    }

    /// Drops cached copies of deleted messages and refreshes the cached
    /// headers of changed ones.
    async fn save_changed(&mut self) {
        let Some(mbox) = self.mailbox.as_ref() else {
            return;
        };
        let uidvalidity = mbox.status.uidvalidity;
        let deleted: Vec<u32> = mbox.emails().filter(|e| e.flags.deleted).map(|e| e.uid).collect();
        let changed: Vec<Email> = mbox.emails().filter(|e| e.active && e.changed).cloned().collect();

        let hcache = self.take_hcache();
        for uid in deleted {
            self.cache_del(uid).await;
            if let Some(hc) = &hcache {
                cache_value("dropping header", hc.delete(&HeaderCache::uid_key(uid)).await);
            }
        }
        if let Some(hc) = &hcache {
            for email in &changed {
                cache_value(
                    "storing header",
                    hc.store(&HeaderCache::uid_key(email.uid), uidvalidity, email).await,
                );
            }
        }
        self.restore_hcache(hcache);
    }

    /// Writes every local change to the server.
    ///
    /// With `expunge`, deleted messages are purged: by `EXPUNGE` (or
    /// `UID EXPUNGE` of just our deletions under UIDPLUS while unloaded
    /// messages remain), or by `CLOSE`
    /// when `close` is also set, which leaves the account authenticated.
    /// Returns what the preceding mailbox check found.
    ///
    /// # Errors
    ///
    /// Fails if no mailbox is selected or a STORE or EXPUNGE is refused.
    /// When closing, the [`crate::Prompt`] is asked whether to close anyway
    /// after a failed STORE.
    pub async fn sync_mailbox(&mut self, expunge: bool, close: bool) -> Result<CheckResult> {
        if self.state < AccountState::Selected || self.mailbox.is_none() {
            return Err(Error::InvalidState("no mailbox selected".to_string()));
        }
        if let Some(mbox) = self.mailbox.as_mut() {
            mbox.reopen |= ReopenFlags::ALLOW;
        }
        let check = self.check_mailbox(false).await?;

        let rights = self.mailbox.as_ref().map_or(AclRights::empty(), |m| m.rights);
        if expunge && rights.contains(AclRights::DELETE) {
            // deleted messages go first, and quietly
            let uids = self.changed_uids(SyncFlag::Deleted, false);
            let count = self
                .exec_msg_set("UID STORE", "+FLAGS.SILENT (\\Deleted)", &uids)
                .await?;
            if count > 0 {
                debug!(count, "marking messages deleted");
                if let Some(mbox) = self.mailbox.as_mut() {
                    for uid in &uids {
                        if let Some(email) = mbox.email_mut(*uid) {
                            email.active = false;
                        }
                    }
                }
            }
        }

        self.save_changed().await;

        let mut result = Ok(());
        for flag in SyncFlag::ALL {
            if let Err(e) = self.sync_flag(flag).await {
                result = Err(e);
                break;
            }
        }
        if result.is_ok() {
            result = self.flush().await;
        }
        if let Err(e) = result {
            if e.is_fatal() {
                return Err(e);
            }
            if close
                && self
                    .collab
                    .prompt
                    .confirm("Error saving flags. Close anyway?", false)
                    .await
            {
                self.state = AccountState::Authenticated;
                return Ok(check);
            }
            warn!(error = %e, "error saving flags");
            return Err(e);
        }

        if let Some(mbox) = self.mailbox.as_mut() {
            for email in mbox.uid_hash.values_mut() {
                email.mark_synced();
            }
        }

        if expunge && !close && rights.contains(AclRights::DELETE) {
            debug!("expunging messages from server");
            if let Some(mbox) = self.mailbox.as_mut() {
                mbox.reopen |= ReopenFlags::EXPUNGE_EXPECTED;
            }
            let purged = self.purge_deleted().await;
            if let Some(mbox) = self.mailbox.as_mut() {
                mbox.reopen -= ReopenFlags::EXPUNGE_EXPECTED;
            }
            if let Err(e) = purged {
                warn!(error = %e, "EXPUNGE failed");
                return Err(e);
            }
        }

        if expunge && close {
            self.closing = true;
            if let Err(e) = self.exec(Some("CLOSE"), ExecFlags::empty()).await {
                if e.is_fatal() {
                    return Err(e);
                }
                debug!(error = %e, "CLOSE failed");
            }
            self.state = AccountState::Authenticated;
        }

        if self.options.message_cache_clean {
            self.cache_clean().await;
        }
        Ok(check)
    }

    /// Plain `EXPUNGE` unless the server holds messages not loaded here,
    /// which may carry `\Deleted` from elsewhere. Then, under UIDPLUS, only
    /// our deletions go.
    async fn purge_deleted(&mut self) -> Result<()> {
        let Some(mbox) = self.mailbox.as_ref() else {
            return Ok(());
        };
        let partial = mbox.new_mail_count > mbox.highest_msn();
        if !partial || !self.capabilities.contains(Capabilities::UIDPLUS) {
            return self.exec(Some("EXPUNGE"), ExecFlags::empty()).await;
        }
        let mut uids: Vec<u32> = mbox.emails().filter(|e| e.flags.deleted).map(|e| e.uid).collect();
        if uids.is_empty() {
            return Ok(());
        }
        uids.sort_unstable();
        self.exec_msg_set("UID EXPUNGE", "", &uids).await?;
        self.flush().await
    }

    /// Replaces the server flags of `uid` with the local ones, so that a
    /// `UID COPY` carries them. `\Deleted` is left as the server has it.
    ///
    /// # Errors
    ///
    /// Fails if the message is unknown, or the STORE is refused and the
    /// [`crate::Prompt`] says not to continue.
    pub async fn sync_message_for_copy(&mut self, uid: u32) -> Result<()> {
        let mbox = self
            .mailbox
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no mailbox selected".to_string()))?;
        let rights = mbox.rights;
        let email = mbox
            .email_mut(uid)
            .ok_or_else(|| Error::InvalidState(format!("no message with UID {uid}")))?;

        let local = &email.flags;
        let server = &email.server_flags;
        if local.read == server.read
            && local.old == server.old
            && local.flagged == server.flagged
            && local.replied == server.replied
        {
            if local.deleted == server.deleted {
                email.changed = false;
            }
            return Ok(());
        }

        let write = rights.contains(AclRights::WRITE);
        let mut flags = Vec::new();
        let add = |right: AclRights, on: bool, name: &str, flags: &mut Vec<String>| {
            if on && rights.contains(right) {
                flags.push(name.to_string());
            }
        };
        add(AclRights::SEEN, local.read, "\\Seen", &mut flags);
        add(AclRights::WRITE, local.old, "Old", &mut flags);
        add(AclRights::WRITE, local.flagged, "\\Flagged", &mut flags);
        add(AclRights::WRITE, local.replied, "\\Answered", &mut flags);
        add(AclRights::DELETE, server.deleted, "\\Deleted", &mut flags);
        if write {
            flags.extend(local.system.iter().cloned());
            flags.extend(local.keywords.iter().cloned());
        }

        // some servers reject an empty list, so revoke what we may instead
        let verb = if flags.is_empty() {
            add(AclRights::SEEN, true, "\\Seen", &mut flags);
            add(AclRights::WRITE, true, "Old", &mut flags);
            add(AclRights::WRITE, true, "\\Flagged", &mut flags);
            add(AclRights::WRITE, true, "\\Answered", &mut flags);
            add(AclRights::DELETE, !server.deleted, "\\Deleted", &mut flags);
            if write {
                flags.extend(server.keywords.iter().cloned());
            }
            "-FLAGS.SILENT"
        } else {
            "FLAGS.SILENT"
        };

        if !flags.is_empty() {
            let cmd = format!("UID STORE {uid} {verb} ({})", flags.join(" "));
            if let Err(e) = self.exec(Some(&cmd), ExecFlags::empty()).await {
                if e.is_fatal()
                    || !self
                        .collab
                        .prompt
                        .confirm("STORE failed. Continue anyway?", false)
                        .await
                {
                    return Err(e);
                }
            }
        }

        if let Some(email) = self.mailbox.as_mut().and_then(|m| m.email_mut(uid)) {
            let deleted = email.server_flags.deleted;
            email.server_flags = email.flags.clone();
            email.server_flags.deleted = deleted;
            if email.flags.deleted == deleted {
                email.changed = false;
            }
        }
        Ok(())
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

    use async_trait::async_trait;
    use tokio_test::io::Builder;

    use super::*;
    use crate::engine::Collaborators;
    use crate::engine::tests::{account_with, select_with};
    use crate::prompt::Prompt;

    fn selected(mock: tokio_test::io::Mock, uids: &[u32]) -> ImapAccount {
        let mut account = account_with(mock, AccountState::Selected);
        account.capabilities = Capabilities::IMAP4REV1;
        select_with(&mut account, uids);
        account.mailbox_mut().unwrap().permanent_flags = vec!["\\Seen".into(), "\\Deleted".into(), "\\*".into()];
        account
    }

    fn change(account: &mut ImapAccount, uid: u32, f: impl FnOnce(&mut MessageFlags)) {
        let email = account.mailbox_mut().unwrap().email_mut(uid).unwrap();
        f(&mut email.flags);
        email.changed = true;
    }

    struct Yes;

    #[async_trait]
    impl Prompt for Yes {
        async fn user(&self, _host: &str) -> Option<String> {
            None
        }
        async fn login(&self, _host: &str, _user: &str) -> Option<String> {
            None
        }
        async fn pass(&self, _host: &str, _user: &str) -> Option<String> {
            None
        }
        async fn confirm(&self, _question: &str, _default: bool) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_flags_batched_by_range() {
        let mock = Builder::new()
            .write(b"a0001 UID STORE 1:2,4 +FLAGS.SILENT (\\Seen)\r\na0002 UID STORE 3 -FLAGS.SILENT (\\Seen)\r\n")
            .read(b"a0001 OK done\r\na0002 OK done\r\n")
            .build();
        let mut account = selected(mock, &[1, 2, 3, 4]);
        account.mailbox_mut().unwrap().email_mut(3).unwrap().server_flags.read = true;
        for uid in [1, 2, 4] {
            change(&mut account, uid, |f| f.read = true);
        }
        change(&mut account, 3, |f| f.read = false);

        assert_eq!(account.sync_mailbox(false, false).await.unwrap(), CheckResult::NoChange);
        let mbox = account.mailbox().unwrap();
        assert!(mbox.emails().all(|e| !e.changed));
        assert!(mbox.email(1).unwrap().server_flags.read);
    }

    #[tokio::test]
    async fn test_expunge_marks_deleted_first() {
        let mock = Builder::new()
            .write(b"a0001 UID STORE 2 +FLAGS.SILENT (\\Deleted)\r\na0002 UID STORE 1 +FLAGS.SILENT (\\Flagged)\r\n")
            .read(b"a0001 OK done\r\na0002 OK done\r\n")
            .write(b"a0003 EXPUNGE\r\n")
            .read(b"* 2 EXPUNGE\r\n")
            .read(b"a0003 OK EXPUNGE completed\r\n")
            .build();
        let mut account = selected(mock, &[1, 2, 3]);
        change(&mut account, 2, |f| f.deleted = true);
        change(&mut account, 1, |f| f.flagged = true);

        assert_eq!(account.sync_mailbox(true, false).await.unwrap(), CheckResult::NoChange);
        let mbox = account.mailbox().unwrap();
        assert_eq!(mbox.uids(), vec![1, 3]);
        assert!(mbox.expunged.is_empty());
        assert!(mbox.emails().all(|e| e.active));
        // the client asked for it, so it is not news
        assert!(!mbox.check_status.contains(ReopenFlags::EXPUNGE_PENDING));
    }

    #[tokio::test]
    async fn test_uid_expunge_with_uidplus() {
        let mock = Builder::new()
            .write(b"a0001 UID STORE 3 +FLAGS.SILENT (\\Deleted)\r\n")
            .read(b"a0001 OK done\r\n")
            .write(b"a0002 UID EXPUNGE 3\r\n")
            .read(b"* 3 EXPUNGE\r\na0002 OK done\r\n")
            .build();
        let mut account = selected(mock, &[1, 2, 3]);
        account.capabilities |= Capabilities::UIDPLUS;
        // a fourth message exists but has not been fetched
        account.mailbox_mut().unwrap().new_mail_count = 4;
        change(&mut account, 3, |f| f.deleted = true);

        account.sync_mailbox(true, false).await.unwrap();
        assert_eq!(account.mailbox().unwrap().uids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_plain_expunge_when_fully_loaded() {
        let mock = Builder::new()
            .write(b"a0001 UID STORE 3 +FLAGS.SILENT (\\Deleted)\r\n")
            .read(b"a0001 OK done\r\n")
            .write(b"a0002 EXPUNGE\r\n")
            .read(b"* 3 EXPUNGE\r\na0002 OK done\r\n")
            .build();
        let mut account = selected(mock, &[1, 2, 3]);
        account.capabilities |= Capabilities::UIDPLUS;
        change(&mut account, 3, |f| f.deleted = true);

        account.sync_mailbox(true, false).await.unwrap();
        assert_eq!(account.mailbox().unwrap().uids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_close_sends_close() {
        let mock = Builder::new()
            .write(b"a0001 UID STORE 1 +FLAGS.SILENT (\\Deleted)\r\n")
            .read(b"a0001 OK done\r\n")
            .write(b"a0002 CLOSE\r\n")
            .read(b"a0002 OK CLOSE completed\r\n")
            .build();
        let mut account = selected(mock, &[1]);
        change(&mut account, 1, |f| f.deleted = true);

        account.sync_mailbox(true, true).await.unwrap();
        assert_eq!(account.state(), AccountState::Authenticated);
    }

    #[tokio::test]
    async fn test_store_failure_when_closing_asks() {
        let mock = Builder::new()
            .write(b"a0001 UID STORE 1 +FLAGS.SILENT (\\Seen)\r\n")
            .read(b"a0001 NO mailbox is read-only\r\n")
            .build();
        let mut account = selected(mock, &[1]).with_collaborators(Collaborators {
            prompt: Arc::new(Yes),
            ..Collaborators::default()
        });
        change(&mut account, 1, |f| f.read = true);

        account.sync_mailbox(false, true).await.unwrap();
        assert_eq!(account.state(), AccountState::Authenticated);
    }

    #[tokio::test]
    async fn test_rights_gate_flags() {
        let mock = Builder::new().build();
        let mut account = selected(mock, &[1]);
        account.mailbox_mut().unwrap().rights = AclRights::LOOKUP | AclRights::READ;
        change(&mut account, 1, |f| {
            f.read = true;
            f.flagged = true;
        });
        account.sync_mailbox(false, false).await.unwrap();
        assert!(!account.mailbox().unwrap().email(1).unwrap().changed);
    }

    #[tokio::test]
    async fn test_unknown_permanent_flag_skipped() {
        let mock = Builder::new()
            .write(b"a0001 UID STORE 1 +FLAGS.SILENT (\\Seen)\r\n")
            .read(b"a0001 OK done\r\n")
            .build();
        let mut account = selected(mock, &[1]);
        account.mailbox_mut().unwrap().permanent_flags = vec!["\\Seen".into()];
        change(&mut account, 1, |f| {
            f.read = true;
            f.old = true;
        });
        account.sync_mailbox(false, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_for_copy_replaces_flags() {
        let mock = Builder::new()
            .write(b"a0001 UID STORE 5 FLAGS.SILENT (\\Seen \\Flagged $Work)\r\n")
            .read(b"a0001 OK done\r\n")
            .build();
        let mut account = selected(mock, &[5]);
        change(&mut account, 5, |f| {
            f.read = true;
            f.flagged = true;
            f.deleted = true;
            f.keywords.push("$Work".to_string());
        });

        account.sync_message_for_copy(5).await.unwrap();
        let email = account.mailbox().unwrap().email(5).unwrap();
        assert!(email.server_flags.read && email.server_flags.flagged);
        // \Deleted is not carried into the copy
        assert!(!email.server_flags.deleted);
        assert!(email.changed);
    }

    #[tokio::test]
    async fn test_sync_for_copy_revokes_when_empty() {
        let mock = Builder::new()
            .write(b"a0001 UID STORE 5 -FLAGS.SILENT (\\Seen Old \\Flagged \\Answered \\Deleted)\r\n")
            .read(b"a0001 OK done\r\n")
            .build();
        let mut account = selected(mock, &[5]);
        account.mailbox_mut().unwrap().email_mut(5).unwrap().server_flags.read = true;
        change(&mut account, 5, |f| f.read = false);

        account.sync_message_for_copy(5).await.unwrap();
        assert!(!account.mailbox().unwrap().email(5).unwrap().changed);
    }

    #[tokio::test]
    async fn test_sync_for_copy_nothing_to_do() {
        let mock = Builder::new().build();
        let mut account = selected(mock, &[5]);
        change(&mut account, 5, |_| {});
        account.sync_message_for_copy(5).await.unwrap();
        assert!(!account.mailbox().unwrap().email(5).unwrap().changed);
    }
}
