//! Server-side copies and uploads.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::format_internal_date;
use crate::command::{CommandState, ExecFlags};
use crate::engine::{AccountState, ImapAccount};
use crate::path::munge;
use crate::types::{Flag, MessageFlags, ResponseCode};
use crate::{Error, Result};

/// Rewrites bare LF line ends as CRLF.
fn to_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    let mut last = None;
    for &b in data {
        if b == b'\n' && last != Some(b'\r') {
            out.push(b'\r');
        }
        out.push(b);
        last = Some(b);
    }
    out
}

impl ImapAccount {
    fn require_selected(&self) -> Result<()> {
        if self.is_fatal() {
            return Err(Error::Fatal);
        }
        if self.state < AccountState::Selected || self.mailbox.is_none() {
            return Err(Error::InvalidState("no mailbox selected".to_string()));
        }
        Ok(())
    }

    /// Pushes local flag changes of `uids` so a COPY carries them.
    async fn sync_for_copy(&mut self, uids: &[u32], only_deleted: bool) -> Result<()> {
        let pending: Vec<u32> = self
            .mailbox
            .as_ref()
            .map(|mbox| {
                uids.iter()
                    .copied()
                    .filter(|&uid| {
                        mbox.email(uid)
                            .is_some_and(|e| e.active && e.changed && (!only_deleted || e.flags.deleted))
                    })
                    .collect()
            })
            .unwrap_or_default();
        for uid in pending {
            self.sync_message_for_copy(uid).await?;
        }
        Ok(())
    }

    /// `UID COPY` of `uids` to `dest`, creating `dest` once if the server
    /// answers TRYCREATE.
    async fn copy_uids(&mut self, uids: &[u32], dest: &str) -> Result<()> {
        let munged = munge(self.unicode, dest);
        let mut tried_create = false;
        loop {
            self.exec_msg_set("UID COPY", &munged, uids).await?;
            let Err(e) = self.flush().await else {
                return Ok(());
            };
            if e.is_fatal() || tried_create || self.last_code != Some(ResponseCode::TryCreate) {
                return Err(e);
            }

            debug!(mailbox = %dest, "server suggests TRYCREATE");
            if self.options.confirm_create
                && !self.collab.prompt.confirm(&format!("Create {dest}?"), true).await
            {
                return Err(e);
            }
            self.create_mailbox(dest).await?;
            tried_create = true;
        }
    }

    /// Copies messages to `dest` on the same server.
    ///
    /// Unsynced flag changes are stored first so the copies carry them.
    /// With `move_messages` the originals are marked deleted and purged;
    /// the next sync expunges them.
    ///
    /// # Errors
    ///
    /// Fails if nothing is selected, `uids` is empty, or the copy is
    /// refused.
    pub async fn copy_messages(&mut self, uids: &[u32], dest: &str, move_messages: bool) -> Result<()> {
        self.require_selected()?;
        let mut uids = uids.to_vec();
        uids.sort_unstable();
        uids.dedup();
        if uids.is_empty() {
            return Err(Error::InvalidState("no messages to copy".to_string()));
        }

        let dest = self.canonical_name(dest);
        self.sync_for_copy(&uids, false).await?;
        info!(count = uids.len(), mailbox = %dest, "copying messages");
        self.copy_uids(&uids, &dest).await?;

        if move_messages && let Some(mbox) = self.mailbox.as_mut() {
            for uid in &uids {
                if let Some(email) = mbox.email_mut(*uid) {
                    email.flags.deleted = true;
                    email.purge = true;
                    email.changed = true;
                }
            }
        }
        Ok(())
    }

    /// Copies every message marked deleted (and not purged) to `dest`.
    ///
    /// Returns how many were copied.
    ///
    /// # Errors
    ///
    /// Fails if nothing is selected or the copy is refused.
    pub async fn fast_trash(&mut self, dest: &str) -> Result<usize> {
        self.require_selected()?;
        let mut uids: Vec<u32> = self
            .mailbox
            .as_ref()
            .map(|mbox| {
                mbox.emails()
                    .filter(|e| e.active && e.flags.deleted && !e.purge)
                    .map(|e| e.uid)
                    .collect()
            })
            .unwrap_or_default();
        if uids.is_empty() {
            debug!("no messages to trash");
            return Ok(0);
        }
        uids.sort_unstable();

        let dest = self.canonical_name(dest);
        self.sync_for_copy(&uids, true).await?;
        info!(count = uids.len(), mailbox = %dest, "copying messages to trash");
        self.copy_uids(&uids, &dest).await?;
        Ok(uids.len())
    }

    /// Uploads a message to `path`.
    ///
    /// Bare LF line ends are sent as CRLF. Only `\Seen`, `\Answered`,
    /// `\Flagged` and `\Draft` are carried over from `flags`.
    ///
    /// # Errors
    ///
    /// Fails if the server refuses the APPEND before or after the upload.
    pub async fn append_message(
        &mut self,
        path: &str,
        data: &[u8],
        flags: &MessageFlags,
        received: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if self.is_fatal() {
            return Err(Error::Fatal);
        }
        if self.state < AccountState::Authenticated {
            return Err(Error::InvalidState("not logged in".to_string()));
        }

        let name = self.canonical_name(path);
        let body = to_crlf(data);
        let mut list = Vec::new();
        if flags.read {
            list.push("\\Seen");
        }
        if flags.replied {
            list.push("\\Answered");
        }
        if flags.flagged {
            list.push("\\Flagged");
        }
        if flags.has(&Flag::Draft) {
            list.push("\\Draft");
        }
        let date = format_internal_date(&received.unwrap_or_else(Utc::now));
        let cmd = format!(
            "APPEND {} ({}) \"{date}\" {{{}}}",
            munge(self.unicode, &name),
            list.join(" "),
            body.len()
        );

        info!(mailbox = %name, bytes = body.len(), "uploading message");
        self.start(Some(&cmd), ExecFlags::empty()).await?;
        let state = self.step_until_done().await?;
        if state != CommandState::Respond {
            return Err(self.failure(state));
        }

        self.send_raw(&body, false).await?;
        self.send_raw(b"\r\n", false).await?;
        match self.step_until_done().await? {
            CommandState::Ok => Ok(()),
            state => Err(self.failure(state)),
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

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio_test::io::Builder;

    use super::*;
    use crate::engine::Collaborators;
    use crate::engine::tests::{account_with, select_with};
    use crate::prompt::Prompt;

    struct Decline;

    #[async_trait]
    impl Prompt for Decline {
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
            false
        }
    }

    #[test]
    fn test_to_crlf() {
        assert_eq!(to_crlf(b"a\nb\r\nc\n"), b"a\r\nb\r\nc\r\n");
        assert_eq!(to_crlf(b""), b"");
    }

    #[tokio::test]
    async fn test_move_syncs_flags_first() {
        let mock = Builder::new()
            .write(b"a0001 UID STORE 2 FLAGS.SILENT (\\Seen)\r\n")
            .read(b"a0001 OK done\r\n")
            .write(b"a0002 UID COPY 1:2 \"Archive\"\r\n")
            .read(b"a0002 OK [COPYUID 7 1:2 30:31] done\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[1, 2, 3]);
        let email = account.mailbox_mut().unwrap().email_mut(2).unwrap();
        email.flags.read = true;
        email.changed = true;

        account.copy_messages(&[2, 1], "Archive", true).await.unwrap();
        let mbox = account.mailbox().unwrap();
        for uid in [1, 2] {
            let email = mbox.email(uid).unwrap();
            assert!(email.flags.deleted && email.purge && email.changed);
        }
        assert!(!mbox.email(3).unwrap().flags.deleted);
        assert!(mbox.email(2).unwrap().server_flags.read);
    }

    #[tokio::test]
    async fn test_trycreate_creates_and_retries() {
        let mock = Builder::new()
            .write(b"a0001 UID COPY 3 \"New\"\r\n")
            .read(b"a0001 NO [TRYCREATE] no such mailbox\r\n")
            .write(b"a0002 CREATE \"New\"\r\n")
            .read(b"a0002 OK created\r\n")
            .write(b"a0003 UID COPY 3 \"New\"\r\n")
            .read(b"a0003 OK done\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[3]);
        account.copy_messages(&[3], "New", false).await.unwrap();
        assert!(!account.mailbox().unwrap().email(3).unwrap().flags.deleted);
    }

    #[tokio::test]
    async fn test_trycreate_declined() {
        let mock = Builder::new()
            .write(b"a0001 UID COPY 3 \"New\"\r\n")
            .read(b"a0001 NO [TRYCREATE] no such mailbox\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected).with_collaborators(Collaborators {
            prompt: Arc::new(Decline),
            ..Collaborators::default()
        });
        select_with(&mut account, &[3]);
        assert!(matches!(account.copy_messages(&[3], "New", false).await, Err(Error::No(_))));
    }

    #[tokio::test]
    async fn test_copy_failure_without_trycreate() {
        let mock = Builder::new()
            .write(b"a0001 UID COPY 3 \"Full\"\r\n")
            .read(b"a0001 NO [OVERQUOTA] quota exceeded\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[3]);
        assert!(account.copy_messages(&[3], "Full", true).await.is_err());
        assert!(!account.mailbox().unwrap().email(3).unwrap().flags.deleted);
    }

    #[tokio::test]
    async fn test_fast_trash_skips_purged() {
        let mock = Builder::new()
            .write(b"a0001 UID COPY 2 \"Trash\"\r\n")
            .read(b"a0001 OK done\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[1, 2, 3]);
        let mbox = account.mailbox_mut().unwrap();
        for uid in [2, 3] {
            let email = mbox.email_mut(uid).unwrap();
            email.flags.deleted = true;
            email.server_flags.deleted = true;
        }
        mbox.email_mut(3).unwrap().purge = true;

        assert_eq!(account.fast_trash("Trash").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fast_trash_nothing_deleted() {
        let mock = Builder::new().build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[1]);
        assert_eq!(account.fast_trash("Trash").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append() {
        let mock = Builder::new()
            .write(b"a0001 APPEND \"Sent\" (\\Seen \\Flagged) \"05-Mar-2024 09:07:01 +0000\" {18}\r\n")
            .read(b"+ Ready for literal data\r\n")
            .write(b"Subject: x\r\nbody\r\n")
            .write(b"\r\n")
            .read(b"a0001 OK [APPENDUID 7 40] APPEND completed\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Authenticated);
        let flags = MessageFlags {
            read: true,
            flagged: true,
            ..MessageFlags::default()
        };
        let date = Utc.with_ymd_and_hms(2024, 3, 5, 9, 7, 1).unwrap();

        account
            .append_message("Sent", b"Subject: x\nbody\n", &flags, Some(date))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_refused() {
        let mock = Builder::new()
            .write(b"a0001 APPEND \"Sent\" () \"05-Mar-2024 09:07:01 +0000\" {3}\r\n")
            .read(b"a0001 NO [OVERQUOTA] over quota\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Authenticated);
        let date = Utc.with_ymd_and_hms(2024, 3, 5, 9, 7, 1).unwrap();

        let err = account
            .append_message("Sent", b"x\n", &MessageFlags::default(), Some(date))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::No(_)));
        assert!(!account.is_fatal());
    }
}
