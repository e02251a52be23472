//! Polling the selected mailbox.

use tracing::debug;

use super::ReopenFlags;
use crate::command::ExecFlags;
use crate::engine::{AccountState, ImapAccount};
use crate::types::Capabilities;
use crate::{Error, Result};

/// What a mailbox check found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckResult {
    /// Nothing happened.
    NoChange,
    /// New messages arrived and were loaded.
    NewMail,
    /// The server changed flags.
    Flags,
    /// Messages were expunged; the index was rebuilt.
    Reopened,
}

impl CheckResult {
    fn from_status(status: ReopenFlags) -> Self {
        if status.contains(ReopenFlags::EXPUNGE_PENDING) {
            Self::Reopened
        } else if status.contains(ReopenFlags::NEWMAIL_PENDING) {
            Self::NewMail
        } else if status.contains(ReopenFlags::FLAGS_PENDING) {
            Self::Flags
        } else {
            Self::NoChange
        }
    }
}

impl ImapAccount {
    /// Looks for changes to the selected mailbox.
    ///
    /// With `imap_idle` and an IDLE-capable server the connection is kept
    /// in IDLE and whatever arrived is read without blocking; an update
    /// ends IDLE until the next check. Otherwise a
    /// NOOP goes out once `timeout` has passed since the last read, or
    /// right away with `force`. Pending changes are applied either way.
    ///
    /// # Errors
    ///
    /// Fails if no mailbox is selected or the connection breaks.
    pub async fn check_mailbox(&mut self, force: bool) -> Result<CheckResult> {
        if self.state < AccountState::Selected || self.mailbox.is_none() {
            return Err(Error::InvalidState("no mailbox selected".to_string()));
        }

        let idle_due = self.state != AccountState::Idle || self.last_read.elapsed() >= self.options.keepalive;
        if !force && self.options.idle && self.capabilities.contains(Capabilities::IDLE) && idle_due {
            self.idle().await?;
        }
        if self.state == AccountState::Idle {
            self.read_idle_responses().await?;
        }

        let noop_due = self.state != AccountState::Idle && self.last_read.elapsed() >= self.options.timeout;
        if force || noop_due {
            self.exec(Some("NOOP"), ExecFlags::POLL).await?;
        }

        // pending changes may be applied here even without a NOOP
        self.finish().await;

        let status = self
            .mailbox
            .as_mut()
            .map(|m| std::mem::take(&mut m.check_status))
            .unwrap_or_default();
        let result = CheckResult::from_status(status);
        if result != CheckResult::NoChange {
            debug!(?result, "mailbox changed");
        }
        Ok(result)
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

    #[tokio::test]
    async fn test_nothing_due() {
        let mock = Builder::new().build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[1]);
        assert_eq!(account.check_mailbox(false).await.unwrap(), CheckResult::NoChange);
    }

    #[tokio::test]
    async fn test_forced_noop_reports_flags() {
        let mock = Builder::new()
            .write(b"a0001 NOOP\r\n")
            .read(b"* 1 FETCH (UID 4 FLAGS (\\Seen))\r\n")
            .read(b"a0001 OK NOOP completed\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[4]);
        assert_eq!(account.check_mailbox(true).await.unwrap(), CheckResult::Flags);
        assert!(account.mailbox().unwrap().email(4).unwrap().flags.read);
        // reported once
        assert_eq!(account.check_mailbox(false).await.unwrap(), CheckResult::NoChange);
    }

    #[tokio::test]
    async fn test_new_mail_is_fetched() {
        let mock = Builder::new()
            .write(b"a0001 NOOP\r\n")
            .read(b"* 2 EXISTS\r\n")
            .read(b"a0001 OK NOOP completed\r\n")
            .write(b"a0002 FETCH 2:2 (UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER])\r\n")
            .read(b"* 2 FETCH (UID 9 FLAGS () BODY[HEADER] {4}\r\nX: y)\r\n")
            .read(b"a0002 OK FETCH completed\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        account.capabilities = Capabilities::IMAP4REV1;
        select_with(&mut account, &[4]);

        assert_eq!(account.check_mailbox(true).await.unwrap(), CheckResult::NewMail);
        assert_eq!(account.mailbox().unwrap().uids(), vec![4, 9]);
    }

    #[tokio::test]
    async fn test_expunge_reports_reopened() {
        let mock = Builder::new()
            .write(b"a0001 NOOP\r\n")
            .read(b"* 1 EXPUNGE\r\na0001 OK done\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[4, 5]);
        assert_eq!(account.check_mailbox(true).await.unwrap(), CheckResult::Reopened);
        assert_eq!(account.mailbox().unwrap().uids(), vec![5]);
    }

    fn idle_options() -> ImapOptions {
        ImapOptions::builder()
            .idle(true)
            .poll_timeout(Duration::ZERO)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_idle_update_ends_idle() {
        let mock = Builder::new()
            .write(b"a0001 IDLE\r\n")
            .read(b"+ idling\r\n* 1 FETCH (UID 4 FLAGS (\\Seen))\r\n")
            .write(b"DONE\r\n")
            .read(b"a0001 OK IDLE terminated\r\n")
            .build();
        let mut account = account_with_options(mock, idle_options(), AccountState::Selected);
        account.capabilities = Capabilities::IMAP4REV1 | Capabilities::IDLE;
        select_with(&mut account, &[4]);

        assert_eq!(account.check_mailbox(false).await.unwrap(), CheckResult::Flags);
        assert_eq!(account.state(), AccountState::Selected);
        assert_eq!(account.commands_in_flight(), 0);
        assert!(account.mailbox().unwrap().email(4).unwrap().flags.read);
    }

    #[tokio::test]
    async fn test_quiet_idle_stays_idle() {
        let mock = Builder::new()
            .write(b"a0001 IDLE\r\n")
            .read(b"+ idling\r\n")
            .wait(Duration::from_secs(60))
            .build();
        let mut account = account_with_options(mock, idle_options(), AccountState::Selected);
        account.capabilities = Capabilities::IMAP4REV1 | Capabilities::IDLE;
        select_with(&mut account, &[4]);

        assert_eq!(account.check_mailbox(false).await.unwrap(), CheckResult::NoChange);
        assert_eq!(account.state(), AccountState::Idle);
    }

    #[tokio::test]
    async fn test_requires_selected_mailbox() {
        let mock = Builder::new().build();
        let mut account = account_with(mock, AccountState::Authenticated);
        assert!(matches!(account.check_mailbox(true).await, Err(Error::InvalidState(_))));
    }
}
