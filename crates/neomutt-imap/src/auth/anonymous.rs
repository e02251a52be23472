//! `AUTHENTICATE ANONYMOUS` (RFC 4505).

use tracing::debug;

use super::{AuthResult, sasl_line};
use crate::command::{CommandState, ExecFlags};
use crate::engine::ImapAccount;
use crate::types::Capabilities;
use crate::Result;

/// Trace string sent in place of credentials.
const TRACE: &[u8] = b"dummy\n";

impl ImapAccount {
    pub(super) async fn auth_anonymous(&mut self) -> Result<AuthResult> {
        if !self.capabilities.contains(Capabilities::AUTH_ANONYMOUS) {
            return Ok(AuthResult::Unavail);
        }
        let configured = self
            .options
            .user
            .as_deref()
            .or(self.account.user.as_deref())
            .is_some_and(|u| !u.is_empty());
        if configured {
            return Ok(AuthResult::Unavail);
        }

        self.start(Some("AUTHENTICATE ANONYMOUS"), ExecFlags::empty()).await?;
        if self.step_until_done().await? != CommandState::Respond {
            debug!("invalid response to AUTHENTICATE ANONYMOUS");
            return Ok(AuthResult::Failure);
        }
        self.send_raw(&sasl_line(TRACE), false).await?;

        if self.step_until_done().await? == CommandState::Ok {
            Ok(AuthResult::Success)
        } else {
            debug!("anonymous authentication failed");
            Ok(AuthResult::Failure)
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
    use tokio_test::io::Builder;

    use super::*;
    use crate::auth::tests::{account_for, options};

    #[tokio::test]
    async fn test_anonymous() {
        let mock = Builder::new()
            .write(b"a0001 AUTHENTICATE ANONYMOUS\r\n")
            .read(b"+\r\n")
            .write(b"ZHVtbXkK\r\n")
            .read(b"a0001 OK welcome\r\n")
            .build();
        let mut account = account_for(mock, options(), "IMAP4rev1 AUTH=ANONYMOUS", false);
        account.account.user = None;
        assert_eq!(account.auth_anonymous().await.unwrap(), AuthResult::Success);
    }

    #[tokio::test]
    async fn test_anonymous_needs_no_user() {
        let mock = Builder::new().build();
        let mut account = account_for(mock, options(), "IMAP4rev1 AUTH=ANONYMOUS", false);
        assert_eq!(account.auth_anonymous().await.unwrap(), AuthResult::Unavail);
    }
}
