//! The `LOGIN` command.

use tracing::{debug, warn};

use super::AuthResult;
use crate::command::ExecFlags;
use crate::engine::ImapAccount;
use crate::path::quote_string;
use crate::types::Capabilities;
use crate::{Error, Result};

impl ImapAccount {
    pub(super) async fn auth_login(&mut self) -> Result<AuthResult> {
        if self.capabilities.contains(Capabilities::LOGINDISABLED)
            || !self
                .capabilities
                .intersects(Capabilities::IMAP4 | Capabilities::IMAP4REV1)
        {
            debug!("LOGIN disabled on this server");
            return Ok(AuthResult::Unavail);
        }

        let Some(user) = self.auth_user().await else {
            return Ok(AuthResult::Unavail);
        };
        let Some(pass) = self.auth_pass().await else {
            return Ok(AuthResult::Unavail);
        };

        debug!(%user, "logging in");
        let cmd = format!("LOGIN {} {}", quote_string(&user, false), quote_string(&pass, false));
        match self.exec(Some(&cmd), ExecFlags::PASS).await {
            Ok(()) => Ok(AuthResult::Success),
            Err(Error::No(text) | Error::Bad(text)) => {
                warn!(host = %self.account.host, "login failed: {text}");
                Ok(AuthResult::Failure)
            }
            Err(e) => Err(e),
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
    async fn test_login_quotes_credentials() {
        let options = crate::config::ImapOptions::builder()
            .user("jo\"e")
            .pass("p\\w")
            .poll_timeout(std::time::Duration::ZERO)
            .build()
            .unwrap();
        let mock = Builder::new()
            .write(b"a0001 LOGIN \"jo\\\"e\" \"p\\\\w\"\r\n")
            .read(b"a0001 OK LOGIN completed\r\n")
            .build();
        let mut account = account_for(mock, options, "IMAP4rev1", false);
        assert_eq!(account.auth_login().await.unwrap(), AuthResult::Success);
    }

    #[tokio::test]
    async fn test_login_disabled() {
        let mock = Builder::new().build();
        let mut account = account_for(mock, options(), "IMAP4rev1 LOGINDISABLED", false);
        assert_eq!(account.auth_login().await.unwrap(), AuthResult::Unavail);
    }
}
