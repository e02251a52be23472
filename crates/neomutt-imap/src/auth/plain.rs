//! `AUTHENTICATE PLAIN` (RFC 4616).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use super::{AuthResult, sasl_line};
use crate::command::{CommandState, ExecFlags};
use crate::engine::ImapAccount;
use crate::types::Capabilities;
use crate::Result;

/// Builds the PLAIN message `authz NUL authc NUL pass`.
fn plain_message(authz: &str, user: &str, pass: &str) -> Vec<u8> {
    let mut msg = Vec::with_capacity(authz.len() + user.len() + pass.len() + 2);
    msg.extend_from_slice(authz.as_bytes());
    msg.push(0);
    msg.extend_from_slice(user.as_bytes());
    msg.push(0);
    msg.extend_from_slice(pass.as_bytes());
    msg
}

impl ImapAccount {
    pub(super) async fn auth_plain(&mut self) -> Result<AuthResult> {
        let Some(user) = self.auth_user().await else {
            return Ok(AuthResult::Unavail);
        };
        let Some(login) = self.auth_login_name().await else {
            return Ok(AuthResult::Unavail);
        };
        let Some(pass) = self.auth_pass().await else {
            return Ok(AuthResult::Unavail);
        };
        let msg = plain_message(&login, &user, &pass);

        if self.capabilities.contains(Capabilities::SASL_IR) {
            let cmd = format!("AUTHENTICATE PLAIN {}", STANDARD.encode(&msg));
            self.start(Some(&cmd), ExecFlags::PASS).await?;
        } else {
            self.start(Some("AUTHENTICATE PLAIN"), ExecFlags::empty()).await?;
            if self.step_until_done().await? != CommandState::Respond {
                debug!("server refused AUTHENTICATE PLAIN");
                return Ok(AuthResult::Failure);
            }
            self.send_raw(&sasl_line(&msg), true).await?;
        }

        match self.step_until_done().await? {
            CommandState::Ok => Ok(AuthResult::Success),
            CommandState::Respond => {
                self.abort_authenticate().await?;
                Ok(AuthResult::Failure)
            }
            _ => Ok(AuthResult::Failure),
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

    #[test]
    fn test_plain_message() {
        assert_eq!(plain_message("", "tim", "tanstaaf"), b"\0tim\0tanstaaf".to_vec());
    }

    #[tokio::test]
    async fn test_plain_initial_response() {
        let mock = Builder::new()
            .write(b"a0001 AUTHENTICATE PLAIN am9lAGpvZQBzZWNyZXQ=\r\n")
            .read(b"a0001 OK done\r\n")
            .build();
        let mut account = account_for(mock, options(), "IMAP4rev1 SASL-IR AUTH=PLAIN", true);
        assert_eq!(account.auth_plain().await.unwrap(), AuthResult::Success);
    }

    #[tokio::test]
    async fn test_plain_rejected() {
        let mock = Builder::new()
            .write(b"a0001 AUTHENTICATE PLAIN am9lAGpvZQBzZWNyZXQ=\r\n")
            .read(b"a0001 NO [AUTHENTICATIONFAILED] nope\r\n")
            .build();
        let mut account = account_for(mock, options(), "IMAP4rev1 SASL-IR", true);
        assert_eq!(account.auth_plain().await.unwrap(), AuthResult::Failure);
        assert!(!account.is_fatal());
    }
}
