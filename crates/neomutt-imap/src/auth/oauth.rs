//! `AUTHENTICATE OAUTHBEARER` (RFC 7628) and `AUTHENTICATE XOAUTH2`.
//!
//! The access token comes from `imap_oauth_refresh_command`, which prints
//! it on stdout. Both methods are sent as an initial response, so the
//! server must advertise `SASL-IR`, and only over a protected connection.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{AuthResult, sasl_line};
use crate::command::{CommandState, ExecFlags};
use crate::engine::ImapAccount;
use crate::types::Capabilities;
use crate::Result;

/// Error document a server returns in the continuation after a rejected token.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct OAuthError {
    /// HTTP-like status, such as `"401"`.
    #[serde(default)]
    pub status: String,
    /// Accepted schemes.
    #[serde(default)]
    pub schemes: Option<String>,
    /// Scope the token needs.
    #[serde(default)]
    pub scope: Option<String>,
}

impl OAuthError {
    /// Decodes the base64 JSON error from a continuation request.
    #[must_use]
    pub fn from_challenge(challenge: &[u8]) -> Option<Self> {
        serde_json::from_slice(challenge).ok()
    }
}

/// Runs the refresh command and returns the first line it prints.
async fn refresh_token(command: &str) -> Option<String> {
    let output = match Command::new("sh").arg("-c").arg(command).output().await {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "unable to run imap_oauth_refresh_command");
            return None;
        }
    };
    if !output.status.success() {
        warn!(status = ?output.status, "imap_oauth_refresh_command failed");
    }
    let token = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if token.is_empty() {
        warn!("imap_oauth_refresh_command produced no token");
        return None;
    }
    Some(token)
}

/// Builds the SASL initial response.
fn bearer_message(xoauth2: bool, user: &str, host: &str, port: u16, token: &str) -> String {
    let msg = if xoauth2 {
        format!("user={user}\x01auth=Bearer {token}\x01\x01")
    } else {
        format!("n,a={user},\x01host={host}\x01port={port}\x01auth=Bearer {token}\x01\x01")
    };
    STANDARD.encode(msg)
}

impl ImapAccount {
    pub(super) async fn auth_oauth(&mut self, xoauth2: bool, explicit: bool) -> Result<AuthResult> {
        let (name, cap) = if xoauth2 {
            ("XOAUTH2", Capabilities::AUTH_XOAUTH2)
        } else {
            ("OAUTHBEARER", Capabilities::AUTH_OAUTHBEARER)
        };
        if !self.capabilities.contains(cap | Capabilities::SASL_IR) || !self.is_secure() {
            return Ok(AuthResult::Unavail);
        }
        let refresh = self.options.oauth_refresh_command.clone();
        if !explicit && refresh.is_none() {
            return Ok(AuthResult::Unavail);
        }

        let Some(user) = self.auth_user().await else {
            return Ok(AuthResult::Unavail);
        };
        let Some(token) = (match refresh {
            Some(command) => refresh_token(&command).await,
            None => None,
        }) else {
            return Ok(AuthResult::Failure);
        };

        let payload = bearer_message(xoauth2, &user, &self.account.host, self.account.port, &token);
        self.start(Some(&format!("AUTHENTICATE {name} {payload}")), ExecFlags::PASS)
            .await?;

        match self.step_until_done().await? {
            CommandState::Ok => Ok(AuthResult::Success),
            CommandState::Respond => {
                match self.continuation_data().as_deref().and_then(OAuthError::from_challenge) {
                    Some(err) => warn!(method = name, status = %err.status, scope = ?err.scope, "token rejected"),
                    None => debug!(method = name, "token rejected"),
                }
                // a single 0x01 ends the exchange so the server can send its NO
                self.send_raw(&sasl_line(b"\x01"), false).await?;
                if self.step_until_done().await? == CommandState::Respond {
                    self.abort_authenticate().await?;
                }
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
    fn test_xoauth2_message() {
        let msg = STANDARD.decode(bearer_message(true, "u@example.com", "h", 993, "tok")).unwrap();
        assert_eq!(msg, b"user=u@example.com\x01auth=Bearer tok\x01\x01");
    }

    #[test]
    fn test_oauthbearer_message() {
        let msg = STANDARD.decode(bearer_message(false, "u", "imap.example.com", 993, "tok")).unwrap();
        assert_eq!(
            msg,
            b"n,a=u,\x01host=imap.example.com\x01port=993\x01auth=Bearer tok\x01\x01"
        );
    }

    #[test]
    fn test_error_document() {
        let err = OAuthError::from_challenge(br#"{"status":"401","schemes":"bearer","scope":"mail"}"#).unwrap();
        assert_eq!(err.status, "401");
        assert_eq!(err.scope.as_deref(), Some("mail"));
        assert!(OAuthError::from_challenge(b"not json").is_none());
    }

    #[tokio::test]
    async fn test_unavailable_without_refresh_command() {
        let mock = Builder::new().build();
        let mut account = account_for(mock, options(), "IMAP4rev1 SASL-IR AUTH=OAUTHBEARER", true);
        assert_eq!(account.auth_oauth(false, false).await.unwrap(), AuthResult::Unavail);
    }

    #[tokio::test]
    async fn test_unavailable_in_clear() {
        let options = crate::config::ImapOptions::builder()
            .oauth_refresh_command("echo tok")
            .build()
            .unwrap();
        let mock = Builder::new().build();
        let mut account = account_for(mock, options, "IMAP4rev1 SASL-IR AUTH=XOAUTH2", false);
        assert_eq!(account.auth_oauth(true, true).await.unwrap(), AuthResult::Unavail);
    }

    #[tokio::test]
    async fn test_rejected_token_is_aborted() {
        let options = crate::config::ImapOptions::builder()
            .oauth_refresh_command("echo tok")
            .poll_timeout(std::time::Duration::ZERO)
            .build()
            .unwrap();
        let payload = bearer_message(true, "joe", "imap.example.com", 993, "tok");
        let cmd = format!("a0001 AUTHENTICATE XOAUTH2 {payload}\r\n");
        let mock = Builder::new()
            .write(cmd.as_bytes())
            .read(b"+ eyJzdGF0dXMiOiI0MDEifQ==\r\n")
            .write(b"AQ==\r\n")
            .read(b"a0001 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
            .build();
        let mut account = account_for(mock, options, "IMAP4rev1 SASL-IR AUTH=XOAUTH2", true);
        assert_eq!(account.auth_oauth(true, false).await.unwrap(), AuthResult::Failure);
        assert!(!account.is_fatal());
    }
}
