//! SASL through an external library.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

use super::{AuthResult, sasl_line};
use crate::command::{CommandState, ExecFlags};
use crate::engine::ImapAccount;
use crate::types::Capabilities;
use crate::Result;

/// A SASL library binding.
pub trait SaslProvider: Send + Sync {
    /// Starts a client exchange with `host`, picking one of `mechanisms`.
    ///
    /// Returns `None` if no mechanism is shared.
    fn start(&self, host: &str, user: Option<&str>, mechanisms: &[String]) -> Option<Box<dyn SaslSession>>;
}

/// One client-side SASL exchange.
pub trait SaslSession: Send {
    /// The negotiated mechanism, such as `SCRAM-SHA-256`.
    fn mechanism(&self) -> &str;

    /// Data to send before the first challenge, if the mechanism has any.
    fn initial_response(&mut self) -> Option<Vec<u8>>;

    /// Answers a server challenge.
    ///
    /// # Errors
    ///
    /// Fails if the challenge is invalid; the exchange is then aborted.
    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;
}

impl ImapAccount {
    /// Runs a SASL exchange, restricted to `only` when given.
    pub(super) async fn auth_sasl(&mut self, only: Option<&str>) -> Result<AuthResult> {
        let Some(provider) = self.collab.sasl.clone() else {
            return Ok(AuthResult::Unavail);
        };
        let capstr = self.capstr.clone().unwrap_or_default();
        let mechanisms: Vec<String> = capstr
            .split_ascii_whitespace()
            .filter_map(|cap| {
                cap.get(..5)
                    .filter(|p| p.eq_ignore_ascii_case("AUTH="))
                    .and_then(|_| cap.get(5..))
            })
            .filter(|m| only.is_none_or(|o| o.eq_ignore_ascii_case(m)))
            .map(str::to_string)
            .collect();
        if mechanisms.is_empty() {
            return Ok(AuthResult::Unavail);
        }

        let user = self.options.user.clone().or_else(|| self.account.user.clone());
        let Some(mut session) = provider.start(&self.account.host, user.as_deref(), &mechanisms) else {
            debug!("no shared SASL mechanism");
            return Ok(AuthResult::Unavail);
        };
        let mech = session.mechanism().to_string();
        debug!(mechanism = %mech, "authenticating with SASL");

        let mut pending = session.initial_response();
        let mut cmd = format!("AUTHENTICATE {mech}");
        if self.capabilities.contains(Capabilities::SASL_IR)
            && let Some(ir) = pending.take()
        {
            cmd.push(' ');
            cmd.push_str(&if ir.is_empty() { "=".to_string() } else { STANDARD.encode(ir) });
        }
        self.start(Some(&cmd), ExecFlags::PASS).await?;

        loop {
            match self.step_until_done().await? {
                CommandState::Respond => {}
                CommandState::Ok => return Ok(AuthResult::Success),
                _ => {
                    warn!(mechanism = %mech, "SASL authentication failed");
                    return Ok(AuthResult::Failure);
                }
            }

            let response = match pending.take() {
                Some(ir) => Ok(ir),
                None => match self.continuation_data() {
                    Some(challenge) => session.step(&challenge),
                    None => Err(crate::Error::Auth("invalid base64 challenge".to_string())),
                },
            };
            match response {
                Ok(data) => self.send_raw(&sasl_line(&data), true).await?,
                Err(e) => {
                    warn!(mechanism = %mech, error = %e, "aborting SASL exchange");
                    self.abort_authenticate().await?;
                    return Ok(AuthResult::Failure);
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
    use crate::auth::tests::{account_for, options};
    use crate::engine::Collaborators;

    /// Echoes each challenge back reversed, for two rounds.
    struct Reverse;

    struct ReverseSession(String);

    impl SaslProvider for Reverse {
        fn start(&self, _host: &str, _user: Option<&str>, mechanisms: &[String]) -> Option<Box<dyn SaslSession>> {
            mechanisms
                .iter()
                .find(|m| m.as_str() == "X-REVERSE")
                .map(|m| Box::new(ReverseSession(m.clone())) as Box<dyn SaslSession>)
        }
    }

    impl SaslSession for ReverseSession {
        fn mechanism(&self) -> &str {
            &self.0
        }

        fn initial_response(&mut self) -> Option<Vec<u8>> {
            Some(b"hi".to_vec())
        }

        fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
            Ok(challenge.iter().rev().copied().collect())
        }
    }

    fn with_provider(account: ImapAccount) -> ImapAccount {
        account.with_collaborators(Collaborators {
            sasl: Some(Arc::new(Reverse)),
            ..Collaborators::default()
        })
    }

    #[tokio::test]
    async fn test_unavailable_without_provider() {
        let mock = Builder::new().build();
        let mut account = account_for(mock, options(), "IMAP4rev1 AUTH=X-REVERSE", true);
        assert_eq!(account.auth_sasl(None).await.unwrap(), AuthResult::Unavail);
    }

    #[tokio::test]
    async fn test_multi_step_exchange() {
        let mock = Builder::new()
            .write(b"a0001 AUTHENTICATE X-REVERSE aGk=\r\n")
            .read(b"+ YWJj\r\n")
            .write(b"Y2Jh\r\n")
            .read(b"+ eHl6\r\n")
            .write(b"enl4\r\n")
            .read(b"a0001 OK done\r\n")
            .build();
        let account = account_for(mock, options(), "IMAP4rev1 SASL-IR AUTH=X-REVERSE AUTH=PLAIN", true);
        let mut account = with_provider(account);
        assert_eq!(account.auth_sasl(None).await.unwrap(), AuthResult::Success);
    }

    #[tokio::test]
    async fn test_initial_response_without_sasl_ir() {
        let mock = Builder::new()
            .write(b"a0001 AUTHENTICATE X-REVERSE\r\n")
            .read(b"+ \r\n")
            .write(b"aGk=\r\n")
            .read(b"a0001 NO bad\r\n")
            .build();
        let account = account_for(mock, options(), "IMAP4rev1 AUTH=X-REVERSE", true);
        let mut account = with_provider(account);
        assert_eq!(account.auth_sasl(None).await.unwrap(), AuthResult::Failure);
    }

    #[tokio::test]
    async fn test_restricted_mechanism() {
        let mock = Builder::new().build();
        let account = account_for(mock, options(), "IMAP4rev1 AUTH=X-REVERSE", true);
        let mut account = with_provider(account);
        assert_eq!(account.auth_sasl(Some("CRAM-MD5")).await.unwrap(), AuthResult::Unavail);
    }
}
