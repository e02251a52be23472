//! `AUTHENTICATE GSSAPI` (RFC 1731).
//!
//! The security context is built by an external [`GssapiProvider`]. After
//! the context is established the server offers its security layers in a
//! wrapped token; we only accept "no security layer" and answer with the
//! user name as authorization identity.

use tracing::debug;

use super::{AuthResult, sasl_line};
use crate::command::{CommandState, ExecFlags};
use crate::engine::ImapAccount;
use crate::types::Capabilities;
use crate::{Error, Result};

/// Security layer bit for "no protection".
const LAYER_NONE: u8 = 0x01;

/// A GSSAPI binding.
pub trait GssapiProvider: Send + Sync {
    /// Starts a context for `service`, such as `imap@mail.example.com`.
    ///
    /// # Errors
    ///
    /// Fails if there are no credentials (no ticket); the method is then
    /// treated as unavailable.
    fn start(&self, service: &str) -> Result<Box<dyn GssapiContext>>;
}

/// Output of one context-establishment step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GssapiStep {
    /// Token to send to the server.
    pub token: Vec<u8>,
    /// The context is established.
    pub complete: bool,
}

/// A security context being established.
pub trait GssapiContext: Send {
    /// Runs one step; `input` is `None` for the first.
    ///
    /// # Errors
    ///
    /// Fails if the library rejects the server token.
    fn step(&mut self, input: Option<&[u8]>) -> Result<GssapiStep>;

    /// Unwraps a message from the server.
    ///
    /// # Errors
    ///
    /// Fails if the token does not verify.
    fn unwrap(&mut self, token: &[u8]) -> Result<Vec<u8>>;

    /// Wraps a message for the server, without confidentiality.
    ///
    /// # Errors
    ///
    /// Fails if the library can't wrap.
    fn wrap(&mut self, data: &[u8]) -> Result<Vec<u8>>;
}

impl ImapAccount {
    pub(super) async fn auth_gss(&mut self) -> Result<AuthResult> {
        if !self.capabilities.contains(Capabilities::AUTH_GSSAPI) {
            return Ok(AuthResult::Unavail);
        }
        let Some(provider) = self.collab.gssapi.clone() else {
            return Ok(AuthResult::Unavail);
        };
        let Some(user) = self.auth_user().await else {
            return Ok(AuthResult::Unavail);
        };

        let service = format!("imap@{}", self.account.host);
        let mut context = match provider.start(&service) {
            Ok(context) => context,
            Err(e) => {
                debug!(%service, error = %e, "no GSSAPI credentials");
                return Ok(AuthResult::Unavail);
            }
        };
        let mut step = match context.step(None) {
            Ok(step) => step,
            Err(e) => {
                debug!(error = %e, "error acquiring credentials");
                return Ok(AuthResult::Unavail);
            }
        };

        self.start(Some("AUTHENTICATE GSSAPI"), ExecFlags::empty()).await?;
        if self.step_until_done().await? != CommandState::Respond {
            debug!("invalid response to AUTHENTICATE GSSAPI");
            return Ok(AuthResult::Failure);
        }
        debug!("sending credentials");
        self.send_raw(&sasl_line(&step.token), true).await?;

        while !step.complete {
            if self.step_until_done().await? != CommandState::Respond {
                debug!("error receiving server response");
                return Ok(AuthResult::Failure);
            }
            let next = self
                .continuation_data()
                .ok_or_else(|| Error::Auth("invalid base64 server response".to_string()))
                .and_then(|input| context.step(Some(&input)));
            step = match next {
                Ok(step) => step,
                Err(e) => return self.gss_abort(&e).await,
            };
            self.send_raw(&sasl_line(&step.token), true).await?;
        }

        // security layer negotiation
        if self.step_until_done().await? != CommandState::Respond {
            debug!("error receiving security layer offer");
            return Ok(AuthResult::Failure);
        }
        let offer = self
            .continuation_data()
            .ok_or_else(|| Error::Auth("invalid base64 server response".to_string()))
            .and_then(|token| context.unwrap(&token));
        let offer = match offer {
            Ok(offer) if offer.len() >= 4 => offer,
            Ok(_) => return self.gss_abort(&Error::Auth("short security layer offer".into())).await,
            Err(e) => return self.gss_abort(&e).await,
        };
        if offer[0] & LAYER_NONE == 0 {
            return self
                .gss_abort(&Error::Auth("server requires integrity or privacy".into()))
                .await;
        }
        debug!(
            max_token = u32::from_be_bytes([0, offer[1], offer[2], offer[3]]),
            "security layer offer"
        );

        let mut request = vec![LAYER_NONE, offer[1], offer[2], offer[3]];
        request.extend_from_slice(user.as_bytes());
        let wrapped = match context.wrap(&request) {
            Ok(wrapped) => wrapped,
            Err(e) => return self.gss_abort(&e).await,
        };
        debug!(%user, "requesting authorisation");
        self.send_raw(&sasl_line(&wrapped), true).await?;

        match self.step_until_done().await? {
            CommandState::Ok => Ok(AuthResult::Success),
            CommandState::Respond => {
                debug!("unexpected server continuation request");
                self.gss_abort(&Error::Auth("unexpected continuation".into())).await
            }
            _ => Ok(AuthResult::Failure),
        }
    }

    async fn gss_abort(&mut self, error: &Error) -> Result<AuthResult> {
        debug!(%error, "aborting GSSAPI exchange");
        self.abort_authenticate().await?;
        Ok(AuthResult::Failure)
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

    /// Identity "crypto": one round trip, then wrap/unwrap are no-ops.
    struct Fake;

    struct FakeContext {
        round: u8,
    }

    impl GssapiProvider for Fake {
        fn start(&self, service: &str) -> Result<Box<dyn GssapiContext>> {
            assert_eq!(service, "imap@imap.example.com");
            Ok(Box::new(FakeContext { round: 0 }))
        }
    }

    impl GssapiContext for FakeContext {
        fn step(&mut self, _input: Option<&[u8]>) -> Result<GssapiStep> {
            self.round += 1;
            Ok(GssapiStep {
                token: vec![b'0' + self.round],
                complete: self.round == 2,
            })
        }

        fn unwrap(&mut self, token: &[u8]) -> Result<Vec<u8>> {
            Ok(token.to_vec())
        }

        fn wrap(&mut self, data: &[u8]) -> Result<Vec<u8>> {
            Ok(data.to_vec())
        }
    }

    fn with_fake(account: ImapAccount) -> ImapAccount {
        account.with_collaborators(Collaborators {
            gssapi: Some(Arc::new(Fake)),
            ..Collaborators::default()
        })
    }

    #[tokio::test]
    async fn test_handshake() {
        // tokens "1" and "2"; offer 07 00 10 00; answer 01 00 10 00 "joe"
        let mock = Builder::new()
            .write(b"a0001 AUTHENTICATE GSSAPI\r\n")
            .read(b"+ \r\n")
            .write(b"MQ==\r\n")
            .read(b"+ c2VydmVy\r\n")
            .write(b"Mg==\r\n")
            .read(b"+ BwAQAA==\r\n")
            .write(b"AQAQAGpvZQ==\r\n")
            .read(b"a0001 OK GSSAPI authentication successful\r\n")
            .build();
        let account = account_for(mock, options(), "IMAP4rev1 AUTH=GSSAPI", true);
        let mut account = with_fake(account);
        assert_eq!(account.auth_gss().await.unwrap(), AuthResult::Success);
    }

    #[tokio::test]
    async fn test_privacy_required_is_refused() {
        let mock = Builder::new()
            .write(b"a0001 AUTHENTICATE GSSAPI\r\n")
            .read(b"+ \r\n")
            .write(b"MQ==\r\n")
            .read(b"+ c2VydmVy\r\n")
            .write(b"Mg==\r\n")
            .read(b"+ BAAQAA==\r\n")
            .write(b"*\r\n")
            .read(b"a0001 BAD aborted\r\n")
            .build();
        let account = account_for(mock, options(), "IMAP4rev1 AUTH=GSSAPI", true);
        let mut account = with_fake(account);
        assert_eq!(account.auth_gss().await.unwrap(), AuthResult::Failure);
        assert!(!account.is_fatal());
    }

    #[tokio::test]
    async fn test_unavailable_without_provider() {
        let mock = Builder::new().build();
        let mut account = account_for(mock, options(), "IMAP4rev1 AUTH=GSSAPI", true);
        assert_eq!(account.auth_gss().await.unwrap(), AuthResult::Unavail);
    }
}
