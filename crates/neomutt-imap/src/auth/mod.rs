//! Authentication.
//!
//! [`ImapAccount::authenticate`] walks an ordered list of [`Mechanism`]s
//! until one succeeds. Each mechanism reports one of three outcomes:
//!
//! - [`AuthResult::Success`]: the server accepted us.
//! - [`AuthResult::Failure`]: the method was tried and rejected.
//! - [`AuthResult::Unavail`]: the method does not apply here (capability
//!   missing, no credentials, no provider) and does not count as a try.
//!
//! SASL and GSSAPI need system libraries; they are reached through the
//! [`SaslProvider`] and [`GssapiProvider`] traits and report `Unavail`
//! when no provider is installed.

mod anonymous;
mod cram;
mod gss;
mod login;
mod oauth;
mod plain;
mod sasl;

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, info, warn};

use crate::engine::{AccountState, ImapAccount};
use crate::{Error, Result};

pub use cram::hmac_md5;
pub use gss::{GssapiContext, GssapiProvider, GssapiStep};
pub use oauth::OAuthError;
pub use sasl::{SaslProvider, SaslSession};

/// An authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// `AUTHENTICATE OAUTHBEARER` (RFC 7628).
    OAuthBearer,
    /// `AUTHENTICATE XOAUTH2`.
    XOAuth2,
    /// `AUTHENTICATE PLAIN` (RFC 4616).
    Plain,
    /// Whatever the SASL provider negotiates.
    Sasl,
    /// `AUTHENTICATE ANONYMOUS`.
    Anonymous,
    /// `AUTHENTICATE GSSAPI` (RFC 1731).
    Gssapi,
    /// `AUTHENTICATE CRAM-MD5` (RFC 2195).
    CramMd5,
    /// The `LOGIN` command.
    Login,
}

impl Mechanism {
    /// Order tried when `imap_authenticators` is empty.
    pub const DEFAULT_ORDER: &'static [Self] = &[
        Self::OAuthBearer,
        Self::XOAuth2,
        Self::Plain,
        Self::Sasl,
        Self::Anonymous,
        Self::Gssapi,
        Self::CramMd5,
        Self::Login,
    ];

    /// The method's name as used in `imap_authenticators`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OAuthBearer => "oauthbearer",
            Self::XOAuth2 => "xoauth2",
            Self::Plain => "plain",
            Self::Sasl => "sasl",
            Self::Anonymous => "anonymous",
            Self::Gssapi => "gssapi",
            Self::CramMd5 => "cram-md5",
            Self::Login => "login",
        }
    }

    /// The SASL mechanism name, for methods that have one.
    #[must_use]
    pub const fn sasl_name(self) -> Option<&'static str> {
        match self {
            Self::OAuthBearer => Some("OAUTHBEARER"),
            Self::XOAuth2 => Some("XOAUTH2"),
            Self::Plain => Some("PLAIN"),
            Self::Anonymous => Some("ANONYMOUS"),
            Self::Gssapi => Some("GSSAPI"),
            Self::CramMd5 => Some("CRAM-MD5"),
            Self::Sasl | Self::Login => None,
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mechanism {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::DEFAULT_ORDER
            .iter()
            .copied()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown authenticator: {s}")))
    }
}

/// Outcome of one authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// Logged in.
    Success,
    /// Tried and rejected.
    Failure,
    /// Not applicable; try the next method.
    Unavail,
}

impl ImapAccount {
    /// Logs in.
    ///
    /// Tries the configured authenticators (or the default order) until one
    /// succeeds, and returns the one that did. Calling this on an account
    /// that is already logged in does nothing.
    ///
    /// # Errors
    ///
    /// [`Error::NoAuthenticators`] if every method was unavailable,
    /// [`Error::Auth`] if a method was rejected, or a transport error.
    pub async fn authenticate(&mut self) -> Result<Option<Mechanism>> {
        if self.state >= AccountState::Authenticated {
            return Ok(None);
        }
        if self.state < AccountState::Connected {
            return Err(Error::InvalidState("not connected".to_string()));
        }

        let explicit = !self.options.authenticators.is_empty();
        let order: Vec<Mechanism> = if explicit {
            self.options.authenticators.clone()
        } else {
            let have_sasl = self.collab.sasl.is_some();
            Mechanism::DEFAULT_ORDER
                .iter()
                .copied()
                .filter(|m| !(have_sasl && matches!(m, Mechanism::Anonymous | Mechanism::CramMd5)))
                .collect()
        };

        let mut failed = None;
        for mech in order {
            debug!(method = %mech, "trying authentication method");
            match self.try_mechanism(mech, explicit).await? {
                AuthResult::Success => {
                    info!(method = %mech, host = %self.account.host, "authenticated");
                    self.state = AccountState::Authenticated;
                    return Ok(Some(mech));
                }
                AuthResult::Failure => {
                    warn!(method = %mech, "authentication failed");
                    failed = Some(mech);
                    if !self.options.auth_try_all {
                        break;
                    }
                }
                AuthResult::Unavail => debug!(method = %mech, "authentication method unavailable"),
            }
        }

        match failed {
            Some(mech) => Err(Error::Auth(format!("{} authentication failed", mech.name().to_ascii_uppercase()))),
            None => Err(Error::NoAuthenticators),
        }
    }

    async fn try_mechanism(&mut self, mech: Mechanism, explicit: bool) -> Result<AuthResult> {
        let via_sasl = self.collab.sasl.is_some();
        match mech {
            Mechanism::OAuthBearer => self.auth_oauth(false, explicit).await,
            Mechanism::XOAuth2 => self.auth_oauth(true, explicit).await,
            Mechanism::Plain => self.auth_plain().await,
            Mechanism::Sasl => self.auth_sasl(None).await,
            Mechanism::Anonymous | Mechanism::CramMd5 if via_sasl => self.auth_sasl(mech.sasl_name()).await,
            Mechanism::Anonymous => self.auth_anonymous().await,
            Mechanism::Gssapi => self.auth_gss().await,
            Mechanism::CramMd5 => self.auth_cram_md5().await,
            Mechanism::Login => self.auth_login().await,
        }
    }

    /// The user name, from the options, the URL or the prompt.
    pub(crate) async fn auth_user(&mut self) -> Option<String> {
        if let Some(user) = self.options.user.clone().or_else(|| self.account.user.clone()) {
            self.account.user = Some(user.clone());
            return Some(user);
        }
        let user = self.collab.prompt.user(&self.account.host).await?;
        self.account.user = Some(user.clone());
        Some(user)
    }

    /// The SASL login, defaulting to the user name.
    pub(crate) async fn auth_login_name(&mut self) -> Option<String> {
        if let Some(login) = self.options.login.clone().or_else(|| self.account.login.clone()) {
            return Some(login);
        }
        let user = self.auth_user().await?;
        let login = self.collab.prompt.login(&self.account.host, &user).await;
        let login = login.filter(|l| !l.is_empty()).unwrap_or(user);
        self.account.login = Some(login.clone());
        Some(login)
    }

    /// The password, from the options, the URL or the prompt.
    pub(crate) async fn auth_pass(&mut self) -> Option<String> {
        if let Some(pass) = self.options.pass.as_ref().or(self.account.pass.as_ref()) {
            return Some(pass.expose().to_string());
        }
        let login = self.auth_login_name().await?;
        let pass = self.collab.prompt.pass(&self.account.host, &login).await?;
        self.account.pass = Some(crate::config::Secret::new(pass.clone()));
        Some(pass)
    }

    /// Returns true if the connection is protected by TLS or a secure tunnel.
    pub(crate) fn is_secure(&self) -> bool {
        self.stream().is_some_and(crate::connection::ImapStream::is_secure)
    }

    /// The last continuation text, base64 decoded.
    pub(crate) fn continuation_data(&self) -> Option<Vec<u8>> {
        let text = self.continuation.trim();
        if text.is_empty() {
            return Some(Vec::new());
        }
        STANDARD.decode(text).ok()
    }
}

/// Base64 line sent as a SASL response.
pub(crate) fn sasl_line(data: &[u8]) -> Vec<u8> {
    let mut line = STANDARD.encode(data).into_bytes();
    line.extend_from_slice(b"\r\n");
    line
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
pub(crate) mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_test::io::Builder;

    use super::*;
    use crate::config::ImapOptions;
    use crate::connection::ImapStream;
    use crate::types::Capabilities;
    use crate::url::ConnAccount;

    pub(crate) fn account_for(
        mock: tokio_test::io::Mock,
        options: ImapOptions,
        caps: &str,
        secure: bool,
    ) -> ImapAccount {
        let mut conn = ConnAccount::new("imap.example.com", secure);
        conn.user = Some("joe".to_string());
        let mut account = ImapAccount::new(conn, Arc::new(options), 'a');
        account.attach(ImapStream::custom(mock, secure));
        account.capabilities = Capabilities::parse(caps);
        account.capstr = Some(caps.to_string());
        account
    }

    pub(crate) fn options() -> ImapOptions {
        ImapOptions::builder()
            .pass("secret")
            .poll_timeout(Duration::ZERO)
            .build()
            .unwrap()
    }

    #[test]
    fn test_mechanism_names() {
        assert_eq!("CRAM-MD5".parse::<Mechanism>().unwrap(), Mechanism::CramMd5);
        assert_eq!("xoauth2".parse::<Mechanism>().unwrap(), Mechanism::XOAuth2);
        assert!(matches!("digest-md5".parse::<Mechanism>(), Err(Error::Config(_))));
        assert_eq!(Mechanism::DEFAULT_ORDER.first(), Some(&Mechanism::OAuthBearer));
        assert_eq!(Mechanism::DEFAULT_ORDER.last(), Some(&Mechanism::Login));
    }

    #[tokio::test]
    async fn test_oauth_unavailable_then_plain() {
        let mock = Builder::new()
            .write(b"a0001 AUTHENTICATE PLAIN\r\n")
            .read(b"+ \r\n")
            .write(b"am9lAGpvZQBzZWNyZXQ=\r\n")
            .read(b"a0001 OK [CAPABILITY IMAP4rev1 IDLE] Logged in\r\n")
            .build();
        let mut account = account_for(mock, options(), "IMAP4rev1 AUTH=OAUTHBEARER AUTH=PLAIN", true);

        let used = account.authenticate().await.unwrap();
        assert_eq!(used, Some(Mechanism::Plain));
        assert_eq!(account.state(), AccountState::Authenticated);
        assert!(account.capabilities().contains(Capabilities::IDLE));
    }

    #[tokio::test]
    async fn test_authenticate_is_idempotent() {
        let mock = Builder::new().build();
        let mut account = account_for(mock, options(), "IMAP4rev1", true);
        account.state = AccountState::Authenticated;
        assert_eq!(account.authenticate().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_authenticators() {
        let options = ImapOptions::builder()
            .authenticators("gssapi:sasl")
            .build()
            .unwrap();
        let mock = Builder::new().build();
        let mut account = account_for(mock, options, "IMAP4rev1 AUTH=GSSAPI", true);
        assert!(matches!(account.authenticate().await, Err(Error::NoAuthenticators)));
        assert_eq!(account.state(), AccountState::Connected);
    }

    #[tokio::test]
    async fn test_missing_password_is_unavailable() {
        let options = ImapOptions::builder()
            .poll_timeout(Duration::ZERO)
            .build()
            .unwrap();
        let mock = Builder::new().build();
        let mut account = account_for(mock, options, "IMAP4rev1 AUTH=PLAIN", true);
        assert!(matches!(account.authenticate().await, Err(Error::NoAuthenticators)));
        assert_eq!(account.state(), AccountState::Connected);
        assert!(!account.is_fatal());
    }

    #[tokio::test]
    async fn test_missing_password_does_not_end_walk() {
        let options = ImapOptions::builder()
            .authenticators("login:anonymous")
            .auth_try_all(false)
            .poll_timeout(Duration::ZERO)
            .build()
            .unwrap();
        let mock = Builder::new()
            .write(b"a0001 AUTHENTICATE ANONYMOUS\r\n")
            .read(b"+ \r\n")
            .write(b"ZHVtbXkK\r\n")
            .read(b"a0001 OK welcome\r\n")
            .build();
        let mut account = ImapAccount::new(ConnAccount::new("imap.example.com", true), Arc::new(options), 'a');
        account.attach(ImapStream::custom(mock, true));
        account.capabilities = Capabilities::parse("IMAP4rev1 AUTH=ANONYMOUS");

        assert_eq!(account.authenticate().await.unwrap(), Some(Mechanism::Anonymous));
    }

    #[tokio::test]
    async fn test_failure_stops_without_try_all() {
        let options = ImapOptions::builder()
            .pass("wrong")
            .authenticators("login:cram-md5")
            .auth_try_all(false)
            .poll_timeout(Duration::ZERO)
            .build()
            .unwrap();
        let mock = Builder::new()
            .write(b"a0001 LOGIN \"joe\" \"wrong\"\r\n")
            .read(b"a0001 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
            .build();
        let mut account = account_for(mock, options, "IMAP4rev1 AUTH=CRAM-MD5", true);
        assert!(matches!(account.authenticate().await, Err(Error::Auth(_))));
        assert!(!account.is_fatal());
    }
}
