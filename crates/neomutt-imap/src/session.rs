//! Connecting, logging in and logging out.
//!
//! [`ImapAccount::connect`] runs the whole handshake: greeting,
//! CAPABILITY, STARTTLS, authentication, then the post-login extras
//! (ENABLE, ID, delimiter discovery and COMPRESS). An account connects
//! once; after a fatal error the caller builds a new one.

use tracing::{debug, error, info, warn};

use crate::command::ExecFlags;
use crate::connection::{ImapStream, connect_plain, connect_tls};
use crate::engine::{AccountState, AccountStatus, ImapAccount};
use crate::parser::UntaggedResponse;
use crate::types::Capabilities;
use crate::{Error, Result};

impl ImapAccount {
    /// Opens the connection described by the account and logs in.
    ///
    /// Uses the `tunnel` command when one is configured, implicit TLS for
    /// `imaps://`, and plain TCP otherwise.
    ///
    /// # Errors
    ///
    /// Transport, TLS and authentication errors. The account is left
    /// fatal on any failure.
    pub async fn connect(&mut self) -> Result<()> {
        self.check_connectable()?;
        let stream = match self.open_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                error!(host = %self.account.host, error = %e, "could not connect");
                self.status = AccountStatus::Fatal;
                return Err(e);
            }
        };
        self.connect_with(stream).await
    }

    /// Runs the handshake over a transport the caller opened.
    ///
    /// # Errors
    ///
    /// Same as [`Self::connect`].
    pub async fn connect_with(&mut self, stream: ImapStream) -> Result<()> {
        self.check_connectable()?;
        self.attach(stream);
        self.capabilities = Capabilities::empty();
        self.capstr = None;

        if let Err(e) = self.handshake().await {
            if !self.is_fatal() {
                self.handle_fatal();
            }
            return Err(e);
        }
        info!(host = %self.account.host, "connected");
        Ok(())
    }

    fn check_connectable(&self) -> Result<()> {
        if self.status == AccountStatus::Fatal {
            return Err(Error::Fatal);
        }
        if self.state != AccountState::Disconnected {
            return Err(Error::InvalidState("already connected".to_string()));
        }
        Ok(())
    }

    async fn open_stream(&mut self) -> Result<ImapStream> {
        if let Some(command) = &self.options.tunnel {
            debug!(%command, "opening tunnel");
            return ImapStream::tunnel(command, self.options.tunnel_is_secure);
        }
        if self.account.ssl {
            connect_tls(&self.account.host, self.account.port).await
        } else {
            connect_plain(&self.account.host, self.account.port).await
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        self.read_greeting().await?;
        if self.capstr.is_none() {
            self.exec(Some("CAPABILITY"), ExecFlags::empty()).await?;
        }

        if self.state == AccountState::Connected {
            self.negotiate_tls().await?;
            self.authenticate().await?;
        } else if self.options.ssl_force_tls && !self.is_secure() {
            error!(host = %self.account.host, "pre-authenticated connection is not secure");
            return Err(Error::Protocol("refusing unencrypted pre-authenticated connection".to_string()));
        }

        self.after_login().await
    }

    async fn read_greeting(&mut self) -> Result<()> {
        let poll_timeout = self.options.poll_timeout;
        if !poll_timeout.is_zero() && !self.poll(poll_timeout).await? {
            error!(host = %self.account.host, "no greeting from server");
            self.handle_fatal();
            return Err(Error::Timeout(poll_timeout));
        }

        // a BYE greeting fails inside step
        self.step().await?;
        match self.take_response() {
            Some(UntaggedResponse::Ok { text, .. }) => {
                debug!(greeting = %text, "server ready");
                Ok(())
            }
            Some(UntaggedResponse::PreAuth { text, .. }) => {
                debug!(greeting = %text, "pre-authenticated");
                self.state = AccountState::Authenticated;
                Ok(())
            }
            _ => {
                error!(host = %self.account.host, "unexpected greeting");
                Err(Error::Protocol("unexpected greeting".to_string()))
            }
        }
    }

    async fn negotiate_tls(&mut self) -> Result<()> {
        if self.is_secure() {
            return Ok(());
        }

        let wanted = self.options.ssl_starttls || self.options.ssl_force_tls;
        if wanted && self.capabilities.contains(Capabilities::STARTTLS) {
            self.exec(Some("STARTTLS"), ExecFlags::empty()).await?;
            let Some((stream, ahead)) = self.detach() else {
                return Err(Error::Fatal);
            };
            if !ahead.is_empty() {
                warn!(bytes = ahead.len(), "discarding data sent before the TLS handshake");
            }
            let stream = match stream.upgrade_to_tls(&self.account.host).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(host = %self.account.host, error = %e, "TLS handshake failed");
                    self.handle_fatal();
                    return Err(e);
                }
            };
            self.reattach(stream);

            // capabilities seen in plaintext are not trusted
            self.capabilities = Capabilities::empty();
            self.capstr = None;
            self.exec(Some("CAPABILITY"), ExecFlags::empty()).await?;
        }

        if self.options.ssl_force_tls && !self.is_secure() {
            error!(host = %self.account.host, "server does not offer STARTTLS");
            return Err(Error::Protocol("encrypted connection unavailable".to_string()));
        }
        Ok(())
    }

    async fn after_login(&mut self) -> Result<()> {
        if self.capabilities.contains(Capabilities::QRESYNC) {
            self.capabilities |= Capabilities::CONDSTORE;
        }

        if self.options.rfc5161 && self.capabilities.contains(Capabilities::ENABLE) {
            if self.capabilities.contains(Capabilities::UTF8_ACCEPT) {
                self.exec(Some("ENABLE UTF8=ACCEPT"), ExecFlags::QUEUE).await?;
            }
            if self.options.qresync && self.capabilities.contains(Capabilities::QRESYNC) {
                self.exec(Some("ENABLE QRESYNC"), ExecFlags::QUEUE).await?;
            }
        }

        if self.options.send_id && self.capabilities.contains(Capabilities::ID) {
            let id = format!(
                "ID (\"name\" \"NeoMutt\" \"version\" \"{}\")",
                env!("CARGO_PKG_VERSION")
            );
            self.exec(Some(&id), ExecFlags::QUEUE).await?;
        }

        // the empty name reports the hierarchy delimiter
        self.exec(Some("LIST \"\" \"\""), ExecFlags::QUEUE).await?;
        if let Err(e) = self.flush().await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(error = %e, "post-login command failed");
        }

        if self.options.deflate && self.capabilities.contains(Capabilities::COMPRESS) {
            self.negotiate_compress().await?;
        }
        Ok(())
    }

    async fn negotiate_compress(&mut self) -> Result<()> {
        if self.stream().is_some_and(ImapStream::is_compressed) {
            debug!("connection already compressed");
            return Ok(());
        }
        match self.exec(Some("COMPRESS DEFLATE"), ExecFlags::empty()).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(error = %e, "server refused compression");
                return Ok(());
            }
        }

        let Some((stream, ahead)) = self.detach() else {
            return Err(Error::Fatal);
        };
        match stream.compress(&ahead) {
            Ok(stream) => {
                debug!("compression enabled");
                self.reattach(stream);
                Ok(())
            }
            Err(e) => {
                self.handle_fatal();
                Err(e)
            }
        }
    }

    /// Logs out and drops the connection.
    ///
    /// The selected mailbox is released first. Failures are logged and
    /// otherwise ignored: the connection is gone afterwards either way.
    pub async fn logout(&mut self) {
        if self.state == AccountState::Disconnected || self.is_fatal() {
            return;
        }
        self.release_mailbox().await;

        self.status = AccountStatus::Bye;
        if let Err(e) = self.exec(Some("LOGOUT"), ExecFlags::empty()).await {
            debug!(error = %e, "error during LOGOUT");
        }
        if self.status != AccountStatus::Fatal {
            drop(self.detach());
            self.state = AccountState::Disconnected;
        }
        info!(host = %self.account.host, "logged out");
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
    use std::time::Duration;

    use tokio_test::io::Builder;

    use super::*;
    use crate::config::ImapOptions;
    use crate::url::ConnAccount;

    fn fresh(options: ImapOptions) -> ImapAccount {
        let mut conn = ConnAccount::new("imap.example.com", false);
        conn.user = Some("joe".to_string());
        ImapAccount::new(conn, Arc::new(options), 'a')
    }

    fn base() -> crate::config::ImapOptionsBuilder {
        ImapOptions::builder()
            .pass("secret")
            .authenticators("login")
            .poll_timeout(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_greeting_with_capabilities() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 ID] ready\r\n")
            .write(b"a0001 LOGIN \"joe\" \"secret\"\r\n")
            .read(b"a0001 OK Logged in\r\n")
            .write(b"a0002 LIST \"\" \"\"\r\n")
            .read(b"* LIST (\\Noselect) \".\" \"\"\r\na0002 OK done\r\n")
            .build();
        let mut account = fresh(base().build().unwrap());
        account.connect_with(ImapStream::custom(mock, true)).await.unwrap();

        assert_eq!(account.state(), AccountState::Authenticated);
        assert_eq!(account.delimiter(), Some('.'));
        assert!(account.capabilities().contains(Capabilities::ID));
    }

    #[tokio::test]
    async fn test_capability_requested_when_missing() {
        let sent = format!(
            "a0003 ENABLE UTF8=ACCEPT\r\na0004 ENABLE QRESYNC\r\n\
             a0005 ID (\"name\" \"NeoMutt\" \"version\" \"{}\")\r\na0006 LIST \"\" \"\"\r\n",
            env!("CARGO_PKG_VERSION")
        );
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"a0001 CAPABILITY\r\n")
            .read(b"* CAPABILITY IMAP4rev1 ENABLE UTF8=ACCEPT QRESYNC ID\r\na0001 OK done\r\n")
            .write(b"a0002 LOGIN \"joe\" \"secret\"\r\n")
            .read(b"a0002 OK Logged in\r\n")
            .write(sent.as_bytes())
            .read(b"* ENABLED UTF8=ACCEPT\r\na0003 OK done\r\n* ENABLED QRESYNC\r\na0004 OK done\r\n")
            .read(b"* ID NIL\r\na0005 OK done\r\n* LIST () \"/\" \"\"\r\na0006 OK done\r\n")
            .build();
        let options = base().qresync(true).send_id(true).build().unwrap();
        let mut account = fresh(options);
        account.connect_with(ImapStream::custom(mock, true)).await.unwrap();

        assert!(account.is_unicode());
        assert!(account.is_qresync());
        assert!(account.capabilities().contains(Capabilities::CONDSTORE));
        assert_eq!(account.delimiter(), Some('/'));
    }

    #[tokio::test]
    async fn test_preauth_skips_login() {
        let mock = Builder::new()
            .read(b"* PREAUTH [CAPABILITY IMAP4rev1] welcome back\r\n")
            .write(b"a0001 LIST \"\" \"\"\r\n")
            .read(b"a0001 OK done\r\n")
            .build();
        let mut account = fresh(base().build().unwrap());
        account.connect_with(ImapStream::custom(mock, true)).await.unwrap();
        assert_eq!(account.state(), AccountState::Authenticated);
    }

    #[tokio::test]
    async fn test_bye_greeting() {
        let mock = Builder::new().read(b"* BYE too busy\r\n").build();
        let mut account = fresh(base().build().unwrap());
        let err = account.connect_with(ImapStream::custom(mock, true)).await.unwrap_err();
        assert!(matches!(err, Error::Bye(_)));
        assert!(account.is_fatal());
        // no second attempt on the same account
        let mock = Builder::new().build();
        assert!(matches!(
            account.connect_with(ImapStream::custom(mock, true)).await,
            Err(Error::Fatal)
        ));
    }

    #[tokio::test]
    async fn test_force_tls_without_starttls() {
        let mock = Builder::new().read(b"* OK [CAPABILITY IMAP4rev1] ready\r\n").build();
        let options = base().ssl_force_tls(true).build().unwrap();
        let mut account = fresh(options);
        let err = account.connect_with(ImapStream::custom(mock, false)).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(account.is_fatal());
    }

    #[tokio::test]
    async fn test_starttls_not_wanted() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 STARTTLS] ready\r\n")
            .write(b"a0001 LOGIN \"joe\" \"secret\"\r\n")
            .read(b"a0001 OK Logged in\r\n")
            .write(b"a0002 LIST \"\" \"\"\r\n")
            .read(b"a0002 OK done\r\n")
            .build();
        let options = base().ssl_starttls(false).build().unwrap();
        let mut account = fresh(options);
        account.connect_with(ImapStream::custom(mock, false)).await.unwrap();
        assert_eq!(account.state(), AccountState::Authenticated);
    }

    #[tokio::test]
    async fn test_starttls_refused() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 STARTTLS] ready\r\n")
            .write(b"a0001 STARTTLS\r\n")
            .read(b"a0001 NO not today\r\n")
            .build();
        let mut account = fresh(base().build().unwrap());
        let err = account.connect_with(ImapStream::custom(mock, false)).await.unwrap_err();
        assert!(matches!(err, Error::No(_)));
        assert!(account.is_fatal());
    }

    #[tokio::test]
    async fn test_compress_wraps_stream() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 COMPRESS=DEFLATE] ready\r\n")
            .write(b"a0001 LOGIN \"joe\" \"secret\"\r\n")
            .read(b"a0001 OK Logged in\r\n")
            .write(b"a0002 LIST \"\" \"\"\r\n")
            .read(b"a0002 OK done\r\n")
            .write(b"a0003 COMPRESS DEFLATE\r\n")
            .read(b"a0003 OK compressing\r\n")
            .build();
        let mut account = fresh(base().build().unwrap());
        account.connect_with(ImapStream::custom(mock, true)).await.unwrap();
        assert!(account.stream().unwrap().is_compressed());
    }

    #[tokio::test]
    async fn test_compress_refusal_is_harmless() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 COMPRESS=DEFLATE] ready\r\n")
            .write(b"a0001 LOGIN \"joe\" \"secret\"\r\n")
            .read(b"a0001 OK Logged in\r\n")
            .write(b"a0002 LIST \"\" \"\"\r\n")
            .read(b"a0002 OK done\r\n")
            .write(b"a0003 COMPRESS DEFLATE\r\n")
            .read(b"a0003 NO [COMPRESSIONACTIVE] already\r\n")
            .build();
        let mut account = fresh(base().build().unwrap());
        account.connect_with(ImapStream::custom(mock, true)).await.unwrap();
        assert!(!account.stream().unwrap().is_compressed());
        assert!(!account.is_fatal());
    }

    #[tokio::test]
    async fn test_logout_tolerates_bye() {
        let mock = Builder::new()
            .write(b"a0001 LOGOUT\r\n")
            .read(b"* BYE logging out\r\na0001 OK LOGOUT completed\r\n")
            .build();
        let mut account = crate::engine::tests::account_with(mock, AccountState::Authenticated);
        account.logout().await;
        assert_eq!(account.state(), AccountState::Disconnected);
        assert_eq!(account.conn_status(), AccountStatus::Bye);
    }

    #[tokio::test]
    async fn test_logout_when_server_hangs_up() {
        let mock = Builder::new()
            .write(b"a0001 LOGOUT\r\n")
            .read(b"* BYE bye\r\n")
            .build();
        let mut account = crate::engine::tests::account_with(mock, AccountState::Authenticated);
        account.logout().await;
        assert_eq!(account.state(), AccountState::Disconnected);
    }
}
