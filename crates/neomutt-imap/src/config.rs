//! Engine options.
//!
//! Every option has the same default as the corresponding `imap_*` /
//! `ssl_*` setting of the mail client. Build with [`ImapOptions::builder`];
//! the builder validates the authenticator list up front so a typo is
//! reported before any network I/O.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::Mechanism;
use crate::{Error, Result};

/// A string that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret itself.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Options read by the IMAP engine.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct ImapOptions {
    /// `imap_user`: overrides the user from the URL.
    pub user: Option<String>,
    /// `imap_login`: SASL authorization login, defaults to `user`.
    pub login: Option<String>,
    /// `imap_pass`.
    pub pass: Option<Secret>,
    /// `imap_oauth_refresh_command`: prints an access token on stdout.
    pub oauth_refresh_command: Option<String>,
    /// `imap_authenticators`: allowed methods in order; empty means the default order.
    pub authenticators: Vec<Mechanism>,
    /// Try the next method after one fails instead of giving up.
    pub auth_try_all: bool,
    /// `imap_check_subscribed`.
    pub check_subscribed: bool,
    /// `imap_condstore`.
    pub condstore: bool,
    /// `imap_qresync`.
    pub qresync: bool,
    /// `imap_deflate`.
    pub deflate: bool,
    /// `imap_delim_chars`.
    pub delim_chars: String,
    /// `imap_fetch_chunk_size`: 0 fetches everything at once.
    pub fetch_chunk_size: u32,
    /// `imap_headers`: extra header names to download.
    pub headers: Option<String>,
    /// `imap_idle`.
    pub idle: bool,
    /// `imap_keepalive`.
    pub keepalive: Duration,
    /// `imap_list_subscribed`.
    pub list_subscribed: bool,
    /// `imap_passive`.
    pub passive: bool,
    /// `imap_peek`.
    pub peek: bool,
    /// `imap_pipeline_depth`.
    pub pipeline_depth: usize,
    /// `imap_poll_timeout`.
    pub poll_timeout: Duration,
    /// `imap_rfc5161`.
    pub rfc5161: bool,
    /// `imap_servernoise`.
    pub servernoise: bool,
    /// `imap_send_id`.
    pub send_id: bool,
    /// `ssl_force_tls`.
    pub ssl_force_tls: bool,
    /// `ssl_starttls`.
    pub ssl_starttls: bool,
    /// `tunnel`: shell command replacing the socket.
    pub tunnel: Option<String>,
    /// `tunnel_is_secure`.
    pub tunnel_is_secure: bool,
    /// `timeout`: idle time before `check_mailbox` sends NOOP.
    pub timeout: Duration,
    /// `mark_old`.
    pub mark_old: bool,
    /// `message_cache_clean`.
    pub message_cache_clean: bool,
    /// `header_cache`: directory for the SQLite header cache.
    pub header_cache: Option<PathBuf>,
    /// `confirm_create`.
    pub confirm_create: bool,
}

impl Default for ImapOptions {
    fn default() -> Self {
        Self {
            user: None,
            login: None,
            pass: None,
            oauth_refresh_command: None,
            authenticators: Vec::new(),
            auth_try_all: true,
            check_subscribed: false,
            condstore: false,
            qresync: false,
            deflate: true,
            delim_chars: "/.".to_string(),
            fetch_chunk_size: 0,
            headers: None,
            idle: false,
            keepalive: Duration::from_secs(300),
            list_subscribed: false,
            passive: true,
            peek: true,
            pipeline_depth: 15,
            poll_timeout: Duration::from_secs(15),
            rfc5161: true,
            servernoise: true,
            send_id: false,
            ssl_force_tls: false,
            ssl_starttls: true,
            tunnel: None,
            tunnel_is_secure: true,
            timeout: Duration::from_secs(600),
            mark_old: true,
            message_cache_clean: false,
            header_cache: None,
            confirm_create: true,
        }
    }
}

impl ImapOptions {
    /// Creates a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> ImapOptionsBuilder {
        ImapOptionsBuilder::default()
    }

    /// Number of slots in the command ring.
    #[must_use]
    pub const fn ring_slots(&self) -> usize {
        self.pipeline_depth + 2
    }

    /// Returns true if `c` separates hierarchy levels in a path typed by the user.
    #[must_use]
    pub fn is_delim_char(&self, c: char) -> bool {
        self.delim_chars.contains(c)
    }
}

/// Builder for [`ImapOptions`].
#[derive(Debug, Clone, Default)]
pub struct ImapOptionsBuilder {
    options: ImapOptions,
    authenticators: Option<String>,
}

macro_rules! setters {
    ($($(#[$doc:meta])* $name:ident: $ty:ty;)*) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub fn $name(mut self, value: $ty) -> Self {
                self.options.$name = value;
                self
            }
        )*
    };
}

impl ImapOptionsBuilder {
    setters! {
        /// Allows falling through to the next authenticator after a failure.
        auth_try_all: bool;
        /// Sets `imap_check_subscribed`.
        check_subscribed: bool;
        /// Sets `imap_condstore`.
        condstore: bool;
        /// Sets `imap_qresync`.
        qresync: bool;
        /// Sets `imap_deflate`.
        deflate: bool;
        /// Sets `imap_fetch_chunk_size`.
        fetch_chunk_size: u32;
        /// Sets `imap_idle`.
        idle: bool;
        /// Sets `imap_keepalive`.
        keepalive: Duration;
        /// Sets `imap_list_subscribed`.
        list_subscribed: bool;
        /// Sets `imap_passive`.
        passive: bool;
        /// Sets `imap_peek`.
        peek: bool;
        /// Sets `imap_pipeline_depth`.
        pipeline_depth: usize;
        /// Sets `imap_poll_timeout`.
        poll_timeout: Duration;
        /// Sets `imap_rfc5161`.
        rfc5161: bool;
        /// Sets `imap_servernoise`.
        servernoise: bool;
        /// Sets `imap_send_id`.
        send_id: bool;
        /// Sets `ssl_force_tls`.
        ssl_force_tls: bool;
        /// Sets `ssl_starttls`.
        ssl_starttls: bool;
        /// Sets `tunnel_is_secure`.
        tunnel_is_secure: bool;
        /// Sets `timeout`.
        timeout: Duration;
        /// Sets `mark_old`.
        mark_old: bool;
        /// Sets `message_cache_clean`.
        message_cache_clean: bool;
        /// Sets `confirm_create`.
        confirm_create: bool;
    }

    /// Sets `imap_user`.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.options.user = Some(user.into());
        self
    }

    /// Sets `imap_login`.
    #[must_use]
    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.options.login = Some(login.into());
        self
    }

    /// Sets `imap_pass`.
    #[must_use]
    pub fn pass(mut self, pass: impl Into<String>) -> Self {
        self.options.pass = Some(Secret::new(pass));
        self
    }

    /// Sets `imap_oauth_refresh_command`.
    #[must_use]
    pub fn oauth_refresh_command(mut self, command: impl Into<String>) -> Self {
        self.options.oauth_refresh_command = Some(command.into());
        self
    }

    /// Sets `imap_authenticators`, a colon-separated list such as `"oauthbearer:plain"`.
    #[must_use]
    pub fn authenticators(mut self, list: impl Into<String>) -> Self {
        self.authenticators = Some(list.into());
        self
    }

    /// Sets `imap_delim_chars`.
    #[must_use]
    pub fn delim_chars(mut self, chars: impl Into<String>) -> Self {
        self.options.delim_chars = chars.into();
        self
    }

    /// Sets `imap_headers`.
    #[must_use]
    pub fn headers(mut self, headers: impl Into<String>) -> Self {
        self.options.headers = Some(headers.into());
        self
    }

    /// Sets `tunnel`.
    #[must_use]
    pub fn tunnel(mut self, command: impl Into<String>) -> Self {
        self.options.tunnel = Some(command.into());
        self
    }

    /// Sets `header_cache`.
    #[must_use]
    pub fn header_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.header_cache = Some(dir.into());
        self
    }

    /// Validates and builds the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown authenticator name or a zero
    /// pipeline depth.
    pub fn build(mut self) -> Result<ImapOptions> {
        if let Some(list) = self.authenticators.take() {
            self.options.authenticators = list
                .split(':')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect::<Result<_>>()?;
        }
        if self.options.pipeline_depth == 0 {
            return Err(Error::Config("imap_pipeline_depth must be at least 1".into()));
        }
        Ok(self.options)
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
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ImapOptions::default();
        assert_eq!(opts.pipeline_depth, 15);
        assert_eq!(opts.ring_slots(), 17);
        assert_eq!(opts.poll_timeout, Duration::from_secs(15));
        assert!(opts.peek);
        assert!(opts.is_delim_char('.'));
        assert!(!opts.is_delim_char('|'));
    }

    #[test]
    fn test_builder() {
        let opts = ImapOptions::builder()
            .user("alice")
            .pass("hunter2")
            .authenticators("cram-md5:LOGIN")
            .qresync(true)
            .pipeline_depth(4)
            .build()
            .unwrap();
        assert_eq!(opts.user.as_deref(), Some("alice"));
        assert_eq!(opts.authenticators, vec![Mechanism::CramMd5, Mechanism::Login]);
        assert!(opts.qresync);
        assert_eq!(opts.ring_slots(), 6);
    }

    #[test]
    fn test_unknown_authenticator() {
        let err = ImapOptions::builder().authenticators("plain:kerberos5").build();
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_password_redacted() {
        let opts = ImapOptions::builder().pass("hunter2").build().unwrap();
        let debug = format!("{opts:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
