//! # neomutt-imap
//!
//! A pipelined IMAP client engine: one [`ImapAccount`] per server login,
//! driving a single connection through greeting, STARTTLS,
//! authentication, mailbox selection, flag synchronisation and logout.
//!
//! ## Features
//!
//! - **Pipelining**: commands are queued into a bounded ring and matched
//!   to their tagged responses; untagged data is applied as it arrives
//! - **Transports**: TCP, TLS via rustls, a tunnel subprocess, or any
//!   caller-supplied `AsyncRead + AsyncWrite`, with optional
//!   COMPRESS=DEFLATE layered on top
//! - **Authentication**: OAUTHBEARER, XOAUTH2, PLAIN, ANONYMOUS,
//!   CRAM-MD5, LOGIN, and SASL/GSSAPI through pluggable providers
//! - **Mailbox sessions**: SELECT/EXAMINE with CONDSTORE and QRESYNC,
//!   incremental header download, flag sync, EXPUNGE, COPY and APPEND
//! - **Header cache**: per-mailbox stores from `neomutt-hcache`, scoped
//!   by UIDVALIDITY
//!
//! ## Quick Start
//!
//! ```no_run
//! use neomutt_imap::{ImapOptions, ImapUrl, Registry};
//!
//! # async fn example() -> neomutt_imap::Result<()> {
//! let options = ImapOptions::builder().pass("secret").build()?;
//! let mut registry = Registry::new(options);
//!
//! let url = ImapUrl::parse("imaps://joe@imap.example.com/INBOX")?;
//! let account = registry.find_or_connect(&url).await?;
//! account.select(&url.mailbox, false).await?;
//!
//! if let Some(mailbox) = account.mailbox() {
//!     println!("{} messages", mailbox.message_count());
//! }
//!
//! registry.logout_all().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Account States
//!
//! ```text
//! Disconnected ── connect() ──→ Connected ── authenticate() ──→ Authenticated
//!                                                                   │
//!                                         select() / close_mailbox()│
//!                                                                   ▼
//!                                                               Selected ⇄ Idle
//! ```
//!
//! Any transport or protocol failure makes the account fatal: the
//! connection is dropped and every later call returns [`Error::Fatal`].
//!
//! ## Modules
//!
//! - [`auth`]: authentication methods and the SASL/GSSAPI seams
//! - [`connection`]: transports and framed I/O
//! - [`mailbox`]: mailbox state, messages and body caching
//! - [`parser`]: response parser
//! - [`path`]: mailbox name quoting, munging and comparison
//! - [`types`]: capabilities, flags, ACL rights and response codes

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod command;
pub mod config;
pub mod connection;
mod engine;
mod error;
pub mod mailbox;
pub mod parser;
pub mod path;
pub mod prompt;
mod registry;
pub mod seqset;
mod session;
pub mod types;
pub mod url;
pub mod utf7;

pub use auth::{AuthResult, Mechanism};
pub use config::{ImapOptions, ImapOptionsBuilder, Secret};
pub use engine::{AccountState, AccountStatus, Collaborators, ImapAccount};
pub use error::{Error, ErrorKind, Result};
pub use mailbox::{BodyCache, BrowseEntry, CheckResult, Email, ImapMailbox, MailboxStatus};
pub use prompt::{NoPrompt, Prompt};
pub use registry::Registry;
pub use types::{AclRights, Capabilities, MessageFlags};
pub use url::{ConnAccount, ImapUrl};
