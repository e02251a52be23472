//! The command engine.
//!
//! An [`ImapAccount`] owns one connection and drives it one response at a
//! time. Commands are queued into a shared buffer, sent in batches, and
//! matched to their tagged responses through the [`CommandRing`]; untagged
//! data is applied to the account and the selected mailbox as it arrives.
//!
//! Everything takes `&mut self`: there is exactly one flow of control per
//! account, and every await point is inside the connection.

mod untagged;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use neomutt_hcache::{Backend, SqliteBackend};
use tracing::{debug, error, trace, warn};

use crate::auth::{GssapiProvider, SaslProvider};
use crate::command::{CommandRing, CommandState, ExecFlags, TagGenerator};
use crate::config::ImapOptions;
use crate::connection::{FramedStream, ImapStream};
use crate::mailbox::{BodyCache, ImapMailbox, MailboxStatus, ReopenFlags};
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::prompt::{NoPrompt, Prompt};
use crate::types::{Capabilities, ListEntry, ResponseCode};
use crate::url::ConnAccount;
use crate::{Error, Result};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccountState {
    /// No connection.
    Disconnected,
    /// Greeting read, not logged in.
    Connected,
    /// Logged in.
    Authenticated,
    /// A mailbox is selected.
    Selected,
    /// IDLE is running on the selected mailbox.
    Idle,
}

/// Health of the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountStatus {
    /// Usable.
    Ok,
    /// The connection failed; every call returns [`Error::Fatal`].
    Fatal,
    /// LOGOUT is in progress; the server's BYE is expected.
    Bye,
}

/// External services the engine calls out to.
#[derive(Clone)]
pub struct Collaborators {
    /// Credentials and confirmations.
    pub prompt: Arc<dyn Prompt>,
    /// SASL library binding.
    pub sasl: Option<Arc<dyn SaslProvider>>,
    /// GSSAPI binding.
    pub gssapi: Option<Arc<dyn GssapiProvider>>,
    /// Header cache backend.
    pub header_cache: Option<Arc<dyn Backend>>,
    /// Body cache.
    pub body_cache: Option<Arc<dyn BodyCache>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            prompt: Arc::new(NoPrompt),
            sasl: None,
            gssapi: None,
            header_cache: None,
            body_cache: None,
        }
    }
}

impl Collaborators {
    /// Fills in a SQLite header cache when the options name a directory
    /// and no backend was supplied.
    #[must_use]
    pub fn with_defaults(mut self, options: &ImapOptions) -> Self {
        if self.header_cache.is_none()
            && let Some(dir) = &options.header_cache
        {
            self.header_cache = Some(Arc::new(SqliteBackend::new(dir.clone())));
        }
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("sasl", &self.sasl.is_some())
            .field("gssapi", &self.gssapi.is_some())
            .field("header_cache", &self.header_cache.as_ref().map(|b| b.name()))
            .field("body_cache", &self.body_cache.is_some())
            .finish_non_exhaustive()
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One live IMAP connection to one server and user.
pub struct ImapAccount {
    conn: Option<FramedStream<ImapStream>>,
    pub(crate) account: ConnAccount,
    pub(crate) options: Arc<ImapOptions>,
    pub(crate) collab: Collaborators,
    pub(crate) state: AccountState,
    pub(crate) status: AccountStatus,
    pub(crate) capabilities: Capabilities,
    pub(crate) capstr: Option<String>,
    tags: TagGenerator,
    ring: CommandRing,
    cmdbuf: Vec<u8>,
    pub(crate) unicode: bool,
    pub(crate) qresync: bool,
    pub(crate) delim: Option<char>,
    pub(crate) mailbox: Option<ImapMailbox>,
    pub(crate) prev_mailbox: Option<String>,
    pub(crate) cmdresult: Option<Vec<ListEntry>>,
    pub(crate) subscribed: Vec<String>,
    pub(crate) search: Vec<u32>,
    pub(crate) statuses: HashMap<String, MailboxStatus>,
    pub(crate) closing: bool,
    pub(crate) last_read: Instant,
    interrupt: Arc<AtomicBool>,
    response: Option<UntaggedResponse>,
    pub(crate) continuation: String,
    pub(crate) last_text: String,
    pub(crate) last_code: Option<ResponseCode>,
}

impl fmt::Debug for ImapAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapAccount")
            .field("host", &self.account.host)
            .field("user", &self.account.user)
            .field("seqid", &self.tags.seqid())
            .field("state", &self.state)
            .field("status", &self.status)
            .field("capabilities", &self.capabilities)
            .field("mailbox", &self.mailbox.as_ref().map(|m| &m.name))
            .finish_non_exhaustive()
    }
}

impl ImapAccount {
    /// Creates a disconnected account.
    ///
    /// `seqid` prefixes every tag this account sends.
    #[must_use]
    pub fn new(account: ConnAccount, options: Arc<ImapOptions>, seqid: char) -> Self {
        let collab = Collaborators::default().with_defaults(&options);
        Self {
            conn: None,
            account,
            ring: CommandRing::new(options.ring_slots()),
            options,
            collab,
            state: AccountState::Disconnected,
            status: AccountStatus::Ok,
            capabilities: Capabilities::empty(),
            capstr: None,
            tags: TagGenerator::new(seqid),
            cmdbuf: Vec::new(),
            unicode: false,
            qresync: false,
            delim: None,
            mailbox: None,
            prev_mailbox: None,
            cmdresult: None,
            subscribed: Vec::new(),
            search: Vec::new(),
            statuses: HashMap::new(),
            closing: false,
            last_read: Instant::now(),
            interrupt: Arc::new(AtomicBool::new(false)),
            response: None,
            continuation: String::new(),
            last_text: String::new(),
            last_code: None,
        }
    }

    /// Replaces the collaborators.
    #[must_use]
    pub fn with_collaborators(mut self, collab: Collaborators) -> Self {
        self.collab = collab.with_defaults(&self.options);
        self
    }

    /// Shares an interrupt flag; setting it aborts the next command.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Who this account connects to.
    #[must_use]
    pub const fn account(&self) -> &ConnAccount {
        &self.account
    }

    /// The options in force.
    #[must_use]
    pub fn options(&self) -> &ImapOptions {
        &self.options
    }

    /// Connection state.
    #[must_use]
    pub const fn state(&self) -> AccountState {
        self.state
    }

    /// Account health.
    #[must_use]
    pub const fn conn_status(&self) -> AccountStatus {
        self.status
    }

    /// Returns true once the account has failed for good.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.status == AccountStatus::Fatal
    }

    /// Capabilities the server advertised.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// The capability list as sent. Dropped once logged in.
    #[must_use]
    pub fn capability_string(&self) -> Option<&str> {
        self.capstr.as_deref()
    }

    /// `UTF8=ACCEPT` is in effect.
    #[must_use]
    pub const fn is_unicode(&self) -> bool {
        self.unicode
    }

    /// `QRESYNC` is enabled.
    #[must_use]
    pub const fn is_qresync(&self) -> bool {
        self.qresync
    }

    /// The server's hierarchy delimiter, once known.
    #[must_use]
    pub const fn delimiter(&self) -> Option<char> {
        self.delim
    }

    /// The selected mailbox.
    #[must_use]
    pub const fn mailbox(&self) -> Option<&ImapMailbox> {
        self.mailbox.as_ref()
    }

    /// The selected mailbox, mutably.
    pub fn mailbox_mut(&mut self) -> Option<&mut ImapMailbox> {
        self.mailbox.as_mut()
    }

    /// Mailboxes collected from `LSUB` when `imap_check_subscribed` is set.
    #[must_use]
    pub fn subscribed(&self) -> &[String] {
        &self.subscribed
    }

    /// Last known status of a mailbox, by decoded name.
    #[must_use]
    pub fn mailbox_status(&self, name: &str) -> Option<&MailboxStatus> {
        self.statuses.get(name)
    }

    /// Text of the last tagged response.
    #[must_use]
    pub fn last_response_text(&self) -> &str {
        &self.last_text
    }

    /// Time of the last read from the server.
    #[must_use]
    pub const fn last_read(&self) -> Instant {
        self.last_read
    }

    /// Tag prefix of this account.
    #[must_use]
    pub const fn seqid(&self) -> char {
        self.tags.seqid()
    }

    /// Number of commands awaiting their tagged response.
    #[must_use]
    pub fn commands_in_flight(&self) -> usize {
        self.ring.len()
    }

    pub(crate) fn attach(&mut self, stream: ImapStream) {
        self.conn = Some(FramedStream::new(stream));
        self.state = AccountState::Connected;
        self.status = AccountStatus::Ok;
        self.last_read = Instant::now();
    }

    pub(crate) fn stream(&self) -> Option<&ImapStream> {
        self.conn.as_ref().map(FramedStream::get_ref)
    }

    /// Takes the transport out, with any bytes already read past the last
    /// response.
    pub(crate) fn detach(&mut self) -> Option<(ImapStream, Vec<u8>)> {
        self.conn.take().map(FramedStream::into_parts)
    }

    pub(crate) fn reattach(&mut self, stream: ImapStream) {
        self.conn = Some(FramedStream::new(stream));
    }

    pub(crate) fn take_response(&mut self) -> Option<UntaggedResponse> {
        self.response.take()
    }

    /// Runs one command to completion.
    ///
    /// With `cmd == None` only what is already queued is sent and drained.
    ///
    /// # Errors
    ///
    /// Tagged NO and BAD come back as [`Error::No`] and [`Error::Bad`] with
    /// the server's text; the account stays usable. Transport and protocol
    /// failures leave the account fatal.
    pub async fn exec(&mut self, cmd: Option<&str>, flags: ExecFlags) -> Result<()> {
        if self.status == AccountStatus::Fatal {
            return Err(Error::Fatal);
        }
        if self.interrupt.swap(false, Ordering::SeqCst) {
            debug!("interrupted before sending command");
            return Err(Error::Interrupted);
        }

        if flags.contains(ExecFlags::SINGLE) && !self.ring.is_empty() {
            if let Err(e) = self.drain(ExecFlags::POLL).await
                && e.is_fatal()
            {
                return Err(e);
            }
        }

        self.start(cmd, flags).await?;
        if flags.contains(ExecFlags::QUEUE) {
            return Ok(());
        }
        if self.ring.is_empty() {
            return Ok(());
        }

        match self.run(flags).await? {
            CommandState::Ok => Ok(()),
            state => Err(self.failure(state)),
        }
    }

    /// The error for a command that finished in `state`.
    pub(crate) fn failure(&self, state: CommandState) -> Error {
        match state {
            CommandState::No => Error::No(self.last_text.clone()),
            CommandState::Respond => Error::Bad("unexpected continuation request".to_string()),
            _ => Error::Bad(self.last_text.clone()),
        }
    }

    /// Sends queued commands and reads until every one has finished.
    ///
    /// # Errors
    ///
    /// Same as [`Self::exec`].
    pub async fn flush(&mut self) -> Result<()> {
        self.exec(None, ExecFlags::empty()).await
    }

    /// Queues `cmd` and, unless `QUEUE` is given, sends everything queued.
    pub(crate) async fn start(&mut self, cmd: Option<&str>, flags: ExecFlags) -> Result<()> {
        if self.status == AccountStatus::Fatal {
            return Err(Error::Fatal);
        }
        if let Some(cmd) = cmd {
            self.queue(cmd, flags).await?;
        }
        if flags.contains(ExecFlags::QUEUE) || self.cmdbuf.is_empty() {
            return Ok(());
        }

        let Some(conn) = self.conn.as_mut() else {
            self.handle_fatal();
            return Err(Error::Fatal);
        };
        let sent = conn.write_command(&self.cmdbuf).await;
        self.cmdbuf.clear();
        if let Err(e) = sent {
            debug!(error = %e, "error sending command");
            self.handle_fatal();
            return Err(e);
        }

        if self.state == AccountState::Idle {
            self.state = AccountState::Selected;
        }
        Ok(())
    }

    async fn queue(&mut self, cmd: &str, flags: ExecFlags) -> Result<()> {
        if self.ring.is_full() {
            debug!("draining IMAP command pipeline");
            self.send_queued().await?;
            if let Err(e) = self.drain(flags & ExecFlags::POLL).await
                && e.is_fatal()
            {
                return Err(e);
            }
        }

        let tag = self.tags.next_tag();
        if flags.contains(ExecFlags::PASS) {
            let verb = cmd.split_ascii_whitespace().next().unwrap_or_default();
            debug!("> {tag} {verb} <redacted>");
        } else {
            debug!("> {tag} {cmd}");
        }
        self.cmdbuf.extend_from_slice(tag.as_bytes());
        self.cmdbuf.push(b' ');
        self.cmdbuf.extend_from_slice(cmd.as_bytes());
        self.cmdbuf.extend_from_slice(b"\r\n");
        self.ring.push(tag);
        Ok(())
    }

    // Boxed with a named type: `start` is reached again from inside the
    // queue, and `read_headers` from inside `finish`.
    fn send_queued(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.start(None, ExecFlags::empty()))
    }

    fn fetch_new_mail(&mut self, begin: u32, end: u32) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.read_headers(begin, end, false))
    }

    async fn drain(&mut self, flags: ExecFlags) -> Result<CommandState> {
        if self.ring.is_empty() {
            return Ok(CommandState::Ok);
        }
        self.run(flags).await
    }

    /// Reads responses until the outstanding commands are done.
    async fn run(&mut self, flags: ExecFlags) -> Result<CommandState> {
        let poll_timeout = self.options.poll_timeout;
        if flags.contains(ExecFlags::POLL) && !poll_timeout.is_zero() && !self.poll(poll_timeout).await? {
            error!(host = %self.account.host, "connection timed out");
            self.handle_fatal();
            return Err(Error::Timeout(poll_timeout));
        }

        loop {
            let state = self.step().await?;
            if flags.contains(ExecFlags::SINGLE) && self.ring.is_empty() {
                return Ok(state);
            }
            if state != CommandState::Continue {
                return Ok(state);
            }
        }
    }

    /// Waits up to `timeout` for the server to say something.
    ///
    /// # Errors
    ///
    /// Fails if the account is fatal or the connection breaks.
    pub(crate) async fn poll(&mut self, timeout: Duration) -> Result<bool> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(Error::Fatal);
        };
        match conn.poll_ready(timeout).await {
            Ok(ready) => Ok(ready),
            Err(e) => {
                self.handle_fatal();
                Err(e)
            }
        }
    }

    /// Reads and dispatches one response.
    ///
    /// Returns [`CommandState::Continue`] while any command is still waiting,
    /// [`CommandState::Respond`] on a continuation request, and otherwise
    /// the state of the command the response completed.
    pub(crate) async fn step(&mut self) -> Result<CommandState> {
        if self.status == AccountStatus::Fatal {
            return Err(Error::Fatal);
        }
        self.response = None;

        let Some(conn) = self.conn.as_mut() else {
            self.handle_fatal();
            return Err(Error::Fatal);
        };
        let raw = match conn.read_response().await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "error reading server response");
                self.handle_fatal();
                return Err(e);
            }
        };
        self.last_read = Instant::now();

        let response = match ResponseParser::parse(&raw) {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "unparseable server response");
                self.handle_fatal();
                return Err(e);
            }
        };

        let mut result = CommandState::Ok;
        match response {
            Response::Untagged(untagged) => {
                self.handle_untagged(&untagged)?;
                self.response = Some(untagged);
            }
            Response::Continuation { text } => {
                trace!("< + {text}");
                self.continuation = text;
                return Ok(CommandState::Respond);
            }
            Response::Tagged {
                tag,
                status,
                code,
                text,
            } => {
                if let Some(code) = &code {
                    self.handle_code(code);
                }
                let state = CommandState::from(status);
                if self.ring.complete(&tag, state) {
                    result = state;
                    if state != CommandState::Ok {
                        warn!(%tag, ?status, %text, "IMAP command failed");
                    }
                } else {
                    debug!(%tag, "tagged response for an unknown command");
                }
                self.last_text = text.trim().to_string();
                self.last_code = code;
            }
        }

        if self.ring.running() {
            return Ok(CommandState::Continue);
        }
        trace!("IMAP queue drained");
        self.finish().await;
        Ok(result)
    }

    /// Applies what the drained commands left pending on the mailbox.
    pub(crate) async fn finish(&mut self) {
        if self.status == AccountStatus::Fatal {
            self.closing = false;
            self.handle_fatal();
            return;
        }
        if self.state < AccountState::Selected || (self.mailbox.is_some() && self.closing) {
            self.closing = false;
            return;
        }
        self.closing = false;

        let Some(reopen) = self.mailbox.as_ref().map(|m| m.reopen) else {
            return;
        };
        if reopen.contains(ReopenFlags::ALLOW) {
            if reopen.contains(ReopenFlags::EXPUNGE_PENDING) {
                debug!("expunging mailbox");
                self.expunge_mailbox().await;
                if let Some(mbox) = self.mailbox.as_mut() {
                    if !mbox.reopen.contains(ReopenFlags::EXPUNGE_EXPECTED) {
                        mbox.check_status |= ReopenFlags::EXPUNGE_PENDING;
                    }
                    mbox.reopen -= ReopenFlags::EXPUNGE_PENDING | ReopenFlags::EXPUNGE_EXPECTED;
                }
            }

            let pending = self.mailbox.as_mut().and_then(|mbox| {
                let highest = mbox.highest_msn();
                let wanted = mbox.reopen.contains(ReopenFlags::NEWMAIL_PENDING)
                    && mbox.new_mail_count > highest;
                if !wanted {
                    return None;
                }
                if !mbox.reopen.contains(ReopenFlags::EXPUNGE_PENDING) {
                    mbox.check_status |= ReopenFlags::NEWMAIL_PENDING;
                }
                Some((highest + 1, mbox.new_mail_count))
            });
            if let Some((begin, end)) = pending {
                debug!(begin, end, "fetching new mail");
                if let Err(e) = self.fetch_new_mail(begin, end).await {
                    warn!(error = %e, "fetching new mail failed");
                }
            }
        }

        if self.status != AccountStatus::Fatal {
            self.status = AccountStatus::Ok;
        }
    }

    /// Puts the account into the fatal state and drops the connection.
    ///
    /// There is no reconnect: the caller decides whether to build a new
    /// account.
    pub(crate) fn handle_fatal(&mut self) {
        if self.status != AccountStatus::Fatal {
            error!(host = %self.account.host, "IMAP connection lost");
        }
        self.status = AccountStatus::Fatal;

        if let Some(mbox) = self.mailbox.take() {
            if self.state >= AccountState::Selected && mbox.reopen.contains(ReopenFlags::ALLOW) {
                warn!(mailbox = %mbox.name, host = %self.account.host, "mailbox closed");
            }
            self.prev_mailbox = Some(mbox.name);
        }

        self.conn = None;
        self.ring.clear();
        self.cmdbuf.clear();
        self.state = AccountState::Disconnected;
    }

    /// Reads until something other than untagged data arrives.
    pub(crate) async fn step_until_done(&mut self) -> Result<CommandState> {
        loop {
            let state = self.step().await?;
            if state != CommandState::Continue {
                return Ok(state);
            }
        }
    }

    /// Cancels a SASL exchange with `*` and reads the tagged reply.
    pub(crate) async fn abort_authenticate(&mut self) -> Result<()> {
        self.send_raw(b"*\r\n", false).await?;
        if self.step_until_done().await? == CommandState::Respond {
            self.handle_fatal();
            return Err(Error::Protocol("server ignored authentication abort".to_string()));
        }
        Ok(())
    }

    /// Writes continuation data (a SASL response, a literal) as is.
    pub(crate) async fn send_raw(&mut self, data: &[u8], secret: bool) -> Result<()> {
        if secret {
            debug!("> <redacted>");
        } else {
            trace!("> {}", String::from_utf8_lossy(data).trim_end());
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(Error::Fatal);
        };
        if let Err(e) = conn.write_raw(data).await {
            self.handle_fatal();
            return Err(e);
        }
        Ok(())
    }

    /// Enters IDLE.
    ///
    /// The next command sent ends it with `DONE`.
    ///
    /// # Errors
    ///
    /// Fails if the server refuses IDLE or stays silent for `poll_timeout`.
    pub async fn idle(&mut self) -> Result<()> {
        self.start(Some("IDLE"), ExecFlags::POLL).await?;

        let poll_timeout = self.options.poll_timeout;
        if !poll_timeout.is_zero() && !self.poll(poll_timeout).await? {
            error!(host = %self.account.host, "connection timed out");
            self.handle_fatal();
            return Err(Error::Timeout(poll_timeout));
        }

        if self.step_until_done().await? == CommandState::Respond {
            self.state = AccountState::Idle;
            self.cmdbuf.extend_from_slice(b"DONE\r\n");
            debug!("entered IDLE");
            return Ok(());
        }
        debug!("error starting IDLE");
        Err(Error::Bad(self.last_text.clone()))
    }

    /// Reads whatever arrived during IDLE without blocking.
    ///
    /// The first untagged response ends IDLE: `DONE` goes out and the rest
    /// is read up to the tagged completion of the IDLE command.
    pub(crate) async fn read_idle_responses(&mut self) -> Result<()> {
        loop {
            let Some(buffered) = self.conn.as_ref().map(FramedStream::has_buffered_input) else {
                return Err(Error::Fatal);
            };
            let ready = buffered || self.poll(Duration::ZERO).await?;
            if !ready {
                return Ok(());
            }
            if self.step().await? != CommandState::Continue {
                return Err(Error::Protocol("error reading IDLE response".to_string()));
            }
            if self.state == AccountState::Idle {
                return self.end_idle().await;
            }
        }
    }

    /// Sends `DONE` and waits for the server to close the IDLE command.
    async fn end_idle(&mut self) -> Result<()> {
        debug!("leaving IDLE");
        if self.cmdbuf.is_empty() {
            self.cmdbuf.extend_from_slice(b"DONE\r\n");
        }
        self.start(None, ExecFlags::empty()).await?;
        match self.drain(ExecFlags::POLL).await? {
            CommandState::Ok => Ok(()),
            state => Err(self.failure(state)),
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
pub(crate) mod tests {
    use super::*;
    use crate::mailbox::Email;
    use tokio_test::io::Builder;

    pub(crate) fn account_with(mock: tokio_test::io::Mock, state: AccountState) -> ImapAccount {
        let options = ImapOptions::builder()
            .poll_timeout(Duration::ZERO)
            .build()
            .unwrap();
        account_with_options(mock, options, state)
    }

    pub(crate) fn account_with_options(
        mock: tokio_test::io::Mock,
        options: ImapOptions,
        state: AccountState,
    ) -> ImapAccount {
        let mut account = ImapAccount::new(ConnAccount::new("imap.example.com", false), Arc::new(options), 'a');
        account.attach(ImapStream::custom(mock, false));
        account.state = state;
        account
    }

    pub(crate) fn select_with(account: &mut ImapAccount, uids: &[u32]) {
        let mut mbox = ImapMailbox::new("INBOX", "\"INBOX\"");
        for (i, &uid) in uids.iter().enumerate() {
            let mut email = Email::new(uid);
            email.msn = u32::try_from(i + 1).unwrap();
            mbox.insert(email);
        }
        mbox.reopen |= ReopenFlags::ALLOW;
        account.mailbox = Some(mbox);
    }

    #[tokio::test]
    async fn test_exec_ok() {
        let mock = Builder::new()
            .write(b"a0001 NOOP\r\n")
            .read(b"a0001 OK NOOP completed\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Authenticated);

        account.exec(Some("NOOP"), ExecFlags::empty()).await.unwrap();
        assert_eq!(account.last_response_text(), "NOOP completed");
        assert_eq!(account.commands_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_exec_no_is_not_fatal() {
        let mock = Builder::new()
            .write(b"a0001 SELECT \"Nope\"\r\n")
            .read(b"a0001 NO [NONEXISTENT] Unknown mailbox\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Authenticated);

        let err = account
            .exec(Some("SELECT \"Nope\""), ExecFlags::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::No(ref text) if text == "Unknown mailbox"));
        assert!(!account.is_fatal());
    }

    #[tokio::test]
    async fn test_queued_commands_go_out_together() {
        let mock = Builder::new()
            .write(b"a0001 NOOP\r\na0002 CHECK\r\n")
            .read(b"a0001 OK done\r\n")
            .read(b"a0002 OK done\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Authenticated);

        account.exec(Some("NOOP"), ExecFlags::QUEUE).await.unwrap();
        assert_eq!(account.commands_in_flight(), 1);
        account.exec(Some("CHECK"), ExecFlags::empty()).await.unwrap();
        assert_eq!(account.commands_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_pipelined_fetch_updates_flags_once() {
        let mock = Builder::new()
            .write(
                b"a0001 UID FETCH 1,2,3 (FLAGS)\r\na0002 UID FETCH 1,2,3 (FLAGS)\r\na0003 UID FETCH 1,2,3 (FLAGS)\r\n",
            )
            .read(b"* 1 FETCH (UID 1 FLAGS (\\Seen))\r\n")
            .read(b"a0001 OK FETCH completed\r\n")
            .read(b"* 2 FETCH (UID 2 FLAGS (\\Seen \\Flagged))\r\n")
            .read(b"a0002 OK FETCH completed\r\n")
            .read(b"* 3 FETCH (UID 3 FLAGS ())\r\n")
            .read(b"a0003 OK FETCH completed\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[1, 2, 3]);

        for _ in 0..2 {
            account
                .exec(Some("UID FETCH 1,2,3 (FLAGS)"), ExecFlags::QUEUE)
                .await
                .unwrap();
        }
        account
            .exec(Some("UID FETCH 1,2,3 (FLAGS)"), ExecFlags::empty())
            .await
            .unwrap();

        assert_eq!(account.commands_in_flight(), 0);
        let mbox = account.mailbox().unwrap();
        let one = mbox.email(1).unwrap();
        let two = mbox.email(2).unwrap();
        let three = mbox.email(3).unwrap();
        assert!(one.flags.read && !one.flags.flagged);
        assert!(two.flags.read && two.flags.flagged);
        assert!(!three.flags.read && !three.flags.flagged);
        assert!(!one.changed && !two.changed);
    }

    #[tokio::test]
    async fn test_expunge_applied_before_tagged_response() {
        let mock = Builder::new()
            .write(b"a0001 NOOP\r\n")
            .read(b"* 2 EXPUNGE\r\n* 2 EXPUNGE\r\n")
            .read(b"a0001 OK NOOP completed\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[10, 11, 12, 13]);

        account.exec(Some("NOOP"), ExecFlags::empty()).await.unwrap();

        let mbox = account.mailbox().unwrap();
        assert_eq!(mbox.uids(), vec![10, 13]);
        assert!(mbox.email(11).is_none() && mbox.email(12).is_none());
        assert!(mbox.check_status.contains(ReopenFlags::EXPUNGE_PENDING));
        assert!(!mbox.reopen.contains(ReopenFlags::EXPUNGE_PENDING));
    }

    #[tokio::test]
    async fn test_eof_is_fatal_and_absorbing() {
        let mock = Builder::new().write(b"a0001 NOOP\r\n").build();
        let mut account = account_with(mock, AccountState::Authenticated);

        let err = account.exec(Some("NOOP"), ExecFlags::empty()).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(account.is_fatal());
        assert_eq!(account.state(), AccountState::Disconnected);

        // no further I/O: the mock would panic on an unexpected write
        assert!(matches!(
            account.exec(Some("NOOP"), ExecFlags::empty()).await,
            Err(Error::Fatal)
        ));
    }

    #[tokio::test]
    async fn test_bye_is_fatal() {
        let mock = Builder::new()
            .write(b"a0001 NOOP\r\n")
            .read(b"* BYE Autologout; idle for too long\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Authenticated);

        let err = account.exec(Some("NOOP"), ExecFlags::empty()).await.unwrap_err();
        assert!(matches!(err, Error::Bye(_)));
        assert!(account.is_fatal());
    }

    #[tokio::test]
    async fn test_password_not_in_log_path() {
        let mock = Builder::new()
            .write(b"a0001 LOGIN \"joe\" \"secret\"\r\n")
            .read(b"a0001 OK [CAPABILITY IMAP4rev1 IDLE] Logged in\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Connected);

        account
            .exec(Some("LOGIN \"joe\" \"secret\""), ExecFlags::PASS)
            .await
            .unwrap();
        assert!(account.capabilities().contains(Capabilities::IDLE));
    }

    #[tokio::test]
    async fn test_idle_and_done() {
        let mock = Builder::new()
            .write(b"a0001 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\na0002 NOOP\r\n")
            .read(b"a0001 OK IDLE terminated\r\n")
            .read(b"a0002 OK NOOP completed\r\n")
            .build();
        let mut account = account_with(mock, AccountState::Selected);
        select_with(&mut account, &[]);

        account.idle().await.unwrap();
        assert_eq!(account.state(), AccountState::Idle);

        account.exec(Some("NOOP"), ExecFlags::empty()).await.unwrap();
        assert_eq!(account.state(), AccountState::Selected);
        assert_eq!(account.commands_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_between_commands() {
        let mock = Builder::new().build();
        let flag = Arc::new(AtomicBool::new(true));
        let mut account = account_with(mock, AccountState::Authenticated).with_interrupt(flag.clone());

        assert!(matches!(
            account.exec(Some("NOOP"), ExecFlags::empty()).await,
            Err(Error::Interrupted)
        ));
        assert!(!flag.load(Ordering::SeqCst));
        assert!(!account.is_fatal());
    }

    #[tokio::test]
    async fn test_full_ring_drains_first() {
        let options = ImapOptions::builder()
            .pipeline_depth(1)
            .poll_timeout(Duration::ZERO)
            .build()
            .unwrap();
        let mock = Builder::new()
            .write(b"a0001 NOOP\r\na0002 NOOP\r\n")
            .read(b"a0001 OK done\r\na0002 OK done\r\n")
            .write(b"a0003 NOOP\r\n")
            .read(b"a0003 OK done\r\n")
            .build();
        let mut account = ImapAccount::new(ConnAccount::new("h", false), Arc::new(options), 'a');
        account.attach(ImapStream::custom(mock, false));
        account.state = AccountState::Authenticated;

        account.exec(Some("NOOP"), ExecFlags::QUEUE).await.unwrap();
        account.exec(Some("NOOP"), ExecFlags::QUEUE).await.unwrap();
        account.exec(Some("NOOP"), ExecFlags::empty()).await.unwrap();
        assert_eq!(account.commands_in_flight(), 0);
    }
}
