//! The set of open accounts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::config::ImapOptions;
use crate::engine::{AccountState, Collaborators, ImapAccount};
use crate::url::{ConnAccount, ImapUrl};
use crate::Result;

const SEQIDS: u8 = b'z' - b'a' + 1;

/// Owns the options, collaborators and accounts of one engine.
///
/// Each account gets the next tag prefix from `'a'` to `'z'`, wrapping
/// around, and shares the registry's interrupt flag.
#[derive(Debug)]
pub struct Registry {
    options: Arc<ImapOptions>,
    collab: Collaborators,
    interrupt: Arc<AtomicBool>,
    next_seqid: u8,
    accounts: Vec<ImapAccount>,
}

impl Registry {
    /// Creates an empty registry with the default collaborators.
    #[must_use]
    pub fn new(options: ImapOptions) -> Self {
        let collab = Collaborators::default().with_defaults(&options);
        Self {
            options: Arc::new(options),
            collab,
            interrupt: Arc::new(AtomicBool::new(false)),
            next_seqid: 0,
            accounts: Vec::new(),
        }
    }

    /// Replaces the collaborators handed to new accounts.
    #[must_use]
    pub fn with_collaborators(mut self, collab: Collaborators) -> Self {
        self.collab = collab;
        self
    }

    /// The shared options.
    #[must_use]
    pub fn options(&self) -> &ImapOptions {
        &self.options
    }

    /// The interrupt flag, for a signal handler to set.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Makes the next command on any account fail with `Interrupted`.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    /// The open accounts.
    #[must_use]
    pub fn accounts(&self) -> &[ImapAccount] {
        &self.accounts
    }

    /// Mutable access to the open accounts.
    pub fn accounts_mut(&mut self) -> &mut [ImapAccount] {
        &mut self.accounts
    }

    fn next_seqid(&mut self) -> char {
        let seqid = char::from(b'a' + self.next_seqid);
        self.next_seqid = (self.next_seqid + 1) % SEQIDS;
        seqid
    }

    /// Builds a disconnected account wired to this registry.
    pub fn new_account(&mut self, account: ConnAccount) -> ImapAccount {
        let seqid = self.next_seqid();
        ImapAccount::new(account, Arc::clone(&self.options), seqid)
            .with_collaborators(self.collab.clone())
            .with_interrupt(Arc::clone(&self.interrupt))
    }

    /// Adds a connected account and returns it.
    pub fn insert(&mut self, account: ImapAccount) -> &mut ImapAccount {
        debug!(host = %account.account().host, seqid = %account.seqid(), "registering account");
        let index = self.accounts.len();
        self.accounts.push(account);
        &mut self.accounts[index]
    }

    /// Index of a usable account for `account`.
    #[must_use]
    pub fn position(&self, account: &ConnAccount) -> Option<usize> {
        let default_user = self.options.user.as_deref();
        self.accounts
            .iter()
            .position(|a| a.state() >= AccountState::Authenticated && a.account().matches(account, default_user))
    }

    /// Drops accounts whose connection is gone.
    pub fn prune(&mut self) {
        self.accounts.retain(|a| {
            let keep = !a.is_fatal() && a.state() != AccountState::Disconnected;
            if !keep {
                debug!(host = %a.account().host, seqid = %a.seqid(), "dropping dead account");
            }
            keep
        });
    }

    /// Returns the account for `url`, connecting a new one if needed.
    ///
    /// # Errors
    ///
    /// Whatever [`ImapAccount::connect`] returns; nothing is registered
    /// then.
    pub async fn find_or_connect(&mut self, url: &ImapUrl) -> Result<&mut ImapAccount> {
        self.prune();
        if let Some(index) = self.position(&url.account) {
            return Ok(&mut self.accounts[index]);
        }

        let mut account = self.new_account(url.account.clone());
        account.connect().await?;
        Ok(self.insert(account))
    }

    /// Polls selected mailboxes that have been quiet for `imap_keepalive`.
    ///
    /// Errors are logged; an account that failed is dropped on the next
    /// [`Self::prune`].
    pub async fn keepalive(&mut self) {
        let keepalive = self.options.keepalive;
        for account in &mut self.accounts {
            if account.state() < AccountState::Authenticated
                || account.mailbox().is_none()
                || account.last_read().elapsed() < keepalive
            {
                continue;
            }
            debug!(host = %account.account().host, "keepalive");
            if let Err(e) = account.check_mailbox(true).await {
                warn!(host = %account.account().host, error = %e, "keepalive failed");
            }
        }
    }

    /// Logs out of every account and forgets them.
    pub async fn logout_all(&mut self) {
        for mut account in self.accounts.drain(..) {
            account.logout().await;
        }
        info!("closed all IMAP connections");
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
    use std::time::Duration;

    use tokio_test::io::Builder;

    use super::*;
    use crate::command::ExecFlags;
    use crate::connection::ImapStream;
    use crate::engine::tests::select_with;
    use crate::Error;

    fn registry() -> Registry {
        Registry::new(
            ImapOptions::builder()
                .poll_timeout(Duration::ZERO)
                .keepalive(Duration::ZERO)
                .build()
                .unwrap(),
        )
    }

    fn live<'a>(registry: &'a mut Registry, url: &str, mock: tokio_test::io::Mock) -> &'a mut ImapAccount {
        let url = ImapUrl::parse(url).unwrap();
        let mut account = registry.new_account(url.account);
        account.attach(ImapStream::custom(mock, true));
        account.state = AccountState::Authenticated;
        registry.insert(account)
    }

    #[test]
    fn test_seqids_wrap() {
        let mut registry = registry();
        let ids: Vec<char> = (0..28).map(|_| registry.next_seqid()).collect();
        assert_eq!(ids[0], 'a');
        assert_eq!(ids[25], 'z');
        assert_eq!(ids[26], 'a');
        assert_eq!(ids[27], 'b');
    }

    #[tokio::test]
    async fn test_find_reuses_matching_account() {
        let mut registry = registry();
        live(&mut registry, "imap://joe@mail.example.com/", Builder::new().build());

        let url = ImapUrl::parse("imap://joe@MAIL.example.com/Archive").unwrap();
        let account = registry.find_or_connect(&url).await.unwrap();
        assert_eq!(account.seqid(), 'a');
        assert_eq!(registry.accounts().len(), 1);

        let other = ImapUrl::parse("imap://ann@mail.example.com/").unwrap();
        assert_eq!(registry.position(&other.account), None);
    }

    #[tokio::test]
    async fn test_interrupt_reaches_accounts() {
        let mut registry = registry();
        let account = live(&mut registry, "imap://mail.example.com/", Builder::new().build());
        assert_eq!(account.seqid(), 'a');
        registry.interrupt();
        let account = &mut registry.accounts_mut()[0];
        assert!(matches!(
            account.exec(Some("NOOP"), ExecFlags::empty()).await,
            Err(Error::Interrupted)
        ));
        // the flag is consumed
        assert!(!registry.interrupt_handle().load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_keepalive_polls_selected_accounts() {
        let mut registry = registry();
        let busy = Builder::new()
            .write(b"a0001 NOOP\r\n")
            .read(b"a0001 OK NOOP completed\r\n")
            .build();
        let account = live(&mut registry, "imap://one.example.com/", busy);
        account.state = AccountState::Selected;
        select_with(account, &[1]);
        // authenticated without a mailbox: left alone
        live(&mut registry, "imap://two.example.com/", Builder::new().build());

        registry.keepalive().await;
        assert!(registry.accounts().iter().all(|a| !a.is_fatal()));
    }

    #[tokio::test]
    async fn test_prune_and_logout_all() {
        let mut registry = registry();
        live(&mut registry, "imap://one.example.com/", Builder::new().build())
            .handle_fatal();
        let bye = Builder::new()
            .write(b"b0001 LOGOUT\r\n")
            .read(b"* BYE see you\r\nb0001 OK done\r\n")
            .build();
        live(&mut registry, "imap://two.example.com/", bye);

        registry.prune();
        assert_eq!(registry.accounts().len(), 1);
        registry.logout_all().await;
        assert!(registry.accounts().is_empty());
    }
}
