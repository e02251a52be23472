//! Untagged response handling.

use tracing::{debug, error, trace, warn};

use super::{AccountState, AccountStatus, ImapAccount};
use crate::parser::UntaggedResponse;
use crate::path::unmunge;
use crate::types::{AclRights, ResponseCode};
use crate::{Error, Result};

impl ImapAccount {
    /// Applies one untagged response to the account and selected mailbox.
    pub(super) fn handle_untagged(&mut self, response: &UntaggedResponse) -> Result<()> {
        let selected = self.state >= AccountState::Selected;
        let mark_old = self.options.mark_old;

        match response {
            UntaggedResponse::Exists(count) if selected => {
                if let Some(mbox) = self.mailbox.as_mut() {
                    mbox.on_exists(*count);
                }
            }
            UntaggedResponse::Expunge(msn) if selected => {
                if let Some(mbox) = self.mailbox.as_mut() {
                    mbox.on_expunge(*msn);
                }
            }
            UntaggedResponse::Vanished { earlier, uids } if selected => {
                if let Some(mbox) = self.mailbox.as_mut() {
                    mbox.on_vanished(*earlier, uids);
                }
            }
            UntaggedResponse::Fetch { msn, items } if selected => {
                if let Some(mbox) = self.mailbox.as_mut() {
                    mbox.on_fetch(*msn, items, mark_old);
                }
            }
            UntaggedResponse::Exists(_)
            | UntaggedResponse::Expunge(_)
            | UntaggedResponse::Vanished { .. }
            | UntaggedResponse::Fetch { .. } => {
                trace!("ignoring mailbox data outside a selected mailbox");
            }
            UntaggedResponse::Recent(count) => {
                if let Some(mbox) = self.mailbox.as_mut() {
                    mbox.status.recent = *count;
                }
            }
            UntaggedResponse::Capability { caps, raw } => {
                debug!("handling CAPABILITY");
                self.capabilities = *caps;
                self.capstr = Some(raw.clone());
            }
            UntaggedResponse::Ok { code: Some(code), .. }
            | UntaggedResponse::PreAuth { code: Some(code), .. } => self.handle_code(code),
            UntaggedResponse::Ok { .. } | UntaggedResponse::PreAuth { .. } => {}
            UntaggedResponse::List(entry) | UntaggedResponse::Lsub(entry) => {
                let lsub = matches!(response, UntaggedResponse::Lsub(_));
                let mut entry = entry.clone();
                entry.name = match unmunge(self.unicode, &entry.name) {
                    Ok(name) => name,
                    Err(e) => {
                        warn!(name = %entry.name, error = %e, "skipping undecodable mailbox name");
                        return Ok(());
                    }
                };
                if entry.name.is_empty() {
                    self.delim = entry.delim;
                    debug!(delim = ?self.delim, "root delimiter");
                }
                if lsub && self.options.check_subscribed && !entry.noselect {
                    debug!(mailbox = %entry.name, "subscribed");
                    if !self.subscribed.contains(&entry.name) {
                        self.subscribed.push(entry.name.clone());
                    }
                }
                if let Some(results) = self.cmdresult.as_mut() {
                    results.push(entry);
                }
            }
            UntaggedResponse::MyRights { mailbox, rights } => {
                debug!(%mailbox, %rights, "handling MYRIGHTS");
                if let Some(mbox) = self.mailbox.as_mut() {
                    mbox.rights = AclRights::parse(rights);
                }
            }
            UntaggedResponse::Search(msns) => {
                debug!(count = msns.len(), "handling SEARCH");
                self.search.clone_from(msns);
            }
            UntaggedResponse::Status { mailbox, items } => {
                let name = unmunge(self.unicode, mailbox).unwrap_or_else(|_| mailbox.clone());
                debug!(mailbox = %name, "handling STATUS");
                let entry = self.statuses.entry(name.clone()).or_default();
                entry.apply(items);
                let snapshot = *entry;
                if let Some(mbox) = self.mailbox.as_mut()
                    && mbox.name == name
                {
                    mbox.status.messages = snapshot.messages;
                    mbox.status.unseen = snapshot.unseen;
                    mbox.status.recent = snapshot.recent;
                }
            }
            UntaggedResponse::Enabled(names) => {
                debug!(?names, "handling ENABLED");
                for name in names {
                    if name.eq_ignore_ascii_case("UTF8=ACCEPT") || name.eq_ignore_ascii_case("UTF8=ONLY") {
                        self.unicode = true;
                    } else if name.eq_ignore_ascii_case("QRESYNC") {
                        self.qresync = true;
                    }
                }
            }
            UntaggedResponse::Flags(flags) => {
                if let Some(mbox) = self.mailbox.as_mut() {
                    mbox.flags.clone_from(flags);
                }
            }
            UntaggedResponse::Bye { text, .. } => return self.handle_bye(text),
            UntaggedResponse::No { text, .. } | UntaggedResponse::Bad { text, .. } => {
                if self.options.servernoise {
                    warn!(host = %self.account.host, "server: {text}");
                } else {
                    debug!("server: {text}");
                }
            }
            UntaggedResponse::Ignored(keyword) => trace!(%keyword, "ignoring untagged response"),
        }
        Ok(())
    }

    /// Applies a response code that matters outside a SELECT.
    pub(super) fn handle_code(&mut self, code: &ResponseCode) {
        match code {
            ResponseCode::Capability { caps, raw } => {
                debug!("handling CAPABILITY response code");
                self.capabilities = *caps;
                self.capstr = Some(raw.clone());
            }
            ResponseCode::Alert => debug!("server alert"),
            _ => {}
        }
    }

    fn handle_bye(&mut self, text: &str) -> Result<()> {
        debug!("handling BYE");
        if self.status == AccountStatus::Bye {
            return Ok(());
        }
        error!(host = %self.account.host, "{text}");
        self.handle_fatal();
        Err(Error::Bye(text.to_string()))
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

    use super::*;
    use crate::config::ImapOptions;
    use crate::mailbox::ImapMailbox;
    use crate::parser::ResponseParser;
    use crate::parser::Response;
    use crate::types::{Capabilities, ListEntry};
    use crate::url::ConnAccount;

    fn account(options: ImapOptions) -> ImapAccount {
        let mut account = ImapAccount::new(ConnAccount::new("imap.example.com", true), Arc::new(options), 'a');
        account.state = AccountState::Authenticated;
        account
    }

    fn feed(account: &mut ImapAccount, line: &[u8]) -> Result<()> {
        match ResponseParser::parse(line).unwrap() {
            Response::Untagged(untagged) => account.handle_untagged(&untagged),
            other => panic!("expected untagged, got {other:?}"),
        }
    }

    #[test]
    fn test_capability_replaces_set() {
        let mut account = account(ImapOptions::default());
        feed(&mut account, b"* CAPABILITY IMAP4rev1 IDLE QRESYNC\r\n").unwrap();
        assert!(account.capabilities().contains(Capabilities::IDLE | Capabilities::QRESYNC));
        feed(&mut account, b"* CAPABILITY IMAP4rev1\r\n").unwrap();
        assert!(!account.capabilities().contains(Capabilities::IDLE));
        assert_eq!(account.capability_string(), Some("IMAP4rev1"));
    }

    #[test]
    fn test_list_collects_and_sets_delimiter() {
        let mut account = account(ImapOptions::default());
        account.cmdresult = Some(Vec::new());
        feed(&mut account, b"* LIST (\\Noselect) \"/\" \"\"\r\n").unwrap();
        feed(&mut account, b"* LIST () \"/\" \"Entw&APw-rfe\"\r\n").unwrap();
        assert_eq!(account.delimiter(), Some('/'));
        let names: Vec<String> = account
            .cmdresult
            .take()
            .unwrap()
            .into_iter()
            .map(|e: ListEntry| e.name)
            .collect();
        assert_eq!(names, vec!["".to_string(), "Entwürfe".to_string()]);
    }

    #[test]
    fn test_lsub_records_subscriptions() {
        let options = ImapOptions::builder().check_subscribed(true).build().unwrap();
        let mut account = account(options);
        feed(&mut account, b"* LSUB () \".\" INBOX.Lists\r\n").unwrap();
        feed(&mut account, b"* LSUB (\\Noselect) \".\" INBOX.Old\r\n").unwrap();
        assert_eq!(account.subscribed(), &["INBOX.Lists".to_string()]);
    }

    #[test]
    fn test_enabled_and_status() {
        let mut account = account(ImapOptions::default());
        feed(&mut account, b"* ENABLED QRESYNC UTF8=ACCEPT\r\n").unwrap();
        assert!(account.is_qresync());
        assert!(account.is_unicode());

        feed(&mut account, b"* STATUS Archive (MESSAGES 12 UNSEEN 3 UIDNEXT 40)\r\n").unwrap();
        let status = account.mailbox_status("Archive").unwrap();
        assert_eq!((status.messages, status.unseen, status.uid_next), (12, 3, 40));
    }

    #[test]
    fn test_myrights_and_flags_apply_to_mailbox() {
        let mut account = account(ImapOptions::default());
        account.mailbox = Some(ImapMailbox::new("INBOX", "\"INBOX\""));
        feed(&mut account, b"* MYRIGHTS INBOX lrs\r\n").unwrap();
        feed(&mut account, b"* FLAGS (\\Seen \\Deleted $Junk)\r\n").unwrap();
        let mbox = account.mailbox().unwrap();
        assert!(mbox.rights.contains(AclRights::SEEN));
        assert!(!mbox.rights.contains(AclRights::WRITE));
        assert_eq!(mbox.flags.len(), 3);
    }

    #[test]
    fn test_exists_ignored_when_not_selected() {
        let mut account = account(ImapOptions::default());
        account.mailbox = Some(ImapMailbox::new("INBOX", "\"INBOX\""));
        feed(&mut account, b"* 5 EXISTS\r\n").unwrap();
        assert_eq!(account.mailbox().unwrap().new_mail_count, 0);

        account.state = AccountState::Selected;
        feed(&mut account, b"* 5 EXISTS\r\n").unwrap();
        assert_eq!(account.mailbox().unwrap().new_mail_count, 5);
    }

    #[test]
    fn test_bye_during_logout_is_expected() {
        let mut account = account(ImapOptions::default());
        account.status = AccountStatus::Bye;
        feed(&mut account, b"* BYE Logging out\r\n").unwrap();
        assert!(!account.is_fatal());

        account.status = AccountStatus::Ok;
        assert!(matches!(feed(&mut account, b"* BYE shutting down\r\n"), Err(Error::Bye(_))));
        assert!(account.is_fatal());
    }
}
