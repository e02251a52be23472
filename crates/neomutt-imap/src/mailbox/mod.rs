//! Mailbox sessions.
//!
//! [`ImapMailbox`] holds what the engine knows about one folder: its names,
//! the status snapshot, and while selected the MSN index and the messages
//! keyed by UID. The operations that talk to the server live in the
//! submodules as methods on [`crate::ImapAccount`].

mod check;
mod copy;
mod email;
mod headers;
mod message;
mod ops;
mod select;
mod sync;

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use bitflags::bitflags;
use neomutt_hcache::HeaderCache;

use crate::parser::FetchItem;
use crate::seqset::SeqsetIterator;
use crate::types::{AclRights, MessageFlags, StatusItem};

pub use check::CheckResult;
pub use email::{Email, format_internal_date, parse_internal_date};
pub use message::{BodyCache, MemoryBodyCache};
pub use ops::BrowseEntry;

/// Largest EXISTS value the index will grow to.
pub const MAX_MSN: u32 = 1 << 26;

bitflags! {
    /// Reopen policy and pending-change bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ReopenFlags: u8 {
        /// Pending changes may be applied at the next checkpoint.
        const ALLOW = 1 << 0;
        /// The client asked for the expunge; don't report it as news.
        const EXPUNGE_EXPECTED = 1 << 1;
        /// Messages were expunged and still need cleaning up.
        const EXPUNGE_PENDING = 1 << 2;
        /// EXISTS grew; headers for the new messages are missing.
        const NEWMAIL_PENDING = 1 << 3;
        /// The server changed flags under us.
        const FLAGS_PENDING = 1 << 4;
    }
}

/// Logs a header-cache failure and carries on without the value.
pub(crate) fn cache_value<T>(what: &str, result: neomutt_hcache::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(what, error = %e, "header cache unavailable");
            None
        }
    }
}

/// Status snapshot of a mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// UIDVALIDITY.
    pub uidvalidity: u32,
    /// UIDNEXT.
    pub uid_next: u32,
    /// HIGHESTMODSEQ.
    pub modseq: u64,
    /// MESSAGES.
    pub messages: u32,
    /// RECENT.
    pub recent: u32,
    /// UNSEEN.
    pub unseen: u32,
}

impl MailboxStatus {
    /// Applies STATUS items.
    pub fn apply(&mut self, items: &[StatusItem]) {
        for item in items {
            match *item {
                StatusItem::Messages(n) => self.messages = n,
                StatusItem::Recent(n) => self.recent = n,
                StatusItem::UidNext(n) => self.uid_next = n,
                StatusItem::UidValidity(n) => self.uidvalidity = n,
                StatusItem::Unseen(n) => self.unseen = n,
                StatusItem::HighestModSeq(n) => self.modseq = n,
            }
        }
    }
}

/// One folder on an account.
#[derive(Debug)]
pub struct ImapMailbox {
    /// Server name, decoded.
    pub name: String,
    /// Name as sent on the wire: encoded and quoted.
    pub munged: String,
    /// Reopen policy.
    pub reopen: ReopenFlags,
    /// Changes the next `check_mailbox` reports.
    pub check_status: ReopenFlags,
    /// Status snapshot.
    pub status: MailboxStatus,
    /// EXISTS count not yet reflected in the index.
    pub new_mail_count: u32,
    /// FLAGS from SELECT.
    pub flags: Vec<String>,
    /// PERMANENTFLAGS from SELECT.
    pub permanent_flags: Vec<String>,
    /// Access rights.
    pub rights: AclRights,
    /// Opened with EXAMINE, or the server said READ-ONLY.
    pub readonly: bool,
    pub(crate) msn: Vec<Option<u32>>,
    pub(crate) uid_hash: HashMap<u32, Email>,
    pub(crate) expunged: Vec<Email>,
    pub(crate) touched: HashSet<u32>,
    pub(crate) hcache: Option<HeaderCache>,
    pub(crate) last_modified: Instant,
}

impl ImapMailbox {
    /// Creates an empty, unselected mailbox.
    #[must_use]
    pub fn new(name: impl Into<String>, munged: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            munged: munged.into(),
            reopen: ReopenFlags::empty(),
            check_status: ReopenFlags::empty(),
            status: MailboxStatus::default(),
            new_mail_count: 0,
            flags: Vec::new(),
            permanent_flags: Vec::new(),
            rights: AclRights::all(),
            readonly: false,
            msn: Vec::new(),
            uid_hash: HashMap::new(),
            expunged: Vec::new(),
            touched: HashSet::new(),
            hcache: None,
            last_modified: Instant::now(),
        }
    }

    /// Highest MSN the index covers.
    #[must_use]
    pub fn highest_msn(&self) -> u32 {
        u32::try_from(self.msn.len()).unwrap_or(u32::MAX)
    }

    /// Number of messages held.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.uid_hash.len()
    }

    /// UID at `msn`, if that slot is filled.
    #[must_use]
    pub fn uid_at(&self, msn: u32) -> Option<u32> {
        let index = usize::try_from(msn).ok()?.checked_sub(1)?;
        self.msn.get(index).copied().flatten()
    }

    /// The message at `msn`.
    #[must_use]
    pub fn email_at(&self, msn: u32) -> Option<&Email> {
        self.uid_at(msn).and_then(|uid| self.uid_hash.get(&uid))
    }

    /// The message with `uid`.
    #[must_use]
    pub fn email(&self, uid: u32) -> Option<&Email> {
        self.uid_hash.get(&uid)
    }

    /// The message with `uid`, mutably.
    pub fn email_mut(&mut self, uid: u32) -> Option<&mut Email> {
        self.uid_hash.get_mut(&uid)
    }

    /// Messages in MSN order.
    pub fn emails(&self) -> impl Iterator<Item = &Email> {
        self.msn
            .iter()
            .flatten()
            .filter_map(|uid| self.uid_hash.get(uid))
    }

    /// UIDs in MSN order, gaps skipped.
    #[must_use]
    pub fn uids(&self) -> Vec<u32> {
        self.msn.iter().flatten().copied().collect()
    }

    /// Places `email` at its MSN, growing the index if needed.
    pub fn insert(&mut self, mut email: Email) {
        let Some(index) = usize::try_from(email.msn).ok().and_then(|m| m.checked_sub(1)) else {
            return;
        };
        if index >= self.msn.len() {
            self.msn.resize(index + 1, None);
        }
        if let Some(old) = self.msn[index].replace(email.uid)
            && old != email.uid
        {
            self.uid_hash.remove(&old);
        }
        email.active = true;
        self.uid_hash.insert(email.uid, email);
    }

    /// Grows (or shrinks) the index to `len` slots.
    pub(crate) fn reserve_msn(&mut self, len: u32) {
        let len = usize::try_from(len.min(MAX_MSN)).unwrap_or(0);
        if len < self.msn.len() {
            for uid in self.msn.drain(len..).flatten() {
                self.uid_hash.remove(&uid);
            }
        } else {
            self.msn.resize(len, None);
        }
    }

    /// Forgets every message.
    pub(crate) fn clear_messages(&mut self) {
        self.msn.clear();
        self.uid_hash.clear();
        self.expunged.clear();
        self.touched.clear();
    }

    /// Handles `* n EXISTS`.
    pub(crate) fn on_exists(&mut self, count: u32) {
        let have = self.highest_msn();
        if count > MAX_MSN {
            tracing::warn!(count, "ignoring absurd EXISTS count");
        } else if count < have {
            tracing::debug!(count, have, "message count is out of sync");
        } else if count == have {
            tracing::debug!(count, "superfluous EXISTS message");
        } else {
            tracing::debug!(count, have, "new mail");
            self.reopen |= ReopenFlags::NEWMAIL_PENDING;
            self.new_mail_count = count;
        }
    }

    /// Handles `* n EXPUNGE`.
    ///
    /// The slot is removed and every later message moves down by one. The
    /// message itself is parked until the next checkpoint cleans up after it.
    pub(crate) fn on_expunge(&mut self, msn: u32) {
        if msn == 0 || msn > self.highest_msn() {
            tracing::debug!(msn, "EXPUNGE for unknown message");
            return;
        }
        self.remove_slot(msn as usize - 1);
        self.reopen |= ReopenFlags::EXPUNGE_PENDING;
    }

    /// Handles `* VANISHED [(EARLIER)] uids`.
    pub(crate) fn on_vanished(&mut self, earlier: bool, uids: &str) {
        let mut removed = false;
        for uid in SeqsetIterator::new(uids) {
            let Ok(uid) = uid else {
                tracing::debug!(uids, earlier, "malformed VANISHED set");
                break;
            };
            let Some(msn) = self.uid_hash.get(&uid).map(|e| e.msn) else {
                continue;
            };
            if self.uid_at(msn) != Some(uid) {
                tracing::debug!(uid, msn, "VANISHED UID does not match its MSN slot");
                continue;
            }
            self.remove_slot(msn as usize - 1);
            removed = true;
        }
        if removed {
            self.reopen |= ReopenFlags::EXPUNGE_PENDING;
        }
    }

    /// Handles `* n FETCH (...)` for a message already in the index.
    ///
    /// Returns true if the server changed the message's flags.
    pub(crate) fn on_fetch(&mut self, msn: u32, items: &[FetchItem], mark_old: bool) -> bool {
        let Some(uid) = self.uid_at(msn) else {
            tracing::trace!(msn, "FETCH for message not in the index");
            return false;
        };
        let Some(email) = self.uid_hash.get_mut(&uid) else {
            return false;
        };
        if !email.active {
            return false;
        }

        let mut flags = None;
        for item in items {
            match item {
                FetchItem::Uid(fetched) if *fetched != uid => {
                    tracing::debug!(msn, uid, fetched, "FETCH UID vs MSN mismatch");
                    return false;
                }
                FetchItem::Flags(list) => flags = Some(MessageFlags::from_server(list, mark_old)),
                _ => {}
            }
        }

        let Some(flags) = flags else {
            return false;
        };
        let server_changes = email.apply_server_flags(flags);
        self.touched.insert(uid);
        if server_changes {
            self.check_status |= ReopenFlags::FLAGS_PENDING;
        }
        server_changes
    }

    fn remove_slot(&mut self, index: usize) {
        if let Some(uid) = self.msn.remove(index)
            && let Some(mut email) = self.uid_hash.remove(&uid)
        {
            email.msn = 0;
            email.active = false;
            self.expunged.push(email);
        }
        for uid in self.msn[index..].iter().flatten() {
            if let Some(email) = self.uid_hash.get_mut(uid) {
                email.msn -= 1;
            }
        }
    }

    /// Picks the next chunk of MSNs to fetch headers for.
    ///
    /// Without a cache every MSN in `begin..=end` is wanted; with one only
    /// the empty slots are. At most `chunk` MSNs are taken (0 = no limit)
    /// and the set is cut short once it gets long. Returns the set and the
    /// last MSN it covers, or `None` if there is nothing to fetch.
    pub(crate) fn fetch_msn_seqset(&self, evalhc: bool, begin: u32, end: u32, chunk: u32) -> Option<(String, u32)> {
        if end < begin {
            return None;
        }
        let max = if chunk > 0 { chunk } else { u32::MAX };

        if !evalhc {
            let last = if end - begin < max { end } else { begin + max - 1 };
            return Some((format!("{begin}:{last}"), last));
        }

        let mut set = String::new();
        let mut count = 0;
        let mut run: Option<(u32, u32)> = None;
        let mut last = end;
        for msn in begin..=end.saturating_add(1) {
            if count < max && msn <= end && self.uid_at(msn).is_none() {
                count += 1;
                run = Some(run.map_or((msn, msn), |(first, _)| (first, msn)));
            } else if let Some((first, run_end)) = run.take() {
                if !set.is_empty() {
                    set.push(',');
                }
                if first == run_end {
                    set.push_str(&first.to_string());
                } else {
                    set.push_str(&format!("{first}:{run_end}"));
                }
                if set.len() > 500 || count >= max {
                    last = msn - 1;
                    break;
                }
            }
        }
        (count > 0).then_some((set, last.min(end)))
    }

    /// Checks that the index and the UID table agree.
    pub(crate) fn verify(&self) -> bool {
        let placed = self.msn.iter().enumerate().all(|(i, slot)| {
            slot.is_none_or(|uid| {
                self.uid_hash
                    .get(&uid)
                    .is_some_and(|e| e.uid == uid && e.msn as usize == i + 1)
            })
        });
        placed && self.msn.iter().flatten().count() == self.uid_hash.len()
    }

    /// Returns true if the server lets us store `flag` permanently.
    ///
    /// PERMANENTFLAGS wins over FLAGS; `\*` allows any keyword.
    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        let list = if self.permanent_flags.is_empty() {
            &self.flags
        } else {
            &self.permanent_flags
        };
        list.iter()
            .any(|f| f == "\\*" || f.eq_ignore_ascii_case(flag))
    }

    /// Builds the `/UIDSEQSET` summary of the index.
    #[must_use]
    pub fn uid_seqset(&self) -> String {
        crate::seqset::compress(self.msn.iter().map(|uid| uid.unwrap_or(0)))
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

    pub(crate) fn mailbox_with(uids: &[u32]) -> ImapMailbox {
        let mut mbox = ImapMailbox::new("INBOX", "\"INBOX\"");
        for (i, &uid) in uids.iter().enumerate() {
            let mut email = Email::new(uid);
            email.msn = u32::try_from(i + 1).unwrap();
            mbox.insert(email);
        }
        mbox
    }

    fn check_density(mbox: &ImapMailbox) {
        for (i, uid) in mbox.msn.iter().enumerate() {
            if let Some(uid) = uid {
                let email = mbox.uid_hash.get(uid).unwrap();
                assert_eq!(email.msn as usize, i + 1);
            }
        }
    }

    #[test]
    fn test_expunge_cascade() {
        let mut mbox = mailbox_with(&[10, 11, 12, 13]);
        mbox.on_expunge(2);
        mbox.on_expunge(2);

        assert_eq!(mbox.uids(), vec![10, 13]);
        assert_eq!(mbox.highest_msn(), 2);
        assert!(mbox.email(11).is_none());
        assert!(mbox.email(12).is_none());
        assert_eq!(mbox.email(13).unwrap().msn, 2);
        assert_eq!(mbox.expunged.len(), 2);
        assert!(mbox.reopen.contains(ReopenFlags::EXPUNGE_PENDING));
        check_density(&mbox);
    }

    #[test]
    fn test_expunge_out_of_range() {
        let mut mbox = mailbox_with(&[1, 2]);
        mbox.on_expunge(0);
        mbox.on_expunge(3);
        assert_eq!(mbox.uids(), vec![1, 2]);
        assert!(mbox.reopen.is_empty());
    }

    #[test]
    fn test_exists() {
        let mut mbox = mailbox_with(&[1, 2, 3]);
        mbox.on_exists(3);
        assert!(mbox.reopen.is_empty());
        mbox.on_exists(2);
        assert!(mbox.reopen.is_empty());
        mbox.on_exists(5);
        assert!(mbox.reopen.contains(ReopenFlags::NEWMAIL_PENDING));
        assert_eq!(mbox.new_mail_count, 5);
        // the index only grows once headers are fetched
        assert_eq!(mbox.highest_msn(), 3);
        mbox.on_exists(u32::MAX);
        assert_eq!(mbox.new_mail_count, 5);
    }

    #[test]
    fn test_vanished() {
        let mut mbox = mailbox_with(&[10, 11, 12, 13, 14]);
        mbox.on_vanished(true, "11:12,14,99");
        assert_eq!(mbox.uids(), vec![10, 13]);
        assert_eq!(mbox.email(13).unwrap().msn, 2);
        assert!(mbox.reopen.contains(ReopenFlags::EXPUNGE_PENDING));
        check_density(&mbox);
    }

    #[test]
    fn test_fetch_updates_flags() {
        let mut mbox = mailbox_with(&[1, 2]);
        let items = vec![
            FetchItem::Uid(2),
            FetchItem::Flags(vec!["\\Seen".to_string(), "\\Flagged".to_string()]),
        ];
        assert!(mbox.on_fetch(2, &items, true));
        let email = mbox.email(2).unwrap();
        assert!(email.flags.read && email.flags.flagged);
        assert!(mbox.check_status.contains(ReopenFlags::FLAGS_PENDING));
    }

    #[test]
    fn test_fetch_uid_mismatch_ignored() {
        let mut mbox = mailbox_with(&[1, 2]);
        let items = vec![FetchItem::Uid(7), FetchItem::Flags(vec!["\\Seen".to_string()])];
        assert!(!mbox.on_fetch(2, &items, true));
        assert!(!mbox.email(2).unwrap().flags.read);
        assert!(!mbox.on_fetch(9, &items, true));
    }

    #[test]
    fn test_fetch_msn_seqset_without_cache() {
        let mbox = ImapMailbox::new("INBOX", "INBOX");
        assert_eq!(mbox.fetch_msn_seqset(false, 1, 10, 0), Some(("1:10".to_string(), 10)));
        assert_eq!(mbox.fetch_msn_seqset(false, 1, 10, 4), Some(("1:4".to_string(), 4)));
        assert_eq!(mbox.fetch_msn_seqset(false, 9, 10, 4), Some(("9:10".to_string(), 10)));
        assert_eq!(mbox.fetch_msn_seqset(false, 5, 4, 0), None);
    }

    #[test]
    fn test_fetch_msn_seqset_fills_gaps() {
        let mut mbox = mailbox_with(&[10, 11, 12, 13, 14, 15]);
        mbox.reserve_msn(9);
        mbox.msn[1] = None;
        mbox.msn[3] = None;
        mbox.msn[4] = None;
        assert_eq!(mbox.fetch_msn_seqset(true, 1, 9, 0), Some(("2,4:5,7:9".to_string(), 9)));
        assert_eq!(mbox.fetch_msn_seqset(true, 1, 9, 2), Some(("2,4".to_string(), 4)));
        assert_eq!(mbox.fetch_msn_seqset(true, 5, 9, 2), Some(("5,7".to_string(), 7)));

        let full = mailbox_with(&[1, 2]);
        assert_eq!(full.fetch_msn_seqset(true, 1, 2, 0), None);
    }

    #[test]
    fn test_verify() {
        let mut mbox = mailbox_with(&[4, 5, 6]);
        assert!(mbox.verify());
        mbox.reserve_msn(5);
        assert!(mbox.verify());
        mbox.uid_hash.get_mut(&5).unwrap().msn = 3;
        assert!(!mbox.verify());
    }

    #[test]
    fn test_uid_seqset_keeps_gaps() {
        let mut mbox = mailbox_with(&[3, 4, 5, 9]);
        mbox.reserve_msn(6);
        assert_eq!(mbox.uid_seqset(), "3:5,9,0,0");
        mbox.reserve_msn(2);
        assert_eq!(mbox.uids(), vec![3, 4]);
        assert!(mbox.email(9).is_none());
    }
}
