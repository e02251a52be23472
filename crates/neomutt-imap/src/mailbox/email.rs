//! Per-message state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::MessageFlags;

/// One message of the selected mailbox.
///
/// Only the header block is kept; bodies are fetched on demand. The
/// serialized form (what goes into the header cache) carries the UID, the
/// local flags and the headers, never the MSN or session bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    /// Message UID.
    pub uid: u32,
    /// Current sequence number, 1-based. Zero when not placed.
    #[serde(skip)]
    pub msn: u32,
    /// Flags as the user sees them, possibly with unsynced changes.
    pub flags: MessageFlags,
    /// Flags as last reported by the server.
    #[serde(skip)]
    pub server_flags: MessageFlags,
    /// Local flag changes not yet written to the server.
    #[serde(skip)]
    pub changed: bool,
    /// The message is live in the current session.
    #[serde(skip)]
    pub active: bool,
    /// Deleted without a copy to the trash folder.
    #[serde(skip)]
    pub purge: bool,
    /// INTERNALDATE.
    pub received: Option<DateTime<Utc>>,
    /// Size of the body, without the header block.
    pub size: u32,
    /// Raw header block as downloaded.
    pub headers: Vec<u8>,
}

impl Email {
    /// Creates an email with no headers.
    #[must_use]
    pub fn new(uid: u32) -> Self {
        Self {
            uid,
            ..Self::default()
        }
    }

    /// Folds a FLAGS update from the server into the message.
    ///
    /// Returns true if the server reported a change the user should hear
    /// about. Local changes that haven't been synced win over the server.
    pub fn apply_server_flags(&mut self, server: MessageFlags) -> bool {
        let local_changes = self.changed;
        let old = std::mem::replace(&mut self.server_flags, server);
        let new = &self.server_flags;
        let mut server_changes = false;

        let pairs = [
            (old.old, new.old, &mut self.flags.old),
            (old.read, new.read, &mut self.flags.read),
            (old.deleted, new.deleted, &mut self.flags.deleted),
            (old.flagged, new.flagged, &mut self.flags.flagged),
            (old.replied, new.replied, &mut self.flags.replied),
        ];
        for (old_flag, new_flag, local) in pairs {
            if old_flag == new_flag && local_changes {
                continue;
            }
            if new_flag == *local {
                continue;
            }
            server_changes = true;
            if !local_changes {
                *local = new_flag;
            }
        }

        self.flags.system.clone_from(&new.system);
        self.flags.keywords.clone_from(&new.keywords);

        server_changes
    }

    /// Marks the local flags as written to the server.
    pub fn mark_synced(&mut self) {
        self.server_flags = self.flags.clone();
        self.changed = false;
    }
}

/// Parses an IMAP INTERNALDATE such as `17-Jul-1996 02:44:25 -0700`.
#[must_use]
pub fn parse_internal_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s.trim(), "%d-%b-%Y %H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Formats a time as an IMAP INTERNALDATE for APPEND.
#[must_use]
pub fn format_internal_date(dt: &DateTime<Utc>) -> String {
    dt.format("%d-%b-%Y %H:%M:%S +0000").to_string()
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

    fn seen() -> MessageFlags {
        MessageFlags {
            read: true,
            ..MessageFlags::default()
        }
    }

    #[test]
    fn test_server_update_without_local_changes() {
        let mut email = Email::new(5);
        assert!(email.apply_server_flags(seen()));
        assert!(email.flags.read);
        assert!(!email.changed);

        // same update again is not news
        assert!(!email.apply_server_flags(seen()));
    }

    #[test]
    fn test_local_change_wins() {
        let mut email = Email::new(5);
        email.apply_server_flags(seen());

        email.flags.read = false;
        email.changed = true;

        // server repeats \Seen: no change on the server side
        assert!(!email.apply_server_flags(seen()));
        assert!(!email.flags.read);

        // server adds \Flagged: reported, but local state kept
        let mut flagged = seen();
        flagged.flagged = true;
        assert!(email.apply_server_flags(flagged));
        assert!(!email.flags.flagged);
        assert!(email.changed);
    }

    #[test]
    fn test_keywords_follow_server() {
        let mut email = Email::new(1);
        let mut flags = MessageFlags::default();
        flags.keywords.push("$Label1".to_string());
        email.apply_server_flags(flags);
        assert_eq!(email.flags.keywords, vec!["$Label1".to_string()]);
    }

    #[test]
    fn test_internal_date() {
        let dt = parse_internal_date(" 7-Feb-1994 21:52:25 -0800").unwrap();
        assert_eq!(dt.to_rfc3339(), "1994-02-08T05:52:25+00:00");
        assert_eq!(format_internal_date(&dt), "08-Feb-1994 05:52:25 +0000");
        assert!(parse_internal_date("yesterday").is_none());
    }

    #[test]
    fn test_serialized_form_skips_session_state() {
        let mut email = Email::new(9);
        email.msn = 3;
        email.active = true;
        email.headers = b"Subject: hi\r\n\r\n".to_vec();

        let json = serde_json::to_string(&email).unwrap();
        let back: Email = serde_json::from_str(&json).unwrap();
        assert_eq!(back.uid, 9);
        assert_eq!(back.msn, 0);
        assert!(!back.active);
        assert_eq!(back.headers, email.headers);
    }
}
