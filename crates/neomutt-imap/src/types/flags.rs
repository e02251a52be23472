//! Message flags.

use serde::{Deserialize, Serialize};

/// A single message flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Message has been read.
    Seen,
    /// Message has been answered.
    Answered,
    /// Message is flagged for special attention.
    Flagged,
    /// Message is marked for deletion.
    Deleted,
    /// Message is a draft.
    Draft,
    /// Message is recent (first session to see it).
    Recent,
    /// The `Old` keyword: seen in a listing but not read.
    Old,
    /// Any other flag or keyword.
    Keyword(String),
}

impl Flag {
    /// Parses a flag string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "\\SEEN" => Self::Seen,
            "\\ANSWERED" => Self::Answered,
            "\\FLAGGED" => Self::Flagged,
            "\\DELETED" => Self::Deleted,
            "\\DRAFT" => Self::Draft,
            "\\RECENT" => Self::Recent,
            "OLD" => Self::Old,
            _ => Self::Keyword(s.to_string()),
        }
    }

    /// Returns the flag as an IMAP string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Old => "Old",
            Self::Keyword(s) => s,
        }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The flag state of one message as the client tracks it.
///
/// The five well-known flags are booleans. Other system flags (`\Draft`,
/// anything with a backslash) and keywords are kept verbatim so they
/// survive a `STORE FLAGS` round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct MessageFlags {
    /// `\Seen`
    pub read: bool,
    /// `Old`
    pub old: bool,
    /// `\Flagged`
    pub flagged: bool,
    /// `\Answered`
    pub replied: bool,
    /// `\Deleted`
    pub deleted: bool,
    /// Other backslash flags.
    pub system: Vec<String>,
    /// Keywords.
    pub keywords: Vec<String>,
}

impl MessageFlags {
    /// Builds the flag state from a server FLAGS list.
    ///
    /// `\Recent` is ignored. `Old` only counts when `mark_old` is set.
    #[must_use]
    pub fn from_server<S: AsRef<str>>(flags: &[S], mark_old: bool) -> Self {
        let mut out = Self::default();
        for flag in flags {
            let flag = flag.as_ref();
            match Flag::parse(flag) {
                Flag::Seen => out.read = true,
                Flag::Answered => out.replied = true,
                Flag::Flagged => out.flagged = true,
                Flag::Deleted => out.deleted = true,
                Flag::Recent => {}
                Flag::Old => out.old = mark_old,
                Flag::Draft => out.system.push(flag.to_string()),
                Flag::Keyword(word) if word.starts_with('\\') => out.system.push(word),
                Flag::Keyword(word) => out.keywords.push(word),
            }
        }
        out
    }

    /// Returns true if the flag is set.
    #[must_use]
    pub fn has(&self, flag: &Flag) -> bool {
        match flag {
            Flag::Seen => self.read,
            Flag::Answered => self.replied,
            Flag::Flagged => self.flagged,
            Flag::Deleted => self.deleted,
            Flag::Old => self.old,
            Flag::Recent => false,
            Flag::Draft => self.system.iter().any(|f| f.eq_ignore_ascii_case("\\Draft")),
            Flag::Keyword(k) => self.system.iter().chain(&self.keywords).any(|f| f == k),
        }
    }

    /// Sets or clears one of the well-known flags.
    pub fn set(&mut self, flag: &Flag, value: bool) {
        match flag {
            Flag::Seen => self.read = value,
            Flag::Answered => self.replied = value,
            Flag::Flagged => self.flagged = value,
            Flag::Deleted => self.deleted = value,
            Flag::Old => self.old = value,
            Flag::Recent | Flag::Draft | Flag::Keyword(_) => {}
        }
    }

    /// Renders the flags as the contents of an IMAP flag list.
    ///
    /// `\Deleted` is left out unless `with_deleted`; it is only sent when
    /// the caller holds the delete right.
    #[must_use]
    pub fn to_list(&self, with_deleted: bool) -> String {
        let mut flags = Vec::new();
        if self.read {
            flags.push("\\Seen");
        }
        if self.old {
            flags.push("Old");
        }
        if self.flagged {
            flags.push("\\Flagged");
        }
        if self.replied {
            flags.push("\\Answered");
        }
        if self.deleted && with_deleted {
            flags.push("\\Deleted");
        }
        flags.extend(self.system.iter().map(String::as_str));
        flags.extend(self.keywords.iter().map(String::as_str));
        flags.join(" ")
    }

    /// Returns true if the five tracked booleans are the same.
    #[must_use]
    pub const fn same_bits(&self, other: &Self) -> bool {
        self.read == other.read
            && self.old == other.old
            && self.flagged == other.flagged
            && self.replied == other.replied
            && self.deleted == other.deleted
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
    fn test_flag_parse() {
        assert_eq!(Flag::parse("\\Seen"), Flag::Seen);
        assert_eq!(Flag::parse("\\FLAGGED"), Flag::Flagged);
        assert_eq!(Flag::parse("old"), Flag::Old);
        assert_eq!(Flag::parse("$Junk"), Flag::Keyword("$Junk".to_string()));
        assert_eq!(Flag::Deleted.to_string(), "\\Deleted");
    }

    #[test]
    fn test_from_server() {
        let flags = MessageFlags::from_server(
            &["\\Seen", "\\Recent", "\\Draft", "Old", "$Work", "\\Answered"],
            true,
        );
        assert!(flags.read);
        assert!(flags.replied);
        assert!(flags.old);
        assert!(!flags.deleted);
        assert_eq!(flags.system, vec!["\\Draft"]);
        assert_eq!(flags.keywords, vec!["$Work"]);
        assert!(flags.has(&Flag::Draft));
        assert!(flags.has(&Flag::Keyword("$Work".into())));
    }

    #[test]
    fn test_mark_old_off() {
        let flags = MessageFlags::from_server(&["Old"], false);
        assert!(!flags.old);
    }

    #[test]
    fn test_to_list() {
        let mut flags = MessageFlags::from_server(&["\\Seen", "$Work"], true);
        flags.deleted = true;
        assert_eq!(flags.to_list(false), "\\Seen $Work");
        assert_eq!(flags.to_list(true), "\\Seen \\Deleted $Work");
        assert_eq!(MessageFlags::default().to_list(true), "");
    }

    #[test]
    fn test_set_and_same_bits() {
        let mut a = MessageFlags::default();
        let b = a.clone();
        a.set(&Flag::Flagged, true);
        assert!(a.flagged);
        assert!(!a.same_bits(&b));
        a.set(&Flag::Flagged, false);
        assert!(a.same_bits(&b));
    }
}
