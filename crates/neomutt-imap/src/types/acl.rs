//! Access rights (RFC 4314, with the RFC 2086 letters).

use bitflags::bitflags;

bitflags! {
    /// Rights the user holds on a mailbox.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AclRights: u16 {
        /// `l`: mailbox is visible to LIST/LSUB.
        const LOOKUP = 1 << 0;
        /// `r`: SELECT, FETCH, SEARCH, COPY from.
        const READ = 1 << 1;
        /// `s`: keep `\Seen` across sessions.
        const SEEN = 1 << 2;
        /// `w`: write flags other than `\Seen` and `\Deleted`.
        const WRITE = 1 << 3;
        /// `i`: APPEND, COPY into.
        const INSERT = 1 << 4;
        /// `p`: send mail to the submission address.
        const POST = 1 << 5;
        /// `k`: create child mailboxes.
        const CREATE = 1 << 6;
        /// `x`: delete the mailbox.
        const DELETE_MAILBOX = 1 << 7;
        /// `t`: set or clear `\Deleted`.
        const DELETE = 1 << 8;
        /// `e`: EXPUNGE.
        const EXPUNGE = 1 << 9;
        /// `a`: administer.
        const ADMIN = 1 << 10;
    }
}

impl AclRights {
    /// Parses a MYRIGHTS rights string.
    ///
    /// The obsolete `c` and `d` letters map to their RFC 4314 pairs. Unknown
    /// letters are ignored.
    #[must_use]
    pub fn parse(rights: &str) -> Self {
        rights.chars().fold(Self::empty(), |acc, c| {
            acc | match c {
                'l' => Self::LOOKUP,
                'r' => Self::READ,
                's' => Self::SEEN,
                'w' => Self::WRITE,
                'i' => Self::INSERT,
                'p' => Self::POST,
                'k' => Self::CREATE,
                'x' => Self::DELETE_MAILBOX,
                't' => Self::DELETE,
                'e' => Self::EXPUNGE,
                'a' => Self::ADMIN,
                'c' => Self::CREATE | Self::DELETE_MAILBOX,
                'd' => Self::DELETE | Self::EXPUNGE,
                _ => Self::empty(),
            }
        })
    }

    /// Rights that allow changing anything at all in the mailbox.
    #[must_use]
    pub const fn writable() -> Self {
        Self::DELETE.union(Self::SEEN).union(Self::WRITE).union(Self::INSERT)
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
    fn test_parse() {
        let rights = AclRights::parse("lrswi");
        assert!(rights.contains(AclRights::LOOKUP | AclRights::READ | AclRights::INSERT));
        assert!(!rights.contains(AclRights::DELETE));
    }

    #[test]
    fn test_obsolete_letters() {
        assert_eq!(AclRights::parse("c"), AclRights::CREATE | AclRights::DELETE_MAILBOX);
        assert_eq!(AclRights::parse("d"), AclRights::DELETE | AclRights::EXPUNGE);
        assert_eq!(AclRights::parse("n0"), AclRights::empty());
    }

    #[test]
    fn test_writable() {
        assert!(!AclRights::parse("lr").intersects(AclRights::writable()));
        assert!(AclRights::parse("lrs").intersects(AclRights::writable()));
    }
}
