//! Mailbox listing and status data.

/// One LIST or LSUB entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListEntry {
    /// Decoded mailbox name.
    pub name: String,
    /// Hierarchy delimiter, `None` for a flat namespace.
    pub delim: Option<char>,
    /// `\NoSelect` or `\NonExistent`.
    pub noselect: bool,
    /// `\NoInferiors` or `\HasNoChildren`.
    pub noinferiors: bool,
}

impl ListEntry {
    /// Applies one attribute from the parenthesised list.
    pub fn apply_attribute(&mut self, attr: &str) {
        if attr.eq_ignore_ascii_case("\\NoSelect") || attr.eq_ignore_ascii_case("\\NonExistent") {
            self.noselect = true;
        } else if attr.eq_ignore_ascii_case("\\NoInferiors")
            || attr.eq_ignore_ascii_case("\\HasNoChildren")
        {
            self.noinferiors = true;
        }
    }
}

/// STATUS response item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusItem {
    /// Number of messages.
    Messages(u32),
    /// Number of recent messages.
    Recent(u32),
    /// Next UID.
    UidNext(u32),
    /// UID validity.
    UidValidity(u32),
    /// Number of unseen messages.
    Unseen(u32),
    /// Highest modification sequence.
    HighestModSeq(u64),
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
    fn test_attributes() {
        let mut entry = ListEntry::default();
        entry.apply_attribute("\\HasChildren");
        assert!(!entry.noselect && !entry.noinferiors);
        entry.apply_attribute("\\Noselect");
        entry.apply_attribute("\\HASNOCHILDREN");
        assert!(entry.noselect);
        assert!(entry.noinferiors);
    }
}
