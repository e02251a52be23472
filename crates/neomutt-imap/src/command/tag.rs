//! IMAP command tag generator.
//!
//! Tags are used to match commands with their responses.

/// Tag generator for IMAP commands.
///
/// Generates tags of the form `{seqid}{seqno:04x}`: `a0001`, `a0002`, ...
/// The counter wraps from `ffff` back to `0001`, so `a0000` is never issued.
#[derive(Debug, Clone)]
pub struct TagGenerator {
    seqid: char,
    seqno: u16,
}

impl TagGenerator {
    /// Creates a tag generator with the given prefix.
    #[must_use]
    pub const fn new(seqid: char) -> Self {
        Self { seqid, seqno: 0 }
    }

    /// The prefix of every tag.
    #[must_use]
    pub const fn seqid(&self) -> char {
        self.seqid
    }

    /// Generates the next tag.
    #[must_use]
    pub fn next_tag(&mut self) -> String {
        self.seqno = match self.seqno {
            u16::MAX => 1,
            n => n + 1,
        };
        format!("{}{:04x}", self.seqid, self.seqno)
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('a')
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
    fn test_tag_generation() {
        let mut generator = TagGenerator::default();
        assert_eq!(generator.next_tag(), "a0001");
        assert_eq!(generator.next_tag(), "a0002");
        assert_eq!(generator.next_tag(), "a0003");
    }

    #[test]
    fn test_hex_digits() {
        let mut generator = TagGenerator::new('c');
        for _ in 0..9 {
            let _ = generator.next_tag();
        }
        assert_eq!(generator.next_tag(), "c000a");
    }

    #[test]
    fn test_wraps_to_one() {
        let mut generator = TagGenerator::new('b');
        generator.seqno = 0xfffe;
        assert_eq!(generator.next_tag(), "bffff");
        assert_eq!(generator.next_tag(), "b0001");
    }

    #[test]
    fn test_uniqueness() {
        let mut generator = TagGenerator::default();
        let mut seen = std::collections::HashSet::new();

        for _ in 0..10000 {
            let tag = generator.next_tag();
            assert!(seen.insert(tag), "duplicate tag generated");
        }
    }
}
