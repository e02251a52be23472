//! Response codes.

use super::Capabilities;

/// Bracketed response code from an OK/NO/BAD/PREAUTH/BYE response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// ALERT: Human-readable message that MUST be shown to user.
    Alert,
    /// CAPABILITY list carried in a status response.
    Capability {
        /// Recognised capabilities.
        caps: Capabilities,
        /// The list exactly as the server sent it.
        raw: String,
    },
    /// PARSE: Error parsing message.
    Parse,
    /// PERMANENTFLAGS: Flags that can be changed permanently.
    PermanentFlags(Vec<String>),
    /// READ-ONLY: Mailbox selected as read-only.
    ReadOnly,
    /// READ-WRITE: Mailbox selected as read-write.
    ReadWrite,
    /// TRYCREATE: Mailbox doesn't exist, but can be created.
    TryCreate,
    /// UIDNEXT: Next UID to be assigned.
    UidNext(u32),
    /// UIDVALIDITY: Unique identifier validity value.
    UidValidity(u32),
    /// UNSEEN: First unseen message sequence number.
    Unseen(u32),
    /// HIGHESTMODSEQ: Highest mod-sequence value (CONDSTORE).
    HighestModSeq(u64),
    /// NOMODSEQ: Server doesn't support mod-sequences for this mailbox.
    NoModSeq,
    /// CLOSED: the previous mailbox was closed by a QRESYNC re-select.
    Closed,
    /// Unknown response code.
    Unknown(String),
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
    fn capability_keeps_raw() {
        let code = ResponseCode::Capability {
            caps: Capabilities::parse("IMAP4rev1 IDLE"),
            raw: "IMAP4rev1 IDLE".to_string(),
        };
        if let ResponseCode::Capability { caps, raw } = code {
            assert!(caps.contains(Capabilities::IDLE));
            assert_eq!(raw, "IMAP4rev1 IDLE");
        } else {
            panic!("Expected Capability variant");
        }
    }
}
