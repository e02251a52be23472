//! Response data types.

use crate::types::{Capabilities, ListEntry, ResponseCode, StatusItem};

/// FETCH response item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    /// Message flags, verbatim.
    Flags(Vec<String>),
    /// Message UID.
    Uid(u32),
    /// Message size in bytes.
    Rfc822Size(u32),
    /// Internal date, unparsed.
    InternalDate(String),
    /// CONDSTORE modification sequence.
    ModSeq(u64),
    /// Body section data (`BODY[...]`, `RFC822`, `RFC822.HEADER`, ...).
    Body {
        /// Section specifier such as `HEADER.FIELDS (FROM)`; `None` for `BODY[]`.
        section: Option<String>,
        /// Partial origin.
        origin: Option<u32>,
        /// Data, or `None` for NIL.
        data: Option<Vec<u8>>,
    },
}

/// Untagged response data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UntaggedResponse {
    /// OK response.
    Ok {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// NO response (warning).
    No {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// BAD response (error).
    Bad {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// PREAUTH greeting.
    PreAuth {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// BYE response.
    Bye {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// CAPABILITY response.
    Capability {
        /// Recognised capabilities.
        caps: Capabilities,
        /// The list exactly as sent.
        raw: String,
    },
    /// ENABLED response (RFC 5161).
    Enabled(Vec<String>),
    /// FLAGS response (mailbox flags).
    Flags(Vec<String>),
    /// LIST response.
    List(ListEntry),
    /// LSUB response.
    Lsub(ListEntry),
    /// SEARCH response.
    Search(Vec<u32>),
    /// STATUS response.
    Status {
        /// Mailbox name as sent (still munged).
        mailbox: String,
        /// Status items.
        items: Vec<StatusItem>,
    },
    /// MYRIGHTS response (RFC 4314).
    MyRights {
        /// Mailbox name as sent.
        mailbox: String,
        /// Rights letters.
        rights: String,
    },
    /// EXISTS response.
    Exists(u32),
    /// RECENT response.
    Recent(u32),
    /// EXPUNGE response.
    Expunge(u32),
    /// FETCH response.
    Fetch {
        /// Message sequence number.
        msn: u32,
        /// Fetched items.
        items: Vec<FetchItem>,
    },
    /// VANISHED response (RFC 7162).
    Vanished {
        /// `(EARLIER)` was given.
        earlier: bool,
        /// UID set.
        uids: String,
    },
    /// A keyword the engine does not act on.
    Ignored(String),
}
